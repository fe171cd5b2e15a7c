//! Command Router
//!
//! Turns inbound chat events into poll operations. Text commands and button
//! taps arrive as the tagged [`Inbound`] enum; [`PollService`] drives the
//! state manager and the messaging gateway for each of them.
//!
//! A new poll is handled in three steps: send the poll message, record it as
//! the live poll, then strip the controls from the poll it replaced. Only a
//! failed send or a failed store write fails the command; gateway trouble
//! after the state change is logged and ignored.

use crate::channels::{DynGateway, GatewayError};
use crate::config::Texts;
use crate::polls::{
    ChatId, InvalidateInstruction, MemberId, MembershipOutcome, MessageId, PollStateManager,
    StoreError,
};
use std::sync::Arc;

/// Callback data carried by the join button
pub const JOIN_CALLBACK: &str = "yes_participant";
/// Callback data carried by the leave button
pub const LEAVE_CALLBACK: &str = "no_participant";

/// Recognized chat commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Issue a new poll
    Start,
    /// Restart the poll with an empty participant list
    Reset,
    /// Pick a random participant
    Draw,
    /// Stop polls in the chat
    Stop,
}

impl Command {
    /// Parse a message text such as `/start` or `/reset@SomeBot now`
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.trim_start().split_whitespace().next()?;
        let name = word.strip_prefix('/')?;
        let name = name.split_once('@').map_or(name, |(name, _)| name);

        match name.to_ascii_lowercase().as_str() {
            "start" => Some(Self::Start),
            "reset" => Some(Self::Reset),
            "draw" => Some(Self::Draw),
            "stop" => Some(Self::Stop),
            _ => None,
        }
    }
}

/// Button actions on a poll message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapAction {
    Join,
    Leave,
}

impl TapAction {
    /// Parse button callback data
    pub fn parse(data: &str) -> Option<Self> {
        match data {
            JOIN_CALLBACK => Some(Self::Join),
            LEAVE_CALLBACK => Some(Self::Leave),
            _ => None,
        }
    }

    /// Callback data for this action's button
    pub fn callback_data(&self) -> &'static str {
        match self {
            Self::Join => JOIN_CALLBACK,
            Self::Leave => LEAVE_CALLBACK,
        }
    }
}

/// A button tap by a chat member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tap {
    /// Platform id used to acknowledge the tap
    pub id: String,
    pub chat_id: ChatId,
    pub member_id: MemberId,
    /// Message the button belonged to, when the platform reports it
    pub message_id: Option<MessageId>,
    pub action: TapAction,
}

/// Inbound event routed to the poll service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Command { chat_id: ChatId, command: Command },
    Tap(Tap),
}

/// Errors surfaced by the poll service
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Which caller-facing command replaces the poll
#[derive(Debug, Clone, Copy)]
enum Replacement {
    Issue,
    Reset,
}

/// Poll service wiring the state manager to the messaging gateway
pub struct PollService {
    manager: Arc<PollStateManager>,
    gateway: DynGateway,
    texts: Texts,
}

impl PollService {
    /// Create a new poll service
    pub fn new(manager: Arc<PollStateManager>, gateway: DynGateway, texts: Texts) -> Self {
        Self {
            manager,
            gateway,
            texts,
        }
    }

    /// State manager backing this service
    pub fn manager(&self) -> &Arc<PollStateManager> {
        &self.manager
    }

    /// Dispatch an inbound event
    pub async fn handle(&self, inbound: Inbound) -> Result<(), ServiceError> {
        match inbound {
            Inbound::Command { chat_id, command } => match command {
                Command::Start => self.on_start_command(chat_id).await,
                Command::Reset => self.on_reset_command(chat_id).await,
                Command::Draw => self.on_draw_command(chat_id).await,
                Command::Stop => self.on_stop_command(chat_id).await,
            },
            Inbound::Tap(tap) => {
                match tap.action {
                    TapAction::Join => self.on_join_tap(&tap).await?,
                    TapAction::Leave => self.on_leave_tap(&tap).await?,
                };
                Ok(())
            }
        }
    }

    /// Issue a new poll, superseding the current one
    pub async fn on_start_command(&self, chat_id: ChatId) -> Result<(), ServiceError> {
        self.replace_poll(chat_id, Replacement::Issue).await
    }

    /// Restart the poll with an empty participant list
    pub async fn on_reset_command(&self, chat_id: ChatId) -> Result<(), ServiceError> {
        self.replace_poll(chat_id, Replacement::Reset).await
    }

    /// Announce the stop, then deactivate the chat.
    ///
    /// The chat stays active when the announcement cannot be delivered.
    pub async fn on_stop_command(&self, chat_id: ChatId) -> Result<(), ServiceError> {
        self.gateway.send_text(chat_id, &self.texts.stop).await?;
        self.manager.deactivate_group(chat_id).await?;
        Ok(())
    }

    /// Announce a random participant of the live poll
    pub async fn on_draw_command(&self, chat_id: ChatId) -> Result<(), ServiceError> {
        let participants = self.manager.participants(chat_id).await?;

        let text = match pick_random(&participants) {
            Some(winner) => {
                tracing::info!(chat_id = %chat_id, winner = %winner, "Participant drawn");
                self.texts.render_draw_winner(winner)
            }
            None => self.texts.draw_empty.clone(),
        };

        self.gateway.send_text(chat_id, &text).await?;
        Ok(())
    }

    /// Register the tapping member as a participant
    pub async fn on_join_tap(&self, tap: &Tap) -> Result<MembershipOutcome, ServiceError> {
        let outcome = match tap.message_id {
            Some(message_id) => {
                self.manager
                    .join_from_message(tap.chat_id, tap.member_id, message_id)
                    .await?
            }
            None => {
                self.manager
                    .add_participant(tap.chat_id, tap.member_id)
                    .await?
            }
        };
        self.acknowledge(tap, outcome, &self.texts.joined).await;
        Ok(outcome)
    }

    /// Withdraw the tapping member
    pub async fn on_leave_tap(&self, tap: &Tap) -> Result<MembershipOutcome, ServiceError> {
        let outcome = match tap.message_id {
            Some(message_id) => {
                self.manager
                    .leave_from_message(tap.chat_id, tap.member_id, message_id)
                    .await?
            }
            None => {
                self.manager
                    .remove_participant(tap.chat_id, tap.member_id)
                    .await?
            }
        };
        self.acknowledge(tap, outcome, &self.texts.left).await;
        Ok(outcome)
    }

    async fn replace_poll(
        &self,
        chat_id: ChatId,
        replacement: Replacement,
    ) -> Result<(), ServiceError> {
        let text = match replacement {
            Replacement::Issue => &self.texts.start,
            Replacement::Reset => &self.texts.reset,
        };

        let message_id = self.gateway.send_poll_message(chat_id, text).await?;

        let recorded = match replacement {
            Replacement::Issue => self.manager.record_issued_poll(chat_id, message_id).await,
            Replacement::Reset => self.manager.reset_poll(chat_id, message_id).await,
        };

        match recorded {
            Ok(Some(instruction)) => {
                self.invalidate(instruction).await;
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                tracing::error!(
                    chat_id = %chat_id,
                    message_id = %message_id,
                    error = %e,
                    "Failed to record poll"
                );
                // The unrecorded poll must not look tappable
                self.invalidate(InvalidateInstruction {
                    chat_id,
                    message_id,
                })
                .await;
                Err(e.into())
            }
        }
    }

    async fn invalidate(&self, instruction: InvalidateInstruction) {
        if let Err(e) = self
            .gateway
            .invalidate_poll_message(instruction.chat_id, instruction.message_id)
            .await
        {
            tracing::warn!(
                chat_id = %instruction.chat_id,
                message_id = %instruction.message_id,
                error = %e,
                "Failed to invalidate poll message"
            );
        }
    }

    async fn acknowledge(&self, tap: &Tap, outcome: MembershipOutcome, text: &str) {
        let text = match outcome {
            MembershipOutcome::NoLivePoll | MembershipOutcome::StaleMessage => {
                self.texts.poll_closed.as_str()
            }
            _ => text,
        };

        if let Err(e) = self.gateway.acknowledge_tap(&tap.id, text).await {
            tracing::warn!(
                chat_id = %tap.chat_id,
                tap_id = %tap.id,
                error = %e,
                "Failed to acknowledge tap"
            );
        }
    }
}

/// Uniformly pick one member
fn pick_random(members: &[MemberId]) -> Option<MemberId> {
    if members.is_empty() {
        return None;
    }
    let mut bytes = [0u8; 8];
    if let Err(e) = getrandom::fill(&mut bytes) {
        tracing::warn!(error = %e, "Random source unavailable, drawing first participant");
        return members.first().copied();
    }
    let index = (u64::from_le_bytes(bytes) % members.len() as u64) as usize;
    members.get(index).copied()
}
