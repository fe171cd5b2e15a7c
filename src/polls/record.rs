//! Poll Records
//!
//! Per-chat poll state: the live poll message, the members who opted in,
//! and whether the chat accepts polls at all.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Identifier of a group chat
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

/// Identifier of a message within a chat
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

/// Identifier of a chat member
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Poll state for a single chat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollRecord {
    /// Chat this record belongs to
    pub chat_id: ChatId,
    /// Message currently carrying the poll controls
    #[serde(default)]
    pub active_poll_message_id: Option<MessageId>,
    /// Members who joined the current poll
    #[serde(default)]
    pub participants: BTreeSet<MemberId>,
    /// False once the chat was stopped
    #[serde(default)]
    pub active: bool,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

/// Instruction to strip the controls from a superseded poll message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidateInstruction {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// Result of a join or leave request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipOutcome {
    /// Member was added to the participants
    Added,
    /// Member was removed from the participants
    Removed,
    /// Member was already in the requested state
    Unchanged,
    /// Chat has no live poll (never issued or stopped)
    NoLivePoll,
    /// Tap came from a message that is no longer the live poll
    StaleMessage,
}

impl MembershipOutcome {
    /// Whether the record was left untouched
    pub fn is_noop(&self) -> bool {
        !matches!(self, Self::Added | Self::Removed)
    }
}

impl PollRecord {
    /// Create an empty record with no poll issued yet
    pub fn new(chat_id: ChatId) -> Self {
        Self {
            chat_id,
            active_poll_message_id: None,
            participants: BTreeSet::new(),
            active: false,
            updated_at: Utc::now(),
        }
    }

    /// Whether the chat has a poll accepting taps
    pub fn is_live(&self) -> bool {
        self.active && self.active_poll_message_id.is_some()
    }

    /// Whether `message_id` is the live poll message
    pub fn is_current(&self, message_id: MessageId) -> bool {
        self.is_live() && self.active_poll_message_id == Some(message_id)
    }

    /// Make `message_id` the live poll.
    ///
    /// Clears participants and reactivates the chat. Returns the previous
    /// poll message, which must lose its controls.
    pub fn replace_poll(&mut self, message_id: MessageId) -> Option<InvalidateInstruction> {
        let previous = self
            .active_poll_message_id
            .replace(message_id)
            .filter(|prev| *prev != message_id);

        self.participants.clear();
        self.active = true;
        self.touch();

        previous.map(|prev| InvalidateInstruction {
            chat_id: self.chat_id,
            message_id: prev,
        })
    }

    /// Stop the chat. Participants are dropped along with the poll.
    pub fn deactivate(&mut self) {
        self.active = false;
        self.active_poll_message_id = None;
        self.participants.clear();
        self.touch();
    }

    /// Add a member to the live poll
    pub fn add_participant(&mut self, member: MemberId) -> MembershipOutcome {
        if !self.is_live() {
            return MembershipOutcome::NoLivePoll;
        }
        if self.participants.insert(member) {
            self.touch();
            MembershipOutcome::Added
        } else {
            MembershipOutcome::Unchanged
        }
    }

    /// Remove a member from the live poll
    pub fn remove_participant(&mut self, member: MemberId) -> MembershipOutcome {
        if !self.is_live() {
            return MembershipOutcome::NoLivePoll;
        }
        if self.participants.remove(&member) {
            self.touch();
            MembershipOutcome::Removed
        } else {
            MembershipOutcome::Unchanged
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
