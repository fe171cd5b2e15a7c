//! Polls Module
//!
//! Attendance poll state for group chats: one live yes/no poll per chat and
//! the members who opted in.

pub mod manager;
pub mod record;
pub mod store;

pub use manager::{PollStateManager, DEFAULT_STORE_TIMEOUT};
pub use record::{
    ChatId, InvalidateInstruction, MemberId, MembershipOutcome, MessageId, PollRecord,
};
pub use store::{InMemoryPollStore, JsonFilePollStore, PollStore, StoreError};
