//! Poll State Manager
//!
//! Owns the per-chat poll lifecycle: issuing and replacing polls, stopping a
//! chat, and toggling membership. A chat never has two live poll messages;
//! replacing a poll hands back an instruction to strip the old one.
//!
//! Every mutation is a read-modify-write of one [`PollRecord`], serialized
//! per chat. Chats do not share locks.

use super::record::{
    ChatId, InvalidateInstruction, MemberId, MembershipOutcome, MessageId, PollRecord,
};
use super::store::{PollStore, StoreError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

/// Default bound on a single store call
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Membership {
    Join,
    Leave,
}

/// Holds a chat's lock entry alive; the last lease out removes it
struct ChatLease<'a> {
    locks: &'a Mutex<HashMap<ChatId, Arc<AsyncMutex<()>>>>,
    chat_id: ChatId,
    lock: Arc<AsyncMutex<()>>,
}

impl Drop for ChatLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock();
        // Leases only clone the entry under the map lock, so a count of two
        // (map plus this lease) means nobody else is waiting on the chat
        if Arc::strong_count(&self.lock) == 2
            && locks
                .get(&self.chat_id)
                .is_some_and(|entry| Arc::ptr_eq(entry, &self.lock))
        {
            locks.remove(&self.chat_id);
        }
    }
}

/// Poll lifecycle manager
pub struct PollStateManager {
    store: Arc<dyn PollStore>,
    chat_locks: Mutex<HashMap<ChatId, Arc<AsyncMutex<()>>>>,
    store_timeout: Duration,
}

impl PollStateManager {
    /// Create a manager over `store`
    pub fn new(store: Arc<dyn PollStore>) -> Self {
        Self {
            store,
            chat_locks: Mutex::new(HashMap::new()),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Set the bound on a single store call
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Record `message_id` as the chat's new live poll.
    ///
    /// Creates the record on first use, clears participants and reactivates
    /// a stopped chat. Returns the superseded poll message, if any.
    pub async fn record_issued_poll(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<Option<InvalidateInstruction>, StoreError> {
        let instruction = self.replace(chat_id, message_id).await?;
        tracing::info!(
            chat_id = %chat_id,
            message_id = %message_id,
            superseded = ?instruction.map(|i| i.message_id.0),
            "Poll issued"
        );
        Ok(instruction)
    }

    /// Restart the chat's poll on `message_id`. Same state effect as issuing.
    pub async fn reset_poll(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<Option<InvalidateInstruction>, StoreError> {
        let instruction = self.replace(chat_id, message_id).await?;
        tracing::info!(
            chat_id = %chat_id,
            message_id = %message_id,
            superseded = ?instruction.map(|i| i.message_id.0),
            "Poll reset"
        );
        Ok(instruction)
    }

    /// Stop the chat: no live poll, no participants, joins are ignored
    /// until the next poll is issued. A chat that never had a poll is left
    /// without a record.
    pub async fn deactivate_group(&self, chat_id: ChatId) -> Result<(), StoreError> {
        let lease = self.chat_lock(chat_id);
        let _guard = lease.lock.lock().await;

        let Some(mut record) = self.load(chat_id).await? else {
            tracing::debug!(chat_id = %chat_id, "Stop for chat without poll");
            return Ok(());
        };

        record.deactivate();
        self.save(&record).await?;
        tracing::info!(chat_id = %chat_id, "Chat deactivated");
        Ok(())
    }

    /// Add `member` to the chat's live poll
    pub async fn add_participant(
        &self,
        chat_id: ChatId,
        member: MemberId,
    ) -> Result<MembershipOutcome, StoreError> {
        self.toggle(chat_id, member, None, Membership::Join).await
    }

    /// Remove `member` from the chat's live poll
    pub async fn remove_participant(
        &self,
        chat_id: ChatId,
        member: MemberId,
    ) -> Result<MembershipOutcome, StoreError> {
        self.toggle(chat_id, member, None, Membership::Leave).await
    }

    /// Join from a tap on `message_id`. Taps on a superseded poll are dropped.
    pub async fn join_from_message(
        &self,
        chat_id: ChatId,
        member: MemberId,
        message_id: MessageId,
    ) -> Result<MembershipOutcome, StoreError> {
        self.toggle(chat_id, member, Some(message_id), Membership::Join)
            .await
    }

    /// Leave from a tap on `message_id`. Taps on a superseded poll are dropped.
    pub async fn leave_from_message(
        &self,
        chat_id: ChatId,
        member: MemberId,
        message_id: MessageId,
    ) -> Result<MembershipOutcome, StoreError> {
        self.toggle(chat_id, member, Some(message_id), Membership::Leave)
            .await
    }

    /// Current record for a chat
    pub async fn record(&self, chat_id: ChatId) -> Result<Option<PollRecord>, StoreError> {
        self.load(chat_id).await
    }

    /// Participants of the live poll; empty when the chat has none
    pub async fn participants(&self, chat_id: ChatId) -> Result<Vec<MemberId>, StoreError> {
        Ok(self
            .load(chat_id)
            .await?
            .filter(PollRecord::is_live)
            .map(|record| record.participants.into_iter().collect())
            .unwrap_or_default())
    }

    async fn replace(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<Option<InvalidateInstruction>, StoreError> {
        let lease = self.chat_lock(chat_id);
        let _guard = lease.lock.lock().await;

        let mut record = self
            .load(chat_id)
            .await?
            .unwrap_or_else(|| PollRecord::new(chat_id));

        let instruction = record.replace_poll(message_id);
        self.save(&record).await?;
        Ok(instruction)
    }

    async fn toggle(
        &self,
        chat_id: ChatId,
        member: MemberId,
        on_message: Option<MessageId>,
        membership: Membership,
    ) -> Result<MembershipOutcome, StoreError> {
        let lease = self.chat_lock(chat_id);
        let _guard = lease.lock.lock().await;

        let Some(mut record) = self.load(chat_id).await? else {
            return Ok(MembershipOutcome::NoLivePoll);
        };

        if let Some(message_id) = on_message {
            if record.is_live() && !record.is_current(message_id) {
                tracing::debug!(
                    chat_id = %chat_id,
                    message_id = %message_id,
                    "Dropping tap on superseded poll"
                );
                return Ok(MembershipOutcome::StaleMessage);
            }
        }

        let outcome = match membership {
            Membership::Join => record.add_participant(member),
            Membership::Leave => record.remove_participant(member),
        };

        if !outcome.is_noop() {
            self.save(&record).await?;
        }

        tracing::debug!(
            chat_id = %chat_id,
            member = %member,
            outcome = ?outcome,
            "Membership updated"
        );
        Ok(outcome)
    }

    fn chat_lock(&self, chat_id: ChatId) -> ChatLease<'_> {
        let lock = self.chat_locks.lock().entry(chat_id).or_default().clone();
        ChatLease {
            locks: &self.chat_locks,
            chat_id,
            lock,
        }
    }

    async fn load(&self, chat_id: ChatId) -> Result<Option<PollRecord>, StoreError> {
        self.bounded(self.store.get(chat_id)).await
    }

    async fn save(&self, record: &PollRecord) -> Result<(), StoreError> {
        self.bounded(self.store.upsert(record)).await
    }

    async fn bounded<T>(
        &self,
        op: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.store_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.store_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polls::store::InMemoryPollStore;
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn manager() -> (Arc<InMemoryPollStore>, PollStateManager) {
        let store = Arc::new(InMemoryPollStore::new());
        let manager = PollStateManager::new(store.clone());
        (store, manager)
    }

    /// Store whose writes fail while `fail_writes` is set
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryPollStore,
        fail_writes: AtomicBool,
    }

    #[async_trait]
    impl PollStore for FlakyStore {
        async fn get(&self, chat_id: ChatId) -> Result<Option<PollRecord>, StoreError> {
            self.inner.get(chat_id).await
        }

        async fn upsert(&self, record: &PollRecord) -> Result<(), StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("disk full".to_string()));
            }
            self.inner.upsert(record).await
        }
    }

    /// Store that never answers
    struct StalledStore;

    #[async_trait]
    impl PollStore for StalledStore {
        async fn get(&self, _chat_id: ChatId) -> Result<Option<PollRecord>, StoreError> {
            std::future::pending().await
        }

        async fn upsert(&self, _record: &PollRecord) -> Result<(), StoreError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_issue_creates_record() {
        let (store, manager) = manager();

        let instruction = manager
            .record_issued_poll(ChatId(1), MessageId(1))
            .await
            .unwrap();
        assert!(instruction.is_none());

        let record = store.get(ChatId(1)).await.unwrap().unwrap();
        assert_eq!(record.active_poll_message_id, Some(MessageId(1)));
        assert!(record.participants.is_empty());
        assert!(record.active);
    }

    #[tokio::test]
    async fn test_membership_toggling() {
        let (_, manager) = manager();
        manager
            .record_issued_poll(ChatId(1), MessageId(1))
            .await
            .unwrap();

        manager.add_participant(ChatId(1), MemberId(1)).await.unwrap();
        manager.add_participant(ChatId(1), MemberId(2)).await.unwrap();
        manager
            .remove_participant(ChatId(1), MemberId(1))
            .await
            .unwrap();

        let participants = manager.participants(ChatId(1)).await.unwrap();
        assert_eq!(participants, vec![MemberId(2)]);
    }

    #[tokio::test]
    async fn test_second_issue_invalidates_first() {
        let (_, manager) = manager();
        manager
            .record_issued_poll(ChatId(1), MessageId(1))
            .await
            .unwrap();
        manager.add_participant(ChatId(1), MemberId(9)).await.unwrap();

        let instruction = manager
            .record_issued_poll(ChatId(1), MessageId(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(instruction.message_id, MessageId(1));

        let record = manager.record(ChatId(1)).await.unwrap().unwrap();
        assert_eq!(record.active_poll_message_id, Some(MessageId(2)));
        assert!(record.participants.is_empty());
    }

    #[tokio::test]
    async fn test_reset_clears_participants() {
        let (_, manager) = manager();
        manager
            .record_issued_poll(ChatId(1), MessageId(1))
            .await
            .unwrap();
        manager.add_participant(ChatId(1), MemberId(1)).await.unwrap();

        let instruction = manager
            .reset_poll(ChatId(1), MessageId(3))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(instruction.message_id, MessageId(1));
        assert!(manager.participants(ChatId(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deactivate_then_join_is_noop() {
        let (store, manager) = manager();
        manager
            .record_issued_poll(ChatId(1), MessageId(1))
            .await
            .unwrap();
        manager.deactivate_group(ChatId(1)).await.unwrap();
        let before = store.get(ChatId(1)).await.unwrap().unwrap();

        let outcome = manager.add_participant(ChatId(1), MemberId(3)).await.unwrap();
        assert_eq!(outcome, MembershipOutcome::NoLivePoll);

        let after = store.get(ChatId(1)).await.unwrap().unwrap();
        assert_eq!(before, after);
        assert!(!after.active);
        assert!(after.active_poll_message_id.is_none());
    }

    #[tokio::test]
    async fn test_deactivate_unknown_chat_creates_nothing() {
        let (store, manager) = manager();
        manager.deactivate_group(ChatId(5)).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_issue_after_stop_reactivates() {
        let (_, manager) = manager();
        manager
            .record_issued_poll(ChatId(1), MessageId(1))
            .await
            .unwrap();
        manager.deactivate_group(ChatId(1)).await.unwrap();

        let instruction = manager
            .record_issued_poll(ChatId(1), MessageId(2))
            .await
            .unwrap();
        assert!(instruction.is_none());

        let outcome = manager.add_participant(ChatId(1), MemberId(1)).await.unwrap();
        assert_eq!(outcome, MembershipOutcome::Added);
    }

    #[tokio::test]
    async fn test_join_without_poll_is_noop() {
        let (store, manager) = manager();
        let outcome = manager.add_participant(ChatId(1), MemberId(1)).await.unwrap();
        assert_eq!(outcome, MembershipOutcome::NoLivePoll);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_tap_on_superseded_poll_is_dropped() {
        let (_, manager) = manager();
        manager
            .record_issued_poll(ChatId(1), MessageId(1))
            .await
            .unwrap();
        manager
            .record_issued_poll(ChatId(1), MessageId(2))
            .await
            .unwrap();

        let outcome = manager
            .join_from_message(ChatId(1), MemberId(1), MessageId(1))
            .await
            .unwrap();
        assert_eq!(outcome, MembershipOutcome::StaleMessage);

        let outcome = manager
            .join_from_message(ChatId(1), MemberId(1), MessageId(2))
            .await
            .unwrap();
        assert_eq!(outcome, MembershipOutcome::Added);

        let outcome = manager
            .leave_from_message(ChatId(1), MemberId(1), MessageId(1))
            .await
            .unwrap();
        assert_eq!(outcome, MembershipOutcome::StaleMessage);
        assert_eq!(
            manager.participants(ChatId(1)).await.unwrap(),
            vec![MemberId(1)]
        );
    }

    #[tokio::test]
    async fn test_failed_write_leaves_record_untouched() {
        let store = Arc::new(FlakyStore::default());
        let manager = PollStateManager::new(store.clone());
        manager
            .record_issued_poll(ChatId(1), MessageId(1))
            .await
            .unwrap();
        manager.add_participant(ChatId(1), MemberId(1)).await.unwrap();

        store.fail_writes.store(true, Ordering::SeqCst);
        let result = manager.record_issued_poll(ChatId(1), MessageId(2)).await;
        assert!(matches!(result, Err(StoreError::Backend(_))));

        let record = store.get(ChatId(1)).await.unwrap().unwrap();
        assert_eq!(record.active_poll_message_id, Some(MessageId(1)));
        assert_eq!(record.participants.len(), 1);
    }

    #[tokio::test]
    async fn test_stalled_store_times_out() {
        let manager = PollStateManager::new(Arc::new(StalledStore))
            .with_store_timeout(Duration::from_millis(20));

        let result = manager.add_participant(ChatId(1), MemberId(1)).await;
        assert!(matches!(result, Err(StoreError::Timeout(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_joins_are_all_applied() {
        let (_, manager) = manager();
        let manager = Arc::new(manager);
        manager
            .record_issued_poll(ChatId(1), MessageId(1))
            .await
            .unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for member in 0..50 {
            let manager = manager.clone();
            tasks.spawn(async move {
                manager
                    .add_participant(ChatId(1), MemberId(member))
                    .await
                    .unwrap()
            });
        }
        while let Some(outcome) = tasks.join_next().await {
            assert_eq!(outcome.unwrap(), MembershipOutcome::Added);
        }

        let mut tasks = tokio::task::JoinSet::new();
        for member in (0..50).filter(|m| m % 2 == 0) {
            let manager = manager.clone();
            tasks.spawn(async move {
                manager
                    .remove_participant(ChatId(1), MemberId(member))
                    .await
                    .unwrap()
            });
        }
        while let Some(outcome) = tasks.join_next().await {
            assert_eq!(outcome.unwrap(), MembershipOutcome::Removed);
        }

        let participants: BTreeSet<_> = manager
            .participants(ChatId(1))
            .await
            .unwrap()
            .into_iter()
            .collect();
        let expected: BTreeSet<_> = (0..50).filter(|m| m % 2 == 1).map(MemberId).collect();
        assert_eq!(participants, expected);
        assert!(manager.chat_locks.lock().is_empty());
    }

    #[tokio::test]
    async fn test_lock_entries_are_released() {
        let (_, manager) = manager();
        for chat in 0..100 {
            manager
                .add_participant(ChatId(chat), MemberId(1))
                .await
                .unwrap();
        }
        manager
            .record_issued_poll(ChatId(1), MessageId(1))
            .await
            .unwrap();
        manager.deactivate_group(ChatId(1)).await.unwrap();

        assert!(manager.chat_locks.lock().is_empty());
    }

    #[tokio::test]
    async fn test_lock_entry_released_after_store_error() {
        let manager = PollStateManager::new(Arc::new(StalledStore))
            .with_store_timeout(Duration::from_millis(20));

        let result = manager.record_issued_poll(ChatId(1), MessageId(1)).await;
        assert!(matches!(result, Err(StoreError::Timeout(_))));
        assert!(manager.chat_locks.lock().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_issues_leave_one_live_poll() {
        let (_, manager) = manager();
        let manager = Arc::new(manager);

        let mut tasks = tokio::task::JoinSet::new();
        for message in 1..=20 {
            let manager = manager.clone();
            tasks.spawn(async move {
                manager
                    .record_issued_poll(ChatId(1), MessageId(message))
                    .await
                    .unwrap()
            });
        }

        let mut invalidated = Vec::new();
        while let Some(instruction) = tasks.join_next().await {
            if let Some(instruction) = instruction.unwrap() {
                invalidated.push(instruction.message_id);
            }
        }

        let current = manager
            .record(ChatId(1))
            .await
            .unwrap()
            .unwrap()
            .active_poll_message_id
            .unwrap();

        // Every message except the survivor is invalidated exactly once
        assert_eq!(invalidated.len(), 19);
        let unique: BTreeSet<_> = invalidated.iter().copied().collect();
        assert_eq!(unique.len(), 19);
        assert!(!unique.contains(&current));
    }

    #[tokio::test]
    async fn test_chats_are_independent() {
        let (_, manager) = manager();
        manager
            .record_issued_poll(ChatId(1), MessageId(1))
            .await
            .unwrap();
        manager
            .record_issued_poll(ChatId(2), MessageId(1))
            .await
            .unwrap();
        manager.add_participant(ChatId(1), MemberId(1)).await.unwrap();
        manager.deactivate_group(ChatId(2)).await.unwrap();

        assert_eq!(
            manager.participants(ChatId(1)).await.unwrap(),
            vec![MemberId(1)]
        );
        assert!(manager.participants(ChatId(2)).await.unwrap().is_empty());
    }
}
