//! The active/inactive buffer pair and its pending-replay logs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use super::store::{UserContext, UserStore};
use crate::events::InternalEvent;
use crate::model::SocialUser;

/// Two graph replicas with a swap primitive and per-buffer replay logs.
///
/// Exactly one buffer is active at any moment. The consumer snapshots the
/// active buffer through an owned read guard; the graph worker mutates only
/// the inactive buffer through a write guard, so reads never coordinate
/// with ingest.
///
/// Every fresh event applied to the inactive buffer is also recorded into
/// the *active* buffer's pending log - the replica that has not seen the
/// mutation yet. A swap therefore requires the incoming-active (currently
/// inactive) log to be empty, and hands the worker a log of everything the
/// newly-inactive replica must replay to catch up. This keeps the pair
/// consistent without ever copying the whole graph.
pub struct UserBufferPair {
    stores: [Arc<RwLock<UserStore>>; 2],
    pending: [Mutex<VecDeque<InternalEvent>>; 2],
    active: AtomicUsize,
}

impl UserBufferPair {
    /// Creates a pair of empty replicas.
    pub fn new(headroom: usize) -> Self {
        Self {
            stores: [
                Arc::new(RwLock::new(UserStore::new(headroom))),
                Arc::new(RwLock::new(UserStore::new(headroom))),
            ],
            pending: [Mutex::new(VecDeque::new()), Mutex::new(VecDeque::new())],
            active: AtomicUsize::new(0),
        }
    }

    /// Fills both replicas with the initial roster.
    ///
    /// The replicas are value copies of each other; records are never
    /// shared between buffers.
    pub async fn initialize(&self, users: &[SocialUser], headroom: usize) {
        for store in &self.stores {
            let mut guard = store.clone().write_owned().await;
            *guard = UserStore::with_users(users, headroom);
        }
    }

    fn active_index(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    fn inactive_index(&self) -> usize {
        1 - self.active_index()
    }

    /// Flips the active designator.
    ///
    /// Callable only under the graph's state and priority locks with the
    /// incoming-active pending log empty; see the graph worker.
    pub fn swap(&self) {
        let current = self.active_index();
        self.active.store(1 - current, Ordering::Release);
    }

    /// Takes a read-only snapshot of the active replica.
    pub fn snapshot_active(&self) -> GraphSnapshot {
        let store = self.stores[self.active_index()].clone();
        let guard = store
            .try_read_owned()
            .expect("active buffer is never write-locked");
        GraphSnapshot { guard }
    }

    /// Attempts a write guard on the inactive replica.
    ///
    /// Fails only while a consumer still holds a snapshot taken before the
    /// last swap; callers treat that as "no work done this round".
    pub fn try_write_inactive(&self) -> Option<OwnedRwLockWriteGuard<UserStore>> {
        self.stores[self.inactive_index()].clone().try_write_owned().ok()
    }

    /// Attempts a read guard on the inactive replica.
    pub fn try_read_inactive(&self) -> Option<OwnedRwLockReadGuard<UserStore>> {
        self.stores[self.inactive_index()].clone().try_read_owned().ok()
    }

    /// Records a freshly applied event into the active buffer's pending
    /// log, to be replayed onto that buffer after the next swap.
    pub fn record_event(&self, event: InternalEvent) {
        self.pending[self.active_index()]
            .lock()
            .unwrap()
            .push_back(event);
    }

    /// Drains the inactive buffer's pending log for replay.
    pub fn take_inactive_pending(&self) -> VecDeque<InternalEvent> {
        std::mem::take(&mut *self.pending[self.inactive_index()].lock().unwrap())
    }

    /// Whether the inactive buffer has nothing left to replay.
    pub fn inactive_pending_empty(&self) -> bool {
        self.pending[self.inactive_index()].lock().unwrap().is_empty()
    }

    /// Whether both pending logs are empty.
    pub fn pending_all_empty(&self) -> bool {
        self.pending[0].lock().unwrap().is_empty() && self.pending[1].lock().unwrap().is_empty()
    }
}

/// Point-in-time, read-only view of the active replica.
///
/// Valid and immutable until the consumer's next `do_work`; holding it
/// longer delays the worker's catch-up writes on that replica.
pub struct GraphSnapshot {
    guard: OwnedRwLockReadGuard<UserStore>,
}

impl GraphSnapshot {
    /// Looks up a populated user record.
    pub fn get(&self, xuid: u64) -> Option<&SocialUser> {
        self.guard.get(xuid)
    }

    /// Looks up the bookkeeping entry for an account.
    pub fn context(&self, xuid: u64) -> Option<UserContext> {
        self.guard.context(xuid)
    }

    /// Whether an account is in the graph (populated or placeholder).
    pub fn contains(&self, xuid: u64) -> bool {
        self.guard.contains(xuid)
    }

    /// Number of accounts in the graph, placeholders included.
    pub fn len(&self) -> usize {
        self.guard.len()
    }

    /// Whether the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.guard.is_empty()
    }

    /// All mapped xuids.
    pub fn xuids(&self) -> Vec<u64> {
        self.guard.xuids()
    }

    /// Iterates populated user records.
    pub fn users(&self) -> impl Iterator<Item = &SocialUser> {
        self.guard.users()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PresenceRecord;

    fn user(xuid: u64) -> SocialUser {
        SocialUser {
            xuid,
            display_name: format!("User {xuid}"),
            real_name: String::new(),
            gamertag: format!("gt{xuid}"),
            display_pic_url: String::new(),
            is_followed_by_caller: false,
            is_following_user: true,
            is_favorite: false,
            presence: PresenceRecord::empty(xuid),
        }
    }

    #[tokio::test]
    async fn test_initialize_fills_both_replicas() {
        let pair = UserBufferPair::new(5);
        pair.initialize(&[user(1), user(2)], 5).await;

        let active = pair.snapshot_active();
        assert_eq!(active.len(), 2);
        drop(active);

        pair.swap();
        let other = pair.snapshot_active();
        assert_eq!(other.len(), 2);
        assert!(other.contains(1));
        assert!(other.contains(2));
    }

    #[tokio::test]
    async fn test_replicas_are_value_copies() {
        let pair = UserBufferPair::new(5);
        pair.initialize(&[user(1)], 5).await;

        {
            let mut inactive = pair.try_write_inactive().unwrap();
            inactive.get_mut(1).unwrap().gamertag = "renamed".to_string();
        }

        // The active replica is untouched by the inactive-side write.
        let snapshot = pair.snapshot_active();
        assert_eq!(snapshot.get(1).unwrap().gamertag, "gt1");
    }

    #[tokio::test]
    async fn test_swap_exposes_written_replica() {
        let pair = UserBufferPair::new(5);
        pair.initialize(&[user(1)], 5).await;

        {
            let mut inactive = pair.try_write_inactive().unwrap();
            inactive.add_users(&[user(2)], 2);
        }
        pair.swap();

        let snapshot = pair.snapshot_active();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains(2));
    }

    #[tokio::test]
    async fn test_snapshot_does_not_block_inactive_writes() {
        let pair = UserBufferPair::new(5);
        pair.initialize(&[user(1)], 5).await;

        let snapshot = pair.snapshot_active();
        // A consumer holding the active snapshot must not block ingest.
        assert!(pair.try_write_inactive().is_some());
        assert!(snapshot.contains(1));
    }

    #[tokio::test]
    async fn test_stale_snapshot_blocks_replay_writes() {
        let pair = UserBufferPair::new(5);
        pair.initialize(&[user(1)], 5).await;

        let stale = pair.snapshot_active();
        pair.swap();
        // The held snapshot now points at the inactive replica, so the
        // worker cannot start writing it yet.
        assert!(pair.try_write_inactive().is_none());
        drop(stale);
        assert!(pair.try_write_inactive().is_some());
    }

    #[tokio::test]
    async fn test_pending_log_tracks_active_side() {
        let pair = UserBufferPair::new(5);
        pair.initialize(&[], 5).await;

        assert!(pair.pending_all_empty());
        pair.record_event(InternalEvent::UsersRemoved { xuids: vec![1] });

        // Recorded on the active side: nothing to replay on the inactive
        // side yet, so a swap is allowed.
        assert!(pair.inactive_pending_empty());
        assert!(!pair.pending_all_empty());

        pair.swap();
        assert!(!pair.inactive_pending_empty());

        let replays = pair.take_inactive_pending();
        assert_eq!(replays.len(), 1);
        assert!(pair.pending_all_empty());
    }

    #[tokio::test]
    async fn test_take_pending_preserves_order() {
        let pair = UserBufferPair::new(5);
        pair.record_event(InternalEvent::UsersRemoved { xuids: vec![1] });
        pair.record_event(InternalEvent::UsersRemoved { xuids: vec![2] });
        pair.swap();

        let replays: Vec<_> = pair.take_inactive_pending().into_iter().collect();
        match (&replays[0], &replays[1]) {
            (
                InternalEvent::UsersRemoved { xuids: first },
                InternalEvent::UsersRemoved { xuids: second },
            ) => {
                assert_eq!(first, &vec![1]);
                assert_eq!(second, &vec![2]);
            }
            other => panic!("unexpected replay order: {other:?}"),
        }
    }
}
