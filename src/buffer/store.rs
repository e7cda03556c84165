//! Slot-slab storage for one graph replica.

use std::collections::HashMap;

use tracing::warn;

use crate::model::SocialUser;

/// Per-account bookkeeping in the graph map.
#[derive(Debug, Clone, Copy)]
pub struct UserContext {
    /// Index into the slot slab, or `None` while the account is a
    /// placeholder awaiting profile data.
    pub slot: Option<usize>,
    /// Number of independent add requests sharing this entry. A remove
    /// decrements and only unlinks at zero.
    pub ref_count: u32,
}

/// One replica of the social graph.
///
/// User records live in a slot slab (`Vec<Option<SocialUser>>` plus a
/// recycled-index free list); the xuid map stores [`UserContext`] entries
/// pointing into it. Slot indices are stable across unrelated inserts and
/// removes, which is the address-stability contract the consumer snapshot
/// relies on.
pub struct UserStore {
    /// Slot slab. `None` marks a free slot.
    slots: Vec<Option<SocialUser>>,
    /// Recycled slot indices.
    free: Vec<usize>,
    /// xuid to slot/refcount map. Iteration order is irrelevant.
    graph: HashMap<u64, UserContext>,
    /// Extra capacity kept free when growing.
    headroom: usize,
}

impl UserStore {
    /// Creates an empty store.
    pub fn new(headroom: usize) -> Self {
        Self::with_users(&[], headroom)
    }

    /// Creates a store pre-populated with a roster.
    ///
    /// Capacity is the roster size plus headroom, so that many accounts can
    /// be added before the slab grows.
    pub fn with_users(users: &[SocialUser], headroom: usize) -> Self {
        let mut store = Self {
            slots: Vec::with_capacity(users.len() + headroom),
            free: Vec::new(),
            graph: HashMap::with_capacity(users.len() + headroom),
            headroom,
        };
        for user in users {
            let slot = store.alloc_slot(user.clone());
            store.graph.insert(
                user.xuid,
                UserContext {
                    slot: Some(slot),
                    ref_count: 1,
                },
            );
        }
        for _ in 0..headroom {
            let idx = store.slots.len();
            store.slots.push(None);
            store.free.push(idx);
        }
        store
    }

    fn alloc_slot(&mut self, user: SocialUser) -> usize {
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = Some(user);
            idx
        } else {
            self.slots.push(Some(user));
            self.slots.len() - 1
        }
    }

    /// Looks up a populated user record.
    ///
    /// Returns `None` for absent accounts and for placeholders.
    pub fn get(&self, xuid: u64) -> Option<&SocialUser> {
        let slot = self.graph.get(&xuid)?.slot?;
        self.slots[slot].as_ref()
    }

    /// Mutable variant of [`UserStore::get`].
    pub fn get_mut(&mut self, xuid: u64) -> Option<&mut SocialUser> {
        let slot = self.graph.get(&xuid)?.slot?;
        self.slots[slot].as_mut()
    }

    /// Looks up the bookkeeping entry for an account.
    pub fn context(&self, xuid: u64) -> Option<UserContext> {
        self.graph.get(&xuid).copied()
    }

    /// Whether an account has a map entry (populated or placeholder).
    pub fn contains(&self, xuid: u64) -> bool {
        self.graph.contains_key(&xuid)
    }

    /// Number of map entries, placeholders included.
    pub fn len(&self) -> usize {
        self.graph.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    /// All mapped xuids, placeholders included.
    pub fn xuids(&self) -> Vec<u64> {
        self.graph.keys().copied().collect()
    }

    /// The xuids of accounts with a populated record.
    pub fn populated_xuids(&self) -> Vec<u64> {
        self.graph
            .iter()
            .filter(|(_, ctx)| ctx.slot.is_some())
            .map(|(&xuid, _)| xuid)
            .collect()
    }

    /// Iterates populated user records.
    pub fn users(&self) -> impl Iterator<Item = &SocialUser> {
        self.graph
            .values()
            .filter_map(|ctx| ctx.slot)
            .filter_map(|slot| self.slots[slot].as_ref())
    }

    /// Inserts a placeholder entry so subsequent events find the account.
    ///
    /// No-op if the account is already mapped.
    pub fn insert_placeholder(&mut self, xuid: u64) {
        self.graph.entry(xuid).or_insert(UserContext {
            slot: None,
            ref_count: 1,
        });
    }

    /// Bumps the reference count of a mapped account.
    ///
    /// Returns `false` when the account is not mapped.
    pub fn bump_ref(&mut self, xuid: u64) -> bool {
        match self.graph.get_mut(&xuid) {
            Some(ctx) => {
                ctx.ref_count += 1;
                true
            }
            None => false,
        }
    }

    /// Decrements the reference count of a mapped account.
    ///
    /// Returns the remaining count, or `None` when the account is not
    /// mapped.
    pub fn decrement_ref(&mut self, xuid: u64) -> Option<u32> {
        let ctx = self.graph.get_mut(&xuid)?;
        ctx.ref_count = ctx.ref_count.saturating_sub(1);
        Some(ctx.ref_count)
    }

    /// Removes a map entry without touching the slab.
    ///
    /// Used for placeholders, which own no slot.
    pub fn erase(&mut self, xuid: u64) {
        self.graph.remove(&xuid);
    }

    /// Adds full user records, drawing slots from the free list.
    ///
    /// Placeholder entries are bound to their new slot keeping their
    /// reference count; unmapped accounts are inserted with a count of one.
    /// When the free list cannot cover the batch the slab grows to
    /// `max(expected_final_size, demand)` plus headroom.
    pub fn add_users(&mut self, users: &[SocialUser], expected_final_size: usize) {
        let demand = users.len();
        if demand > self.free.len() {
            let grow_to = expected_final_size.max(demand) + self.headroom;
            let missing = grow_to.saturating_sub(self.free.len());
            self.slots.reserve(missing);
            for _ in 0..missing {
                let idx = self.slots.len();
                self.slots.push(None);
                self.free.push(idx);
            }
        }

        for user in users {
            let xuid = user.xuid;
            let slot = self.alloc_slot(user.clone());
            match self.graph.get_mut(&xuid) {
                Some(ctx) => {
                    if let Some(previous) = ctx.slot.replace(slot) {
                        // Same account added twice in one batch; recycle the
                        // older slot.
                        self.slots[previous] = None;
                        self.free.push(previous);
                    }
                }
                None => {
                    self.graph.insert(
                        xuid,
                        UserContext {
                            slot: Some(slot),
                            ref_count: 1,
                        },
                    );
                }
            }
        }
    }

    /// Physically removes accounts: slots return to the free list and the
    /// map entries are erased.
    pub fn remove_users(&mut self, xuids: &[u64]) {
        for &xuid in xuids {
            match self.graph.remove(&xuid) {
                Some(ctx) => {
                    if let Some(slot) = ctx.slot {
                        self.slots[slot] = None;
                        self.free.push(slot);
                    }
                }
                None => {
                    warn!(xuid, "remove requested for user not in buffer");
                }
            }
        }
    }

    /// Number of free slots currently available.
    pub fn free_capacity(&self) -> usize {
        self.free.len()
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

    #[test]
    fn test_with_users_populates_and_keeps_headroom() {
        let store = UserStore::with_users(&[user(1), user(2)], 5);
        assert_eq!(store.len(), 2);
        assert_eq!(store.free_capacity(), 5);
        assert_eq!(store.get(1).unwrap().gamertag, "gt1");
        assert_eq!(store.context(2).unwrap().ref_count, 1);
    }

    #[test]
    fn test_placeholder_is_invisible_to_get() {
        let mut store = UserStore::new(5);
        store.insert_placeholder(9);
        assert!(store.contains(9));
        assert!(store.get(9).is_none());
        assert_eq!(store.context(9).unwrap().ref_count, 1);
        assert!(store.populated_xuids().is_empty());
    }

    #[test]
    fn test_add_users_binds_placeholder_keeping_refcount() {
        let mut store = UserStore::new(5);
        store.insert_placeholder(9);
        store.bump_ref(9);
        store.add_users(&[user(9)], 1);

        let ctx = store.context(9).unwrap();
        assert_eq!(ctx.ref_count, 2);
        assert!(ctx.slot.is_some());
        assert_eq!(store.get(9).unwrap().xuid, 9);
    }

    #[test]
    fn test_add_users_grows_past_headroom() {
        let mut store = UserStore::new(2);
        let batch: Vec<SocialUser> = (1..=10).map(user).collect();
        store.add_users(&batch, 10);
        assert_eq!(store.len(), 10);
        for u in 1..=10 {
            assert!(store.get(u).is_some());
        }
    }

    #[test]
    fn test_slots_stable_across_unrelated_changes() {
        let mut store = UserStore::with_users(&[user(1), user(2), user(3)], 5);
        let slot_of_2 = store.context(2).unwrap().slot.unwrap();

        store.remove_users(&[1]);
        store.add_users(&[user(4), user(5)], 5);

        assert_eq!(store.context(2).unwrap().slot.unwrap(), slot_of_2);
        assert_eq!(store.get(2).unwrap().xuid, 2);
    }

    #[test]
    fn test_remove_recycles_slot() {
        let mut store = UserStore::with_users(&[user(1)], 0);
        assert_eq!(store.free_capacity(), 0);
        store.remove_users(&[1]);
        assert_eq!(store.free_capacity(), 1);
        assert!(!store.contains(1));

        // Recycled slot is reused without growing the slab.
        store.add_users(&[user(2)], 1);
        assert!(store.get(2).is_some());
    }

    #[test]
    fn test_remove_unknown_is_logged_noop() {
        let mut store = UserStore::new(2);
        store.remove_users(&[42]);
        assert!(store.is_empty());
    }

    #[test]
    fn test_ref_counting() {
        let mut store = UserStore::with_users(&[user(1)], 2);
        assert!(store.bump_ref(1));
        assert_eq!(store.decrement_ref(1), Some(1));
        assert_eq!(store.decrement_ref(1), Some(0));
        assert_eq!(store.decrement_ref(99), None);
        // Saturates rather than wrapping.
        assert_eq!(store.decrement_ref(1), Some(0));
    }

    #[test]
    fn test_overwrite_in_place() {
        let mut store = UserStore::with_users(&[user(1)], 2);
        let mut updated = user(1);
        updated.gamertag = "renamed".to_string();
        *store.get_mut(1).unwrap() = updated;
        assert_eq!(store.get(1).unwrap().gamertag, "renamed");
    }

    #[test]
    fn test_duplicate_add_recycles_older_slot() {
        let mut store = UserStore::with_users(&[user(1)], 3);
        let free_before = store.free_capacity();
        store.add_users(&[user(1)], 1);
        // Old slot freed, new slot taken: net free capacity unchanged.
        assert_eq!(store.free_capacity(), free_before);
        assert_eq!(store.context(1).unwrap().ref_count, 1);
        assert!(store.get(1).is_some());
    }
}
