//! Per-user presence subscription handles.
//!
//! Every populated user in the graph carries two subscriptions: device
//! presence and title presence. The registry issues them in bulk, stores
//! the returned handles, and reverses them when users leave the graph.
//! Uses `DashMap` so the registry can be touched from the worker, init
//! path, and reconnect path without a dedicated lock.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, error};

use crate::error::SocialError;
use crate::transport::{PresenceClient, SubscriptionHandle};

#[derive(Debug, Default, Clone, Copy)]
struct UserSubscriptions {
    device: Option<SubscriptionHandle>,
    title: Option<SubscriptionHandle>,
}

/// Tracks device/title presence subscription handles per user.
pub struct SubscriptionRegistry {
    presence: Arc<dyn PresenceClient>,
    title_id: u32,
    handles: DashMap<u64, UserSubscriptions>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry issuing subscriptions through `presence`.
    pub fn new(presence: Arc<dyn PresenceClient>, title_id: u32) -> Self {
        Self {
            presence,
            title_id,
            handles: DashMap::new(),
        }
    }

    /// Issues both presence subscriptions for each user and stores the
    /// handles.
    ///
    /// A failure on either subscription is logged and does not roll back
    /// the other; the returned error reports that at least one
    /// registration failed. Re-subscribing an already-subscribed user
    /// overwrites its handles.
    pub fn subscribe_many(&self, xuids: &[u64]) -> Result<(), SocialError> {
        let mut any_failed = false;
        for &xuid in xuids {
            let key = xuid.to_string();
            let mut subs = UserSubscriptions::default();

            match self.presence.subscribe_device_presence(&key) {
                Ok(handle) => subs.device = Some(handle),
                Err(e) => {
                    error!(xuid, error = %e, "device presence subscription failed");
                    any_failed = true;
                }
            }
            match self.presence.subscribe_title_presence(&key, self.title_id) {
                Ok(handle) => subs.title = Some(handle),
                Err(e) => {
                    error!(xuid, error = %e, "title presence subscription failed");
                    any_failed = true;
                }
            }

            self.handles.insert(xuid, subs);
        }
        debug!(count = xuids.len(), "presence subscriptions established");

        if any_failed {
            Err(SocialError::Runtime(
                "presence subscription failed for one or more users".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    /// Reverses both subscriptions for each user and drops the handles.
    ///
    /// Unsubscribe failures are logged and otherwise ignored.
    pub fn unsubscribe_many(&self, xuids: &[u64]) {
        for &xuid in xuids {
            let Some((_, subs)) = self.handles.remove(&xuid) else {
                continue;
            };
            if let Some(handle) = subs.device {
                if let Err(e) = self.presence.unsubscribe_device_presence(handle) {
                    error!(xuid, error = %e, "device presence unsubscribe failed");
                }
            }
            if let Some(handle) = subs.title {
                if let Err(e) = self.presence.unsubscribe_title_presence(handle) {
                    error!(xuid, error = %e, "title presence unsubscribe failed");
                }
            }
        }
    }

    /// Whether a user currently has registered handles.
    pub fn contains(&self, xuid: u64) -> bool {
        self.handles.contains_key(&xuid)
    }

    /// Number of users with registered handles.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether no user is subscribed.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// The currently subscribed users.
    pub fn subscribed_xuids(&self) -> Vec<u64> {
        self.handles.iter().map(|entry| *entry.key()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::model::PresenceRecord;
    use crate::transport::ClientFuture;

    /// Presence client that hands out sequential handles and can be told to
    /// fail device subscriptions.
    struct CountingPresence {
        next_handle: AtomicU64,
        subscribe_calls: AtomicUsize,
        unsubscribe_calls: AtomicUsize,
        fail_device: Mutex<bool>,
    }

    impl CountingPresence {
        fn new() -> Self {
            Self {
                next_handle: AtomicU64::new(1),
                subscribe_calls: AtomicUsize::new(0),
                unsubscribe_calls: AtomicUsize::new(0),
                fail_device: Mutex::new(false),
            }
        }
    }

    impl PresenceClient for CountingPresence {
        fn get_presence_for_users(
            &self,
            _xuids: Vec<String>,
        ) -> ClientFuture<'_, Vec<PresenceRecord>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn subscribe_device_presence(
            &self,
            _xuid: &str,
        ) -> Result<SubscriptionHandle, SocialError> {
            self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
            if *self.fail_device.lock().unwrap() {
                return Err(SocialError::Network("subscribe refused".to_string()));
            }
            Ok(SubscriptionHandle(
                self.next_handle.fetch_add(1, Ordering::SeqCst),
            ))
        }

        fn unsubscribe_device_presence(
            &self,
            _handle: SubscriptionHandle,
        ) -> Result<(), SocialError> {
            self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn subscribe_title_presence(
            &self,
            _xuid: &str,
            _title_id: u32,
        ) -> Result<SubscriptionHandle, SocialError> {
            self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
            Ok(SubscriptionHandle(
                self.next_handle.fetch_add(1, Ordering::SeqCst),
            ))
        }

        fn unsubscribe_title_presence(
            &self,
            _handle: SubscriptionHandle,
        ) -> Result<(), SocialError> {
            self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_subscribe_many_stores_handles() {
        let presence = Arc::new(CountingPresence::new());
        let registry = SubscriptionRegistry::new(presence.clone(), 42);

        registry.subscribe_many(&[1, 2, 3]).unwrap();
        assert_eq!(registry.len(), 3);
        assert!(registry.contains(2));
        // Two subscriptions per user.
        assert_eq!(presence.subscribe_calls.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_partial_failure_keeps_other_handle() {
        let presence = Arc::new(CountingPresence::new());
        *presence.fail_device.lock().unwrap() = true;
        let registry = SubscriptionRegistry::new(presence.clone(), 42);

        let result = registry.subscribe_many(&[1]);
        assert!(result.is_err());
        // The user is still tracked with the title handle that succeeded.
        assert!(registry.contains(1));

        registry.unsubscribe_many(&[1]);
        // Only the title handle existed to reverse.
        assert_eq!(presence.unsubscribe_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_many_drops_handles() {
        let presence = Arc::new(CountingPresence::new());
        let registry = SubscriptionRegistry::new(presence.clone(), 42);

        registry.subscribe_many(&[1, 2]).unwrap();
        registry.unsubscribe_many(&[1]);
        assert!(!registry.contains(1));
        assert!(registry.contains(2));
        assert_eq!(presence.unsubscribe_calls.load(Ordering::SeqCst), 2);

        // Unknown users are skipped without touching the client.
        registry.unsubscribe_many(&[99]);
        assert_eq!(presence.unsubscribe_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_resubscribe_overwrites() {
        let presence = Arc::new(CountingPresence::new());
        let registry = SubscriptionRegistry::new(presence.clone(), 42);

        registry.subscribe_many(&[1]).unwrap();
        registry.subscribe_many(&[1]).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(presence.subscribe_calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_subscribed_xuids() {
        let presence = Arc::new(CountingPresence::new());
        let registry = SubscriptionRegistry::new(presence, 42);
        registry.subscribe_many(&[5, 6]).unwrap();

        let mut xuids = registry.subscribed_xuids();
        xuids.sort_unstable();
        assert_eq!(xuids, vec![5, 6]);
    }
}
