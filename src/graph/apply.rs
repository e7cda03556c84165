//! Application of internal events to the inactive buffer.
//!
//! `apply_event` runs under the worker's priority lock with a write guard
//! on the inactive store. Fresh applications emit user-visible events and
//! side effects (timer fires, subscription changes); replays mutate buffer
//! state only.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, error, warn};

use super::GraphInner;
use crate::buffer::UserStore;
use crate::error::SocialError;
use crate::events::{
    CompletionSignal, InternalEvent, SocialEventKind, TimerCompletionContext,
};
use crate::model::{parse_xuid, PresenceRecord, SocialUser, TitlePresenceState};
use crate::transport::{DevicePresenceArgs, TitlePresenceArgs};

/// User-visible outcome of applying one event: the kind plus the affected
/// xuids. `None` when the event produced no (tail-emitted) delta.
type ApplyOutcome = Option<(SocialEventKind, Vec<String>)>;

impl GraphInner {
    pub(super) fn apply_event(
        self: &Arc<Self>,
        store: &mut UserStore,
        event: &InternalEvent,
        is_fresh: bool,
    ) {
        let outcome = match event {
            InternalEvent::UsersAdded { xuids, signal } => {
                self.apply_users_added(store, xuids, signal, is_fresh)
            }
            InternalEvent::UsersChanged {
                users,
                requested,
                error,
                completion,
            } => self.apply_users_changed(
                store,
                users,
                requested,
                error.as_ref(),
                completion.as_ref(),
                is_fresh,
            ),
            InternalEvent::UsersRemoved { xuids } => {
                self.apply_users_removed(store, xuids, is_fresh)
            }
            InternalEvent::DevicePresenceChanged(args) => {
                self.apply_device_presence(store, args, is_fresh)
            }
            InternalEvent::TitlePresenceChanged(args) => {
                self.apply_title_presence(store, args)
            }
            InternalEvent::PresenceChanged { records } => {
                self.apply_presence_records(store, records, is_fresh)
            }
            InternalEvent::ProfilesChanged { users }
            | InternalEvent::SocialRelationshipsChanged { users } => {
                // Both reconciliation shapes collapse to the same
                // user-visible kind.
                self.apply_profile_overwrite(store, users)
            }
            InternalEvent::Unknown => {
                error!("unknown event in event processing");
                None
            }
        };

        if is_fresh {
            if let Some((kind, affected)) = outcome {
                self.social_events.push(Some(kind), affected, None);
            }
        }
    }

    /// Splits an add request into already-present (bump their refcount) and
    /// genuinely new identifiers, then kicks off the batched lookup.
    fn apply_users_added(
        self: &Arc<Self>,
        store: &mut UserStore,
        xuids: &[String],
        signal: &CompletionSignal,
        is_fresh: bool,
    ) -> ApplyOutcome {
        let mut to_add: Vec<(u64, String)> = Vec::new();
        for raw in xuids {
            let Some(xuid) = parse_xuid(raw) else {
                error!(xuid = %raw, "invalid user in add request");
                continue;
            };
            if !store.bump_ref(xuid) {
                to_add.push((xuid, raw.clone()));
            }
        }

        if to_add.is_empty() {
            // Everything was already in the graph; the request is done.
            signal.complete(Ok(()));
            return None;
        }

        let context_id = self.next_add_context.fetch_add(1, Ordering::SeqCst) + 1;
        let completion = TimerCompletionContext {
            context_id,
            num_expected: to_add.len(),
            signal: signal.clone(),
        };
        if is_fresh {
            if let Some(timers) = self.timers.get() {
                timers.social_refresh.fire_with_context(
                    to_add.iter().map(|(_, raw)| raw.clone()).collect(),
                    Some(completion),
                );
            }
        }
        // Placeholders so subsequent events find the entries.
        for (xuid, _) in &to_add {
            store.insert_placeholder(*xuid);
        }
        None
    }

    /// Lands fetched profile data: placeholders get populated, existing
    /// records get overwritten, and reconciliation-discovered users get
    /// added.
    fn apply_users_changed(
        self: &Arc<Self>,
        store: &mut UserStore,
        users: &[SocialUser],
        requested: &[String],
        error: Option<&SocialError>,
        completion: Option<&TimerCompletionContext>,
        is_fresh: bool,
    ) -> ApplyOutcome {
        if let Some(ctx) = completion {
            ctx.signal.complete(match error {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            });
        }
        if let Some(e) = error {
            if is_fresh {
                self.social_events.push(
                    Some(SocialEventKind::UsersAddedToGraph),
                    requested.to_vec(),
                    Some(e.clone()),
                );
            }
            return None;
        }

        let from_add_request = completion.is_some();
        let mut users_to_add: Vec<SocialUser> = Vec::new();
        let mut users_changed: Vec<String> = Vec::new();
        for user in users {
            match store.context(user.xuid) {
                Some(ctx) if ctx.slot.is_some() => {
                    if let Some(existing) = store.get_mut(user.xuid) {
                        *existing = user.clone();
                    }
                    users_changed.push(user.xuid_string());
                }
                Some(_) => users_to_add.push(user.clone()),
                None if from_add_request => {
                    // The placeholder vanished: removed while the lookup
                    // was in flight.
                    debug!(xuid = user.xuid, "dropping fetched user removed mid-flight");
                }
                None => users_to_add.push(user.clone()),
            }
        }

        if !users_to_add.is_empty() {
            let expected = completion
                .map(|ctx| ctx.num_expected)
                .unwrap_or(users_to_add.len());
            store.add_users(&users_to_add, expected);
            if is_fresh {
                self.spawn_subscribe(users_to_add.iter().map(|u| u.xuid).collect());
                self.social_events.push(
                    Some(SocialEventKind::UsersAddedToGraph),
                    users_to_add.iter().map(|u| u.xuid_string()).collect(),
                    None,
                );
            }
        }
        if !users_changed.is_empty() && is_fresh {
            self.social_events.push(
                Some(SocialEventKind::ProfilesChanged),
                users_changed,
                None,
            );
        }
        None
    }

    /// Decrements refcounts and unlinks entries that reach zero.
    fn apply_users_removed(
        self: &Arc<Self>,
        store: &mut UserStore,
        xuids: &[u64],
        is_fresh: bool,
    ) -> ApplyOutcome {
        let mut released: Vec<String> = Vec::new();
        let mut physical: Vec<u64> = Vec::new();
        for &xuid in xuids {
            match store.decrement_ref(xuid) {
                None => warn!(xuid, "removal requested for user not in graph"),
                Some(0) => {
                    released.push(xuid.to_string());
                    if store.context(xuid).and_then(|ctx| ctx.slot).is_some() {
                        physical.push(xuid);
                    } else {
                        // Placeholder never got populated; just drop it.
                        store.erase(xuid);
                    }
                }
                Some(_) => {}
            }
        }
        store.remove_users(&physical);
        if is_fresh && !physical.is_empty() {
            self.spawn_unsubscribe(physical);
        }
        if released.is_empty() {
            None
        } else {
            Some((SocialEventKind::UsersRemovedFromGraph, released))
        }
    }

    /// A device-level sign-in/out push.
    ///
    /// With more than one title record, or a sign-in, the cheap in-place
    /// patch would be wrong or incomplete, so a batched full presence pull
    /// is scheduled instead.
    fn apply_device_presence(
        self: &Arc<Self>,
        store: &mut UserStore,
        args: &DevicePresenceArgs,
        is_fresh: bool,
    ) -> ApplyOutcome {
        let Some(xuid) = parse_xuid(&args.xuid) else {
            error!(xuid = %args.xuid, "invalid user in device presence change");
            return None;
        };
        let fire_refresh = match store.get(xuid) {
            Some(user) => {
                user.presence.title_record_count() > 1 || args.is_user_logged_on_device
            }
            None => {
                error!(xuid, "device presence received for user not in graph");
                return None;
            }
        };

        if fire_refresh {
            if is_fresh {
                if let Some(timers) = self.timers.get() {
                    timers.presence_refresh.fire(vec![args.xuid.clone()]);
                }
            }
            None
        } else {
            if let Some(user) = store.get_mut(xuid) {
                user.presence
                    .update_device(args.device_type, args.is_user_logged_on_device);
            }
            Some((SocialEventKind::PresenceChanged, vec![args.xuid.clone()]))
        }
    }

    /// A title session push; an ended session drops that title's record.
    fn apply_title_presence(
        self: &Arc<Self>,
        store: &mut UserStore,
        args: &TitlePresenceArgs,
    ) -> ApplyOutcome {
        let Some(xuid) = parse_xuid(&args.xuid) else {
            error!(xuid = %args.xuid, "invalid user in title presence change");
            return None;
        };
        let Some(user) = store.get_mut(xuid) else {
            error!(xuid, "title presence received for user not in graph");
            return None;
        };
        if args.state == TitlePresenceState::Ended {
            user.presence.remove_title(args.title_id);
        }
        Some((SocialEventKind::PresenceChanged, vec![args.xuid.clone()]))
    }

    /// Lands a batch of fetched presence records, emitting at most one
    /// user event for the records that actually differ.
    fn apply_presence_records(
        self: &Arc<Self>,
        store: &mut UserStore,
        records: &[PresenceRecord],
        is_fresh: bool,
    ) -> ApplyOutcome {
        let mut changed: Vec<String> = Vec::new();
        for record in records {
            if record.xuid == 0 {
                error!("invalid user in presence update");
                continue;
            }
            let Some(user) = store.get_mut(record.xuid) else {
                // Not in the graph, or a placeholder: nothing to compare.
                continue;
            };
            if user.presence.differs_from(record) {
                user.presence = record.clone();
                changed.push(record.xuid.to_string());
            }
        }
        if is_fresh && !changed.is_empty() {
            self.social_events
                .push(Some(SocialEventKind::PresenceChanged), changed, None);
        }
        None
    }

    /// Overwrites whole records in place for reconciliation-derived
    /// profile and relationship deltas.
    fn apply_profile_overwrite(
        self: &Arc<Self>,
        store: &mut UserStore,
        users: &[SocialUser],
    ) -> ApplyOutcome {
        let mut affected: Vec<String> = Vec::new();
        for user in users {
            match store.get_mut(user.xuid) {
                Some(existing) => {
                    *existing = user.clone();
                    affected.push(user.xuid_string());
                }
                None => warn!(xuid = user.xuid, "profile update for user not in graph"),
            }
        }
        if affected.is_empty() {
            None
        } else {
            Some((SocialEventKind::ProfilesChanged, affected))
        }
    }
}
