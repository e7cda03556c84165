//! Periodic reconciliation: full roster fetch plus diff against the
//! current graph.
//!
//! Push channels drop messages; reconciliation bounds how far the replica
//! can drift from the authoritative roster. A pass runs every refresh
//! interval and after every transport resync, producing synthetic internal
//! events that flow through the same apply pipeline as live pushes.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error};

use super::{GraphInner, GraphState};
use crate::events::{InternalEvent, TimerCompletionContext};
use crate::model::{PresenceRecord, SocialUser};

impl GraphInner {
    /// One reconciliation pass.
    ///
    /// First schedules a filtered refresh for users the full roster fetch
    /// will not return (accounts not following the caller back), then
    /// fetches the full roster and diffs it.
    pub(crate) async fn refresh_graph(self: &Arc<Self>) {
        let refresh_list = {
            let mut state = self.state.lock().unwrap();
            let _priority = self.priority.lock().unwrap();
            *state = GraphState::Refresh;
            let list: Vec<String> = match self.buffers.try_read_inactive() {
                Some(store) => store
                    .users()
                    .filter(|user| !user.is_followed_by_caller)
                    .map(|user| user.xuid_string())
                    .collect(),
                None => Vec::new(),
            };
            *state = GraphState::Normal;
            list
        };

        if !refresh_list.is_empty() {
            if let Some(timers) = self.timers.get() {
                timers.social_refresh.fire(refresh_list);
            }
        }

        match self
            .peoplehub
            .get_social_graph(self.local_user, self.detail_level, None)
            .await
        {
            Ok(users) => {
                let remote: HashMap<u64, SocialUser> =
                    users.into_iter().map(|user| (user.xuid, user)).collect();
                self.perform_diff(&remote);
            }
            Err(e) => {
                error!(error = %e, "roster refresh failed");
            }
        }
    }

    /// Diffs a fetched roster against the current graph and enqueues the
    /// resulting synthetic events.
    ///
    /// Users missing locally become `UsersChanged`; users missing remotely
    /// (and followed) become `UsersRemoved`; everyone else is bucketed by
    /// what changed. Events land in a fixed order so the consumer observes
    /// additions before mutations of the same pass.
    pub(crate) fn perform_diff(&self, remote: &HashMap<u64, SocialUser>) {
        let mut state = self.state.lock().unwrap();

        let mut users_added: Vec<SocialUser> = Vec::new();
        let mut users_removed: Vec<u64> = Vec::new();
        let mut presence_changes: Vec<PresenceRecord> = Vec::new();
        let mut profile_changes: Vec<SocialUser> = Vec::new();
        let mut relationship_changes: Vec<SocialUser> = Vec::new();

        {
            let _priority = self.priority.lock().unwrap();
            let Some(store) = self.buffers.try_read_inactive() else {
                error!("diff skipped: inactive buffer unavailable");
                return;
            };
            *state = GraphState::Diff;

            for (xuid, remote_user) in remote {
                match store.get(*xuid) {
                    None => users_added.push(remote_user.clone()),
                    Some(previous) => {
                        let changes = SocialUser::diff(previous, remote_user);
                        if changes.presence {
                            presence_changes.push(remote_user.presence.clone());
                        }
                        if changes.profile {
                            profile_changes.push(remote_user.clone());
                        }
                        if changes.relationship {
                            relationship_changes.push(remote_user.clone());
                        }
                    }
                }
            }

            for user in store.users() {
                if !remote.contains_key(&user.xuid) && user.is_following_user {
                    users_removed.push(user.xuid);
                }
            }
        }

        debug!(
            added = users_added.len(),
            removed = users_removed.len(),
            presence = presence_changes.len(),
            profiles = profile_changes.len(),
            relationships = relationship_changes.len(),
            "reconciliation diff complete"
        );

        if !users_added.is_empty() {
            let requested = users_added.iter().map(|u| u.xuid_string()).collect();
            self.internal_events.push(InternalEvent::UsersChanged {
                users: users_added,
                requested,
                error: None,
                completion: None,
            });
        }
        if !users_removed.is_empty() {
            self.internal_events
                .push(InternalEvent::UsersRemoved { xuids: users_removed });
        }
        if !presence_changes.is_empty() {
            self.internal_events.push(InternalEvent::PresenceChanged {
                records: presence_changes,
            });
        }
        if !profile_changes.is_empty() {
            self.internal_events.push(InternalEvent::ProfilesChanged {
                users: profile_changes,
            });
        }
        if !relationship_changes.is_empty() {
            self.internal_events
                .push(InternalEvent::SocialRelationshipsChanged {
                    users: relationship_changes,
                });
        }

        *state = GraphState::Normal;
    }

    /// Issues the batched filtered roster fetch a social-refresh window
    /// produced, enqueueing the result (or its error) as `UsersChanged`.
    pub(crate) fn spawn_roster_fetch(
        self: &Arc<Self>,
        xuids: Vec<String>,
        completion: Option<TimerCompletionContext>,
    ) {
        if xuids.is_empty() && completion.is_none() {
            return;
        }
        let weak = Arc::downgrade(self);
        let peoplehub = self.peoplehub.clone();
        let local_user = self.local_user;
        let detail = self.detail_level;
        tokio::spawn(async move {
            let result = peoplehub
                .get_social_graph(local_user, detail, Some(xuids.clone()))
                .await;
            let Some(graph) = weak.upgrade() else { return };
            match result {
                Ok(users) => {
                    graph.internal_events.push(InternalEvent::UsersChanged {
                        users,
                        requested: xuids,
                        error: None,
                        completion,
                    });
                }
                Err(e) => {
                    graph.internal_events.push(InternalEvent::UsersChanged {
                        users: Vec::new(),
                        requested: xuids,
                        error: Some(e),
                        completion,
                    });
                }
            }
        });
    }

    /// Issues the batched presence fetch a presence window produced,
    /// enqueueing the result as `PresenceChanged`.
    pub(crate) fn spawn_presence_fetch(self: &Arc<Self>, xuids: Vec<String>) {
        if xuids.is_empty() {
            return;
        }
        let weak = Arc::downgrade(self);
        let presence = self.presence.clone();
        tokio::spawn(async move {
            let result = presence.get_presence_for_users(xuids).await;
            let Some(graph) = weak.upgrade() else { return };
            match result {
                Ok(records) => {
                    let mut state = graph.state.lock().unwrap();
                    *state = GraphState::Refresh;
                    graph
                        .internal_events
                        .push(InternalEvent::PresenceChanged { records });
                    *state = GraphState::Normal;
                }
                Err(e) => {
                    error!(error = %e, "presence record update failed");
                }
            }
        });
    }
}
