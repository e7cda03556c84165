//! The user-visible event queue drained by the consumer each frame.

use std::sync::Mutex;

use crate::error::SocialError;

/// Kind of user-visible roster delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocialEventKind {
    /// New accounts entered the graph.
    UsersAddedToGraph,
    /// Accounts left the graph.
    UsersRemovedFromGraph,
    /// Presence changed for accounts already in the graph.
    PresenceChanged,
    /// Profile fields changed for accounts already in the graph.
    ProfilesChanged,
    /// Follow/favorite flags changed for accounts already in the graph.
    SocialRelationshipsChanged,
}

/// One user-visible roster delta.
///
/// Affected users are carried as decimal xuid strings for consumer API
/// stability.
#[derive(Debug, Clone)]
pub struct SocialEvent {
    /// The local user whose graph this event belongs to.
    pub local_user: u64,
    /// What happened.
    pub kind: SocialEventKind,
    /// Which accounts it happened to.
    pub affected_xuids: Vec<String>,
    /// Failure attached to the batch, if any.
    pub error: Option<SocialError>,
}

/// Read lifecycle of the queue, visible for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventQueueState {
    /// Nothing buffered.
    Clear,
    /// Events buffered and not yet handed out.
    ReadyToRead,
    /// Events handed out via `list` but not yet cleared.
    Read,
}

struct EventQueueInner {
    events: Vec<SocialEvent>,
    state: EventQueueState,
}

/// Thread-safe, ordered queue of user-visible events.
///
/// `list` hands the buffered events out without clearing; the owner clears
/// explicitly once the consumer has copied them. This keeps the
/// hand-out/reset decision in `do_work`, the only place that knows when the
/// consumer is done.
pub struct EventQueue {
    local_user: u64,
    inner: Mutex<EventQueueInner>,
}

impl EventQueue {
    /// Creates an empty queue for one local user's graph.
    pub fn new(local_user: u64) -> Self {
        Self {
            local_user,
            inner: Mutex::new(EventQueueInner {
                events: Vec::new(),
                state: EventQueueState::Clear,
            }),
        }
    }

    /// Buffers a user-visible event.
    ///
    /// A `None` kind means the applied internal event produced no
    /// user-visible delta; it is filtered here so apply sites can pass
    /// their outcome through unconditionally.
    pub fn push(
        &self,
        kind: Option<SocialEventKind>,
        affected_xuids: Vec<String>,
        error: Option<SocialError>,
    ) {
        let Some(kind) = kind else { return };
        let mut inner = self.inner.lock().unwrap();
        inner.events.push(SocialEvent {
            local_user: self.local_user,
            kind,
            affected_xuids,
            error,
        });
        inner.state = EventQueueState::ReadyToRead;
    }

    /// Returns the buffered events and marks the queue read.
    ///
    /// Does not clear; see [`EventQueue::clear`].
    pub fn list(&self) -> Vec<SocialEvent> {
        let mut inner = self.inner.lock().unwrap();
        inner.state = EventQueueState::Read;
        inner.events.clone()
    }

    /// Empties the queue.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.events.clear();
        inner.state = EventQueueState::Clear;
    }

    /// Point-in-time emptiness check.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().events.is_empty()
    }

    /// Current read-lifecycle state.
    pub fn state(&self) -> EventQueueState {
        self.inner.lock().unwrap().state
    }
}
