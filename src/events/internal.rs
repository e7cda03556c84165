//! Internal events and the FIFO feeding the graph worker.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::error::SocialError;
use crate::model::{PresenceRecord, SocialUser};
use crate::transport::{DevicePresenceArgs, TitlePresenceArgs};

/// One-shot completion notification for a batched add request.
///
/// The signal travels inside internal events, which are cloned into the
/// pending-replay log and re-applied after a buffer swap. Completion is
/// therefore consume-once: the first `complete` wins and replayed copies
/// no-op.
#[derive(Clone)]
pub struct CompletionSignal {
    tx: Arc<Mutex<Option<oneshot::Sender<Result<(), SocialError>>>>>,
}

impl CompletionSignal {
    /// Creates a signal and the receiver that observes it.
    pub fn new() -> (Self, oneshot::Receiver<Result<(), SocialError>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Creates a signal nobody is waiting on.
    ///
    /// Used for adds originating from the push channel rather than a caller.
    pub fn detached() -> Self {
        Self {
            tx: Arc::new(Mutex::new(None)),
        }
    }

    /// Resolves the signal. Subsequent calls are no-ops.
    pub fn complete(&self, result: Result<(), SocialError>) {
        let sender = self.tx.lock().unwrap().take();
        if let Some(sender) = sender {
            // The receiver may already be gone; that is fine.
            let _ = sender.send(result);
        }
    }
}

impl fmt::Debug for CompletionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending = self.tx.lock().unwrap().is_some();
        f.debug_struct("CompletionSignal")
            .field("pending", &pending)
            .finish()
    }
}

/// Context tying a batched roster fetch back to the add request that
/// triggered it.
#[derive(Debug, Clone)]
pub struct TimerCompletionContext {
    /// Monotonic id of the add request, for logging.
    pub context_id: u64,
    /// How many new users the add request expects the fetch to return.
    pub num_expected: usize,
    /// Signal resolved when the batch lands.
    pub signal: CompletionSignal,
}

/// Raw input awaiting application to the graph.
#[derive(Debug, Clone)]
pub enum InternalEvent {
    /// Caller or push channel asked to add identifiers; they may already be
    /// in the graph.
    UsersAdded {
        /// Decimal xuid strings to add.
        xuids: Vec<String>,
        /// Resolved when the batch fully lands (or immediately when every
        /// identifier was already present).
        signal: CompletionSignal,
    },
    /// Fresh profile data arrived from the roster service.
    UsersChanged {
        /// Fetched records; empty when the fetch failed.
        users: Vec<SocialUser>,
        /// The identifiers the fetch was issued for.
        requested: Vec<String>,
        /// Fetch failure, if any.
        error: Option<SocialError>,
        /// Present when the fetch was triggered by an add request.
        completion: Option<TimerCompletionContext>,
    },
    /// Caller or push channel asked to drop identifiers.
    UsersRemoved {
        /// Parsed xuids to release.
        xuids: Vec<u64>,
    },
    /// A user signed in or out on a device.
    DevicePresenceChanged(DevicePresenceArgs),
    /// A user started or ended a title session.
    TitlePresenceChanged(TitlePresenceArgs),
    /// Batch presence results from a poll or refresh.
    PresenceChanged {
        /// Fetched records, compared semantically on apply.
        records: Vec<PresenceRecord>,
    },
    /// Reconciliation found profile fields changed.
    ProfilesChanged {
        /// Replacement records.
        users: Vec<SocialUser>,
    },
    /// Reconciliation found follow/favorite flags changed.
    SocialRelationshipsChanged {
        /// Replacement records.
        users: Vec<SocialUser>,
    },
    /// Unrecognized input; ignored with a log.
    Unknown,
}

impl InternalEvent {
    /// Short name for logging.
    pub fn kind_name(&self) -> &'static str {
        match self {
            InternalEvent::UsersAdded { .. } => "users_added",
            InternalEvent::UsersChanged { .. } => "users_changed",
            InternalEvent::UsersRemoved { .. } => "users_removed",
            InternalEvent::DevicePresenceChanged(_) => "device_presence_changed",
            InternalEvent::TitlePresenceChanged(_) => "title_presence_changed",
            InternalEvent::PresenceChanged { .. } => "presence_changed",
            InternalEvent::ProfilesChanged { .. } => "profiles_changed",
            InternalEvent::SocialRelationshipsChanged { .. } => "social_relationships_changed",
            InternalEvent::Unknown => "unknown",
        }
    }
}

/// Thread-safe FIFO of internal events.
///
/// Producers are the consumer-facing API, timer callbacks, and the push
/// listener; the only consumer is the graph worker.
#[derive(Default)]
pub struct InternalEventQueue {
    queue: Mutex<VecDeque<InternalEvent>>,
}

impl InternalEventQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event.
    pub fn push(&self, event: InternalEvent) {
        self.queue.lock().unwrap().push_back(event);
    }

    /// Removes and returns the oldest event.
    pub fn pop(&self) -> Option<InternalEvent> {
        self.queue.lock().unwrap().pop_front()
    }

    /// Point-in-time emptiness check.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_is_fifo() {
        let queue = InternalEventQueue::new();
        queue.push(InternalEvent::UsersRemoved { xuids: vec![1] });
        queue.push(InternalEvent::UsersRemoved { xuids: vec![2] });

        match queue.pop() {
            Some(InternalEvent::UsersRemoved { xuids }) => assert_eq!(xuids, vec![1]),
            other => panic!("unexpected event: {other:?}"),
        }
        match queue.pop() {
            Some(InternalEvent::UsersRemoved { xuids }) => assert_eq!(xuids, vec![2]),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_completion_signal_resolves_once() {
        let (signal, rx) = CompletionSignal::new();
        let replayed_copy = signal.clone();

        signal.complete(Ok(()));
        // A replayed event completing again must not panic or override.
        replayed_copy.complete(Err(SocialError::Runtime("late".to_string())));

        let result = rx.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_completion_signal_carries_error() {
        let (signal, rx) = CompletionSignal::new();
        signal.complete(Err(SocialError::Network("boom".to_string())));
        let result = rx.await.unwrap();
        assert!(matches!(result, Err(SocialError::Network(_))));
    }

    #[test]
    fn test_detached_signal_is_silent() {
        let signal = CompletionSignal::detached();
        signal.complete(Ok(()));
    }

    #[test]
    fn test_kind_names() {
        let evt = InternalEvent::PresenceChanged { records: vec![] };
        assert_eq!(evt.kind_name(), "presence_changed");
        assert_eq!(InternalEvent::Unknown.kind_name(), "unknown");
    }
}
