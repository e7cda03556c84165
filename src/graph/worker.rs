//! The graph worker: a single long-lived task draining the internal queue.

use std::sync::Arc;

use tracing::{debug, trace};

use super::{GraphInner, GraphState};

/// Spawns the worker loop.
///
/// The loop holds only a weak handle; once the graph is dropped the next
/// iteration fails to upgrade and the task exits.
pub(super) fn spawn(graph: &Arc<GraphInner>) {
    let weak = Arc::downgrade(graph);
    let shutdown = graph.shutdown.clone();
    let idle_sleep = graph.config.worker_idle_sleep;
    tokio::spawn(async move {
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            let worked = match weak.upgrade() {
                Some(graph) => graph.do_event_work(),
                None => break,
            };
            if worked {
                // Yield between iterations so a burst of events cannot
                // starve the runtime.
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(idle_sleep) => {}
                }
            }
        }
        debug!("event worker exiting");
    });
}

impl GraphInner {
    /// One worker iteration. Returns whether any work was done.
    ///
    /// Pending replays on the inactive buffer always drain before fresh
    /// events: a just-swapped replica must catch up before it diverges
    /// further.
    pub(super) fn do_event_work(self: &Arc<Self>) -> bool {
        let mut state = self.state.lock().unwrap();
        let initialized = self.is_initialized();
        let has_replays = initialized && !self.buffers.inactive_pending_empty();
        if has_replays {
            *state = GraphState::EventProcessing;
            let worked = self.process_replays();
            *state = GraphState::Normal;
            worked
        } else if initialized {
            *state = GraphState::Normal;
            self.process_events()
        } else {
            *state = GraphState::Normal;
            false
        }
    }

    /// Replays the inactive buffer's pending log onto it.
    ///
    /// Replayed events mutate state only: no user events, no timer fires,
    /// no subscription changes.
    fn process_replays(self: &Arc<Self>) -> bool {
        let _priority = self.priority.lock().unwrap();
        let Some(mut store) = self.buffers.try_write_inactive() else {
            // A consumer still holds the pre-swap snapshot of this replica.
            trace!("replay deferred: inactive buffer still observed");
            return false;
        };
        let replays = self.buffers.take_inactive_pending();
        let count = replays.len();
        for event in &replays {
            self.apply_event(&mut store, event, false);
        }
        trace!(count, "replayed pending events onto swapped buffer");
        true
    }

    /// Applies up to `events_per_frame` fresh events from the internal
    /// queue.
    ///
    /// The cap keeps each iteration short so the consumer-side `do_work`
    /// sees bounded application latency; each applied event is also
    /// recorded for replay on the other buffer after the next swap.
    fn process_events(self: &Arc<Self>) -> bool {
        let _priority = self.priority.lock().unwrap();
        let Some(mut store) = self.buffers.try_write_inactive() else {
            trace!("event application deferred: inactive buffer still observed");
            return false;
        };
        let mut applied = false;
        for _ in 0..self.config.events_per_frame {
            let Some(event) = self.internal_events.pop() else { break };
            trace!(kind = event.kind_name(), "applying internal event");
            self.apply_event(&mut store, &event, true);
            self.buffers.record_event(event);
            applied = true;
        }
        applied
    }
}
