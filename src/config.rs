//! Runtime configuration for the social graph replica.

use std::time::Duration;

/// Default coalescing window for call-buffer timers.
///
/// Bursts of per-user requests (add, refresh, presence) arriving within one
/// window are merged into a single batched remote call.
pub const DEFAULT_CALL_BUFFER_WINDOW: Duration = Duration::from_secs(30);

/// Default interval between full-roster reconciliation passes.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(20 * 60);

/// Default cap on internal events applied per worker iteration.
///
/// Keeps the worker yielding promptly so the consumer-side `do_work` sees a
/// bounded application latency per internal event.
pub const DEFAULT_EVENTS_PER_FRAME: usize = 5;

/// Default sleep between worker iterations when no work was found.
pub const DEFAULT_WORKER_IDLE_SLEEP: Duration = Duration::from_millis(30);

/// Extra user slots allocated beyond the initial roster size.
///
/// Gives some wiggle room with the allocation; this many users can be added
/// to the graph before the slot store grows.
pub const FREE_SLOT_HEADROOM: usize = 5;

/// Configuration for a [`SocialGraph`](crate::graph::SocialGraph).
#[derive(Clone, Debug)]
pub struct GraphConfig {
    /// Coalescing window for call-buffer timers.
    ///
    /// Production uses [`DEFAULT_CALL_BUFFER_WINDOW`]; tests typically use
    /// [`Duration::ZERO`] so batched calls fire immediately.
    pub call_buffer_window: Duration,

    /// Interval between periodic full-roster reconciliation passes.
    pub refresh_interval: Duration,

    /// Maximum internal events applied per worker iteration.
    pub events_per_frame: usize,

    /// Worker sleep when an iteration found no work.
    pub worker_idle_sleep: Duration,

    /// Extra user slots kept free beyond the current roster size.
    pub free_slot_headroom: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            call_buffer_window: DEFAULT_CALL_BUFFER_WINDOW,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            events_per_frame: DEFAULT_EVENTS_PER_FRAME,
            worker_idle_sleep: DEFAULT_WORKER_IDLE_SLEEP,
            free_slot_headroom: FREE_SLOT_HEADROOM,
        }
    }
}

impl GraphConfig {
    /// Sets the call-buffer coalescing window.
    pub fn with_call_buffer_window(mut self, window: Duration) -> Self {
        self.call_buffer_window = window;
        self
    }

    /// Sets the reconciliation interval.
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Sets the per-iteration event cap.
    pub fn with_events_per_frame(mut self, cap: usize) -> Self {
        self.events_per_frame = cap;
        self
    }

    /// Sets the worker idle sleep.
    pub fn with_worker_idle_sleep(mut self, sleep: Duration) -> Self {
        self.worker_idle_sleep = sleep;
        self
    }
}
