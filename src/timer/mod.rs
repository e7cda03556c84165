//! Call-buffer timer: coalesces bursts of per-user requests into one
//! batched call per window.
//!
//! Remote services charge per call, not per user, so the graph never issues
//! a roster or presence fetch directly. It fires a [`CallBufferTimer`]
//! instead: the first fire within a window arms the timer, further fires
//! merge their key sets, and when the window elapses the installed handler
//! runs exactly once with the union of keys and the most recent completion
//! context.
//!
//! ```text
//! fire(["1"]) ──┐
//! fire(["2"]) ──┼── window ──► handler(["1", "2", "3"], latest ctx)
//! fire(["3"]) ──┘
//! ```
//!
//! Handlers hold non-owning references back to the graph and no-op once it
//! is gone; cancelling the token drops any pending invocation without
//! running the handler.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::events::TimerCompletionContext;

/// Handler invoked once per window with the merged key set.
pub type TimerHandler =
    Arc<dyn Fn(Vec<String>, Option<TimerCompletionContext>) + Send + Sync>;

struct PendingCall {
    keys: Vec<String>,
    completion: Option<TimerCompletionContext>,
    armed: bool,
}

struct TimerInner {
    window: Duration,
    handler: TimerHandler,
    pending: Mutex<PendingCall>,
    cancel: CancellationToken,
}

/// Coalescing timer for batched remote calls.
#[derive(Clone)]
pub struct CallBufferTimer {
    inner: Arc<TimerInner>,
}

impl CallBufferTimer {
    /// Creates a timer with the given window, cancellation scope, and
    /// handler.
    ///
    /// A zero window fires on the next scheduler tick, which test
    /// configurations use to make batching immediate.
    pub fn new(window: Duration, cancel: CancellationToken, handler: TimerHandler) -> Self {
        Self {
            inner: Arc::new(TimerInner {
                window,
                handler,
                pending: Mutex::new(PendingCall {
                    keys: Vec::new(),
                    completion: None,
                    armed: false,
                }),
                cancel,
            }),
        }
    }

    /// Schedules a batched call for the given keys.
    pub fn fire(&self, keys: Vec<String>) {
        self.fire_with_context(keys, None);
    }

    /// Schedules a batched call, attaching a completion context.
    ///
    /// Repeated fires within one window merge key sets (set union) and keep
    /// the most recent context.
    pub fn fire_with_context(
        &self,
        keys: Vec<String>,
        completion: Option<TimerCompletionContext>,
    ) {
        let should_arm = {
            let mut pending = self.inner.pending.lock().unwrap();
            for key in keys {
                if !pending.keys.contains(&key) {
                    pending.keys.push(key);
                }
            }
            if completion.is_some() {
                pending.completion = completion;
            }
            if pending.armed {
                trace!(merged = pending.keys.len(), "merged fire into armed window");
                false
            } else {
                pending.armed = true;
                true
            }
        };

        if should_arm {
            self.spawn_window(self.inner.clone());
        }
    }

    fn spawn_window(&self, inner: Arc<TimerInner>) {
        tokio::spawn(async move {
            tokio::select! {
                _ = inner.cancel.cancelled() => {
                    trace!("window cancelled before invocation");
                    return;
                }
                _ = tokio::time::sleep(inner.window) => {}
            }

            let (keys, completion) = {
                let mut pending = inner.pending.lock().unwrap();
                pending.armed = false;
                (
                    std::mem::take(&mut pending.keys),
                    pending.completion.take(),
                )
            };

            debug!(keys = keys.len(), "call buffer window elapsed");
            (inner.handler)(keys, completion);
        });
    }

    /// Cancels this timer's scope, dropping any pending invocation.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    use crate::events::CompletionSignal;

    type Invocations = Arc<Mutex<Vec<(Vec<String>, Option<u64>)>>>;

    fn recording_timer(window: Duration) -> (CallBufferTimer, Invocations, Arc<AtomicUsize>) {
        let invocations: Invocations = Arc::new(Mutex::new(Vec::new()));
        let count = Arc::new(AtomicUsize::new(0));
        let inv = invocations.clone();
        let cnt = count.clone();
        let timer = CallBufferTimer::new(
            window,
            CancellationToken::new(),
            Arc::new(move |keys, ctx| {
                cnt.fetch_add(1, Ordering::SeqCst);
                inv.lock().unwrap().push((keys, ctx.map(|c| c.context_id)));
            }),
        );
        (timer, invocations, count)
    }

    #[tokio::test]
    async fn test_single_fire_invokes_once() {
        let (timer, invocations, count) = recording_timer(Duration::from_millis(10));
        timer.fire(vec!["1".to_string()]);

        sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(invocations.lock().unwrap()[0].0, vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn test_fires_within_window_merge_to_union() {
        let (timer, invocations, count) = recording_timer(Duration::from_millis(50));
        timer.fire(vec!["1".to_string(), "2".to_string()]);
        timer.fire(vec!["2".to_string(), "3".to_string()]);
        timer.fire(vec!["1".to_string()]);

        sleep(Duration::from_millis(120)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        let keys = &invocations.lock().unwrap()[0].0;
        assert_eq!(
            keys,
            &vec!["1".to_string(), "2".to_string(), "3".to_string()]
        );
    }

    #[tokio::test]
    async fn test_latest_completion_context_wins() {
        let (timer, invocations, _) = recording_timer(Duration::from_millis(30));
        let first = TimerCompletionContext {
            context_id: 1,
            num_expected: 1,
            signal: CompletionSignal::detached(),
        };
        let second = TimerCompletionContext {
            context_id: 2,
            num_expected: 1,
            signal: CompletionSignal::detached(),
        };
        timer.fire_with_context(vec!["1".to_string()], Some(first));
        timer.fire_with_context(vec!["2".to_string()], Some(second));

        sleep(Duration::from_millis(80)).await;
        assert_eq!(invocations.lock().unwrap()[0].1, Some(2));
    }

    #[tokio::test]
    async fn test_separate_windows_invoke_separately() {
        let (timer, _, count) = recording_timer(Duration::from_millis(10));
        timer.fire(vec!["1".to_string()]);
        sleep(Duration::from_millis(40)).await;
        timer.fire(vec!["2".to_string()]);
        sleep(Duration::from_millis(40)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancellation_drops_pending_invocation() {
        let (timer, _, count) = recording_timer(Duration::from_millis(50));
        timer.fire(vec!["1".to_string()]);
        timer.cancel();

        sleep(Duration::from_millis(120)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_key_set_still_invokes() {
        // The resync path uses the timer as an opaque debounce trigger.
        let (timer, invocations, count) = recording_timer(Duration::from_millis(10));
        timer.fire(Vec::new());

        sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(invocations.lock().unwrap()[0].0.is_empty());
    }
}
