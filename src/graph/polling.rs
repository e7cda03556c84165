//! Opt-in rich-presence polling.
//!
//! When enabled, a recurring task fires the presence-polling timer with the
//! full current user set every window, triggering a batch presence fetch.
//! Disabling sets a cancel flag the next tick observes; re-enabling starts
//! a fresh loop from a clean flag.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, info};

use super::{GraphInner, GraphState};

impl GraphInner {
    pub(super) fn enable_rich_presence_polling(self: &Arc<Self>, enable: bool) {
        let was_polling = self.polling_enabled.swap(enable, Ordering::SeqCst);
        if enable && !was_polling {
            self.polling_cancel.store(false, Ordering::SeqCst);
            self.spawn_polling_loop();
            info!("rich presence polling enabled");
        } else if !enable && was_polling {
            self.polling_cancel.store(true, Ordering::SeqCst);
            info!("rich presence polling disabled");
        }
    }

    fn spawn_polling_loop(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        let window = self.config.call_buffer_window;
        tokio::spawn(async move {
            loop {
                {
                    let Some(graph) = weak.upgrade() else { break };
                    if graph.polling_cancel.load(Ordering::SeqCst) {
                        break;
                    }
                    graph.poll_presence_tick();
                }
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(window) => {}
                }
            }
            debug!("rich presence polling loop exiting");
        });
    }

    /// Fires the polling timer with every populated user currently in the
    /// graph.
    fn poll_presence_tick(&self) {
        let mut state = self.state.lock().unwrap();
        let _priority = self.priority.lock().unwrap();
        let Some(store) = self.buffers.try_read_inactive() else {
            return;
        };
        *state = GraphState::Refresh;
        let users: Vec<String> = store
            .populated_xuids()
            .iter()
            .map(|xuid| xuid.to_string())
            .collect();
        drop(store);

        if let Some(timers) = self.timers.get() {
            timers.presence_polling.fire(users);
        }
        *state = GraphState::Normal;
    }
}
