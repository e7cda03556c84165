//! The graph core: consumer facade, state machine, and orchestration.
//!
//! # Architecture
//!
//! ```text
//!  pushes ──► listener ──┐
//!  polls  ──► timers  ───┼──► InternalEventQueue ──► worker ──► inactive buffer
//!  caller ──► add/remove┘                              │             │ record
//!                                                      ▼             ▼
//!                                                 EventQueue    pending log
//!                                                      │             │ replay
//!  consumer ◄── do_work: swap + snapshot + events ◄────┴─────────────┘
//! ```
//!
//! The worker applies internal events to the inactive buffer and records
//! them into the active buffer's pending log; `do_work`, on the consumer's
//! thread, swaps buffers when safe and hands out the accumulated
//! user-visible events together with a snapshot of the now-active replica.

mod apply;
mod polling;
mod reconcile;
mod worker;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::{GraphSnapshot, UserBufferPair};
use crate::config::GraphConfig;
use crate::error::SocialError;
use crate::events::{
    CompletionSignal, EventQueue, InternalEvent, InternalEventQueue, SocialEvent,
    SocialEventKind,
};
use crate::model::{parse_xuid, DetailLevel, TitlePresenceState};
use crate::subscriptions::SubscriptionRegistry;
use crate::timer::CallBufferTimer;
use crate::transport::{
    ConnectionState, PeopleHubClient, PresenceClient, RealTimeTransport,
    RelationshipNotification, TransportEvent,
};

/// Processing state of the graph.
///
/// Only `Normal` permits a buffer swap; every other state marks a writer
/// mid-apply on the inactive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    /// No writer active.
    Normal,
    /// The worker is applying or replaying events.
    EventProcessing,
    /// A refresh pass is collecting or landing data.
    Refresh,
    /// A reconciliation diff is running.
    Diff,
}

/// Result of one consumer-side [`SocialGraph::do_work`] call.
pub struct WorkResult {
    /// Point-in-time view of the active graph replica. Valid until the
    /// consumer's next `do_work`.
    pub snapshot: GraphSnapshot,
    /// User-visible deltas accumulated since the previous call, in order.
    pub events: Vec<SocialEvent>,
}

/// Callback invoked once graph teardown completes.
pub type DestructionCallback = Box<dyn FnOnce() + Send>;

/// Four independent coalescing timers driving batched remote calls.
///
/// The presence-refresh and presence-polling timers share a handler but are
/// deliberately separate so push-driven refresh and opt-in polling debounce
/// independently.
pub(crate) struct GraphTimers {
    pub(crate) presence_refresh: CallBufferTimer,
    pub(crate) presence_polling: CallBufferTimer,
    pub(crate) social_refresh: CallBufferTimer,
    pub(crate) resync: CallBufferTimer,
}

/// A live social-graph replica for one local user.
///
/// Created uninitialized; [`SocialGraph::initialize`] fetches the roster,
/// establishes subscriptions, and starts the worker. Dropping the graph
/// deactivates the transport, cancels all background tasks, and invokes the
/// destruction callback.
pub struct SocialGraph {
    inner: Arc<GraphInner>,
    on_destroyed: Mutex<Option<DestructionCallback>>,
}

pub(crate) struct GraphInner {
    pub(crate) local_user: u64,
    pub(crate) title_id: u32,
    pub(crate) detail_level: DetailLevel,
    pub(crate) config: GraphConfig,
    pub(crate) peoplehub: Arc<dyn PeopleHubClient>,
    pub(crate) presence: Arc<dyn PresenceClient>,
    pub(crate) transport: Arc<dyn RealTimeTransport>,
    /// State lock: serializes state transitions and swap decisions.
    pub(crate) state: Mutex<GraphState>,
    /// Priority lock: held by the consumer's `do_work` and by the worker
    /// around buffer mutation, so a swap never happens mid-apply.
    pub(crate) priority: Mutex<()>,
    pub(crate) initialized: AtomicBool,
    pub(crate) was_disconnected: AtomicBool,
    pub(crate) polling_enabled: AtomicBool,
    pub(crate) polling_cancel: AtomicBool,
    pub(crate) next_add_context: AtomicU64,
    pub(crate) buffers: UserBufferPair,
    pub(crate) internal_events: InternalEventQueue,
    pub(crate) social_events: EventQueue,
    pub(crate) subscriptions: SubscriptionRegistry,
    pub(crate) timers: OnceLock<GraphTimers>,
    pub(crate) shutdown: CancellationToken,
}

impl SocialGraph {
    /// Creates an uninitialized graph for one local user.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local_user: u64,
        title_id: u32,
        detail_level: DetailLevel,
        config: GraphConfig,
        peoplehub: Arc<dyn PeopleHubClient>,
        presence: Arc<dyn PresenceClient>,
        transport: Arc<dyn RealTimeTransport>,
        on_destroyed: Option<DestructionCallback>,
    ) -> Self {
        let inner = Arc::new(GraphInner {
            local_user,
            title_id,
            detail_level,
            buffers: UserBufferPair::new(config.free_slot_headroom),
            config,
            peoplehub,
            presence: presence.clone(),
            transport,
            state: Mutex::new(GraphState::Normal),
            priority: Mutex::new(()),
            initialized: AtomicBool::new(false),
            was_disconnected: AtomicBool::new(false),
            polling_enabled: AtomicBool::new(false),
            polling_cancel: AtomicBool::new(false),
            next_add_context: AtomicU64::new(0),
            internal_events: InternalEventQueue::new(),
            social_events: EventQueue::new(local_user),
            subscriptions: SubscriptionRegistry::new(presence, title_id),
            timers: OnceLock::new(),
            shutdown: CancellationToken::new(),
        });
        debug!(local_user, "social graph created");
        Self {
            inner,
            on_destroyed: Mutex::new(on_destroyed),
        }
    }

    /// Fetches the initial roster, establishes subscriptions, and starts
    /// the worker.
    ///
    /// A `424 Failed Dependency` roster response is accepted and yields an
    /// empty graph. Any other error leaves the graph uninitialized.
    pub async fn initialize(&self) -> Result<(), SocialError> {
        GraphInner::initialize(&self.inner).await
    }

    /// Enqueues a request to add identifiers to the graph.
    ///
    /// The returned receiver resolves when the batched lookup lands, or
    /// immediately when every identifier was already present.
    pub fn add_users(&self, xuids: Vec<String>) -> oneshot::Receiver<Result<(), SocialError>> {
        let (signal, receiver) = CompletionSignal::new();
        self.inner
            .internal_events
            .push(InternalEvent::UsersAdded { xuids, signal });
        receiver
    }

    /// Enqueues a request to drop identifiers from the graph.
    pub fn remove_users(&self, xuids: Vec<u64>) {
        self.inner
            .internal_events
            .push(InternalEvent::UsersRemoved { xuids });
    }

    /// Consumer entry point, called on the consumer's cadence (typically
    /// once per frame).
    ///
    /// Swaps buffers when safe, then returns a snapshot of the active
    /// replica together with the user-visible events accumulated since the
    /// previous call.
    pub fn do_work(&self) -> WorkResult {
        self.inner.do_work()
    }

    /// Read-only view of the active replica, for diagnostics.
    pub fn active_buffer_social_graph(&self) -> GraphSnapshot {
        let _priority = self.inner.priority.lock().unwrap();
        self.inner.buffers.snapshot_active()
    }

    /// Turns periodic batch presence polling on or off.
    pub fn enable_rich_presence_polling(&self, enable: bool) {
        self.inner.enable_rich_presence_polling(enable);
    }

    /// Whether initialization completed.
    pub fn is_initialized(&self) -> bool {
        self.inner.is_initialized()
    }

    /// Whether both buffers' pending-replay logs are empty.
    pub fn are_events_empty(&self) -> bool {
        self.inner.buffers.pending_all_empty()
    }

    /// Title this graph subscribes title-presence for.
    pub fn title_id(&self) -> u32 {
        self.inner.title_id
    }
}

impl Drop for SocialGraph {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
        self.inner.transport.deactivate();
        if let Some(callback) = self.on_destroyed.lock().unwrap().take() {
            callback();
        }
        debug!(local_user = self.inner.local_user, "social graph destroyed");
    }
}

impl GraphInner {
    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub(crate) async fn initialize(self: &Arc<Self>) -> Result<(), SocialError> {
        self.install_timers();
        self.setup_transport();
        self.spawn_refresh_loop();
        worker::spawn(self);

        let roster = match self
            .peoplehub
            .get_social_graph(self.local_user, self.detail_level, None)
            .await
        {
            Ok(users) => users,
            Err(SocialError::FailedDependency(detail)) => {
                // Acceptable during initialization: the user simply has no
                // roster yet.
                debug!(detail, "roster service reported no dependencies; starting empty");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        self.buffers
            .initialize(&roster, self.config.free_slot_headroom)
            .await;

        let xuids: Vec<u64> = roster.iter().map(|u| u.xuid).collect();
        if !xuids.is_empty() {
            self.subscriptions.subscribe_many(&xuids).map_err(|_| {
                SocialError::Runtime("subscription initialization failed".to_string())
            })?;
        }

        self.initialized.store(true, Ordering::SeqCst);
        if !roster.is_empty() {
            self.social_events.push(
                Some(SocialEventKind::UsersAddedToGraph),
                roster.iter().map(|u| u.xuid_string()).collect(),
                None,
            );
        }
        info!(users = roster.len(), "social graph initialized");
        Ok(())
    }

    pub(crate) fn do_work(&self) -> WorkResult {
        let state = self.state.lock().unwrap();
        let _priority = self.priority.lock().unwrap();

        if *state == GraphState::Normal && self.buffers.inactive_pending_empty() {
            self.buffers.swap();
        }
        let snapshot = self.buffers.snapshot_active();

        let events = if *state == GraphState::Normal && !self.social_events.is_empty() {
            let events = self.social_events.list();
            self.social_events.clear();
            events
        } else {
            Vec::new()
        };

        WorkResult { snapshot, events }
    }

    /// Activates the push transport, subscribes the relationship channel,
    /// and starts the listener task.
    fn setup_transport(self: &Arc<Self>) {
        self.transport.activate();
        if let Err(e) = self
            .transport
            .subscribe_social_relationship_change(self.local_user)
        {
            error!(error = %e, "social relationship subscription failed");
        }

        let mut events = self.transport.events();
        let weak = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = events.recv() => match received {
                        Ok(event) => {
                            let Some(graph) = weak.upgrade() else { break };
                            graph.dispatch_transport_event(event);
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "push listener lagged; pushes were dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
            debug!("push listener exiting");
        });
    }

    fn install_timers(self: &Arc<Self>) {
        let window = self.config.call_buffer_window;
        let weak = Arc::downgrade(self);

        let presence_refresh = CallBufferTimer::new(window, self.shutdown.child_token(), {
            let weak = weak.clone();
            Arc::new(move |keys, _ctx| {
                if let Some(graph) = weak.upgrade() {
                    graph.spawn_presence_fetch(keys);
                }
            })
        });
        // Same handler shape as the refresh timer, but a separate instance
        // so polling debounces independently from push-driven refresh.
        let presence_polling = CallBufferTimer::new(window, self.shutdown.child_token(), {
            let weak = weak.clone();
            Arc::new(move |keys, _ctx| {
                if let Some(graph) = weak.upgrade() {
                    graph.spawn_presence_fetch(keys);
                }
            })
        });
        let social_refresh = CallBufferTimer::new(window, self.shutdown.child_token(), {
            let weak = weak.clone();
            Arc::new(move |keys, ctx| {
                if let Some(graph) = weak.upgrade() {
                    graph.spawn_roster_fetch(keys, ctx);
                }
            })
        });
        let resync = CallBufferTimer::new(window, self.shutdown.child_token(), {
            let weak = weak.clone();
            Arc::new(move |_keys, _ctx| {
                if let Some(graph) = weak.upgrade() {
                    tokio::spawn(async move { graph.refresh_graph().await });
                }
            })
        });

        let _ = self.timers.set(GraphTimers {
            presence_refresh,
            presence_polling,
            social_refresh,
            resync,
        });
    }

    fn spawn_refresh_loop(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        let interval = self.config.refresh_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                let Some(graph) = weak.upgrade() else { break };
                graph.refresh_graph().await;
            }
            debug!("periodic refresh loop exiting");
        });
    }

    fn dispatch_transport_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::DevicePresenceChanged(args) => {
                if parse_xuid(&args.xuid).is_none() {
                    error!(xuid = %args.xuid, "invalid user in device presence push");
                    return;
                }
                self.internal_events
                    .push(InternalEvent::DevicePresenceChanged(args));
            }
            TransportEvent::TitlePresenceChanged(args) => {
                if parse_xuid(&args.xuid).is_none() {
                    error!(xuid = %args.xuid, "invalid user in title presence push");
                    return;
                }
                if args.state == TitlePresenceState::Started {
                    // A freshly started title means stale rich presence;
                    // batch a full presence pull instead of patching.
                    if let Some(timers) = self.timers.get() {
                        timers.presence_refresh.fire(vec![args.xuid]);
                    }
                } else {
                    self.internal_events
                        .push(InternalEvent::TitlePresenceChanged(args));
                }
            }
            TransportEvent::SocialRelationshipChanged(args) => match args.notification {
                RelationshipNotification::Added => {
                    self.internal_events.push(InternalEvent::UsersAdded {
                        xuids: args.xuids,
                        signal: CompletionSignal::detached(),
                    });
                }
                RelationshipNotification::Changed => {
                    if let Some(timers) = self.timers.get() {
                        timers.social_refresh.fire(args.xuids);
                    }
                }
                RelationshipNotification::Removed => {
                    let mut xuids = Vec::with_capacity(args.xuids.len());
                    for raw in &args.xuids {
                        match parse_xuid(raw) {
                            Some(xuid) => xuids.push(xuid),
                            None => {
                                error!(xuid = %raw, "invalid user in relationship removal push");
                            }
                        }
                    }
                    if !xuids.is_empty() {
                        self.internal_events
                            .push(InternalEvent::UsersRemoved { xuids });
                    }
                }
            },
            TransportEvent::Resync => {
                // Opaque debounce trigger: one refresh per window no matter
                // how many resyncs arrive.
                if let Some(timers) = self.timers.get() {
                    timers.resync.fire(Vec::new());
                }
            }
            TransportEvent::ConnectionStateChanged(state) => {
                self.handle_connection_state_change(state);
            }
            TransportEvent::SubscriptionError(args) => {
                error!(detail = %args.detail, "real-time subscription error");
            }
        }
    }

    fn handle_connection_state_change(self: &Arc<Self>, state: ConnectionState) {
        match state {
            ConnectionState::Disconnected => {
                self.was_disconnected.store(true, Ordering::SeqCst);
                warn!("push transport disconnected");
            }
            ConnectionState::Connected => {
                if !self.was_disconnected.swap(false, Ordering::SeqCst) {
                    return;
                }
                info!("push transport reconnected; re-establishing subscriptions");
                self.transport.activate();
                if let Err(e) = self
                    .transport
                    .subscribe_social_relationship_change(self.local_user)
                {
                    error!(error = %e, "social relationship re-subscription failed");
                }
                let xuids = self.collect_populated_xuids();
                if !xuids.is_empty() {
                    let graph = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = graph.subscriptions.subscribe_many(&xuids) {
                            error!(error = %e, "presence re-subscription failed");
                        }
                    });
                }
            }
        }
    }

    fn collect_populated_xuids(&self) -> Vec<u64> {
        let _state = self.state.lock().unwrap();
        let _priority = self.priority.lock().unwrap();
        match self.buffers.try_read_inactive() {
            Some(store) => store.populated_xuids(),
            None => Vec::new(),
        }
    }

    /// Establishes presence subscriptions off the apply path.
    pub(crate) fn spawn_subscribe(self: &Arc<Self>, xuids: Vec<u64>) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let Some(graph) = weak.upgrade() else { return };
            if let Err(e) = graph.subscriptions.subscribe_many(&xuids) {
                error!(error = %e, "presence subscription failed");
            }
        });
    }

    /// Tears down presence subscriptions off the apply path.
    pub(crate) fn spawn_unsubscribe(self: &Arc<Self>, xuids: Vec<u64>) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let Some(graph) = weak.upgrade() else { return };
            graph.subscriptions.unsubscribe_many(&xuids);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PresenceRecord;
    use crate::transport::{ClientFuture, SubscriptionHandle};

    struct NullPeopleHub;

    impl PeopleHubClient for NullPeopleHub {
        fn get_social_graph(
            &self,
            _xuid: u64,
            _detail: DetailLevel,
            _filter: Option<Vec<String>>,
        ) -> ClientFuture<'_, Vec<crate::model::SocialUser>> {
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    struct NullPresence;

    impl PresenceClient for NullPresence {
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
            Ok(SubscriptionHandle(1))
        }

        fn unsubscribe_device_presence(
            &self,
            _handle: SubscriptionHandle,
        ) -> Result<(), SocialError> {
            Ok(())
        }

        fn subscribe_title_presence(
            &self,
            _xuid: &str,
            _title_id: u32,
        ) -> Result<SubscriptionHandle, SocialError> {
            Ok(SubscriptionHandle(2))
        }

        fn unsubscribe_title_presence(
            &self,
            _handle: SubscriptionHandle,
        ) -> Result<(), SocialError> {
            Ok(())
        }
    }

    struct NullTransport {
        sender: broadcast::Sender<TransportEvent>,
    }

    impl NullTransport {
        fn new() -> Self {
            let (sender, _) = broadcast::channel(8);
            Self { sender }
        }
    }

    impl RealTimeTransport for NullTransport {
        fn activate(&self) {}

        fn deactivate(&self) {}

        fn subscribe_social_relationship_change(
            &self,
            _xuid: u64,
        ) -> Result<SubscriptionHandle, SocialError> {
            Ok(SubscriptionHandle(3))
        }

        fn events(&self) -> broadcast::Receiver<TransportEvent> {
            self.sender.subscribe()
        }
    }

    fn roster_user(xuid: u64) -> crate::model::SocialUser {
        crate::model::SocialUser {
            xuid,
            display_name: format!("User {xuid}"),
            real_name: String::new(),
            gamertag: format!("gt{xuid}"),
            display_pic_url: String::new(),
            is_followed_by_caller: true,
            is_following_user: true,
            is_favorite: false,
            presence: PresenceRecord::empty(xuid),
        }
    }

    /// A graph whose worker is not running, so the tests can drive
    /// `do_event_work` by hand.
    async fn manual_graph() -> SocialGraph {
        let graph = SocialGraph::new(
            1,
            42,
            DetailLevel::All,
            GraphConfig::default(),
            Arc::new(NullPeopleHub),
            Arc::new(NullPresence),
            Arc::new(NullTransport::new()),
            None,
        );
        graph.inner.initialized.store(true, Ordering::SeqCst);
        graph.inner.buffers.initialize(&[], 5).await;
        graph
    }

    #[tokio::test]
    async fn test_worker_applies_at_most_cap_per_iteration() {
        let graph = manual_graph().await;
        for xuid in 0..7u64 {
            graph
                .inner
                .internal_events
                .push(InternalEvent::UsersRemoved {
                    xuids: vec![1000 + xuid],
                });
        }

        assert!(graph.inner.do_event_work());
        assert_eq!(graph.inner.internal_events.len(), 2);

        assert!(graph.inner.do_event_work());
        assert!(graph.inner.internal_events.is_empty());
    }

    #[tokio::test]
    async fn test_uninitialized_worker_leaves_queue_untouched() {
        let graph = manual_graph().await;
        graph.inner.initialized.store(false, Ordering::SeqCst);
        graph
            .inner
            .internal_events
            .push(InternalEvent::UsersRemoved { xuids: vec![1] });

        assert!(!graph.inner.do_event_work());
        assert_eq!(graph.inner.internal_events.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_event_drained_without_user_event() {
        let graph = manual_graph().await;
        graph.inner.internal_events.push(InternalEvent::Unknown);

        assert!(graph.inner.do_event_work());
        assert!(graph.inner.internal_events.is_empty());
        assert!(graph.inner.social_events.is_empty());
    }

    #[tokio::test]
    async fn test_do_work_on_fresh_graph_is_empty() {
        let graph = manual_graph().await;
        let work = graph.do_work();
        assert!(work.snapshot.is_empty());
        assert!(work.events.is_empty());
    }

    #[tokio::test]
    async fn test_replay_drains_before_next_swap() {
        let graph = manual_graph().await;
        graph
            .inner
            .internal_events
            .push(InternalEvent::UsersRemoved { xuids: vec![7] });

        // Fresh apply records the event into the active buffer's log.
        assert!(graph.inner.do_event_work());
        assert!(!graph.are_events_empty());
        assert!(graph.inner.buffers.inactive_pending_empty());

        // The swap moves the logged side to inactive; it now needs replay.
        let _ = graph.do_work();
        assert!(!graph.inner.buffers.inactive_pending_empty());

        // Until the worker replays, further swaps are blocked but do_work
        // still serves snapshots and events.
        let _ = graph.do_work();
        assert!(!graph.are_events_empty());

        // The replay iteration drains the log; the pair is in sync again.
        assert!(graph.inner.do_event_work());
        assert!(graph.are_events_empty());
    }

    #[tokio::test]
    async fn test_replay_converges_both_replicas() {
        let graph = manual_graph().await;
        graph
            .inner
            .buffers
            .initialize(&[roster_user(9), roster_user(10)], 5)
            .await;

        graph
            .inner
            .internal_events
            .push(InternalEvent::UsersRemoved { xuids: vec![9] });

        // Live application mutates one replica, the swap exposes it, and
        // the replay brings the other replica to the identical state.
        assert!(graph.inner.do_event_work());
        let work = graph.do_work();
        assert!(!work.snapshot.contains(9));
        assert!(work.snapshot.contains(10));
        drop(work);

        assert!(graph.inner.do_event_work());
        let replayed = graph
            .inner
            .buffers
            .try_read_inactive()
            .expect("no writer active");
        assert!(!replayed.contains(9));
        assert!(replayed.contains(10));
        assert_eq!(replayed.context(10).unwrap().ref_count, 1);
    }
}
