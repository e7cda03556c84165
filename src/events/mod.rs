//! Event types and queues connecting ingest, the graph worker, and the
//! consumer.
//!
//! Two queues exist with very different audiences:
//!
//! - [`InternalEventQueue`] - raw inputs (pushes, poll results, user
//!   requests) awaiting application by the graph worker.
//! - [`EventQueue`] - user-visible deltas, drained by the consumer each
//!   frame through `do_work`.

mod internal;
mod queue;

pub use internal::{
    CompletionSignal, InternalEvent, InternalEventQueue, TimerCompletionContext,
};
pub use queue::{EventQueue, EventQueueState, SocialEvent, SocialEventKind};
