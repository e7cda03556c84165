//! rosterlink - live social roster replica for per-frame consumers
//!
//! This library maintains an in-memory, per-local-user view of that user's
//! social roster (friends, favorites, followed accounts) enriched with
//! presence data, keeps it consistent with an authoritative remote service
//! under a push/poll hybrid, and exposes a double-buffered snapshot plus a
//! queue of change events that a single consumer (typically a game's
//! per-frame update) drains in bounded time without blocking network or
//! subscription work.
//!
//! # High-Level API
//!
//! ```ignore
//! use rosterlink::graph::SocialGraph;
//! use rosterlink::config::GraphConfig;
//! use rosterlink::model::DetailLevel;
//!
//! let graph = SocialGraph::new(
//!     local_user_xuid,
//!     title_id,
//!     DetailLevel::All,
//!     GraphConfig::default(),
//!     peoplehub,
//!     presence,
//!     transport,
//!     None,
//! );
//! graph.initialize().await?;
//!
//! // Once per frame:
//! let work = graph.do_work();
//! for event in &work.events {
//!     // react to roster deltas
//! }
//! for user in work.snapshot.users() {
//!     // render the roster
//! }
//! ```

pub mod buffer;
pub mod config;
pub mod error;
pub mod events;
pub mod graph;
pub mod model;
pub mod subscriptions;
pub mod timer;
pub mod transport;

/// Version of the rosterlink library.
///
/// This is synchronized with `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
