//! Double-buffered user storage.
//!
//! A [`UserStore`] holds one replica of the graph: a slot slab of user
//! records plus an xuid map pointing into it. A [`UserBufferPair`] holds two
//! such replicas - the active one serves read-only snapshots to the
//! consumer, the inactive one absorbs writes from the graph worker - plus
//! the per-buffer pending-replay logs that make a mid-stream swap safe.

mod pair;
mod store;

pub use pair::{GraphSnapshot, UserBufferPair};
pub use store::{UserContext, UserStore};
