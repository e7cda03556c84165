//! Error types for the social graph replica.

use thiserror::Error;

/// Errors surfaced by the social graph and its collaborators.
///
/// Errors are `Clone` because they travel inside queued events and may be
/// observed both by a completion signal and by the user-visible event that
/// reports the failed batch.
#[derive(Debug, Clone, Error)]
pub enum SocialError {
    /// The remote service answered 424 Failed Dependency.
    ///
    /// Tolerated during initialization only, where it is treated as an
    /// empty roster.
    #[error("failed dependency (HTTP 424): {0}")]
    FailedDependency(String),

    /// Transport-level failure talking to a remote service.
    #[error("network error: {0}")]
    Network(String),

    /// Internal failure (subscription setup, missing buffers during
    /// initialization).
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Malformed input, e.g. an unparseable xuid string. Logged and dropped
    /// rather than surfaced through the event queue.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
