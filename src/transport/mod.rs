//! Adapter interfaces to the external roster, presence, and real-time
//! collaborators.
//!
//! The graph never talks HTTP or sockets itself. It consumes three traits:
//!
//! - [`PeopleHubClient`] - fetches the local user's social roster.
//! - [`PresenceClient`] - batch presence lookup and per-user presence
//!   subscriptions.
//! - [`RealTimeTransport`] - the push channel delivering device, title, and
//!   relationship changes, plus resync and connection-state notifications.
//!
//! Retries, auth, and timeouts are the implementations' concern. Pushes are
//! delivered over a `tokio::sync::broadcast` channel so the transport can
//! fan out to every interested graph without holding references to them.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::broadcast;

use crate::error::SocialError;
use crate::model::{
    DetailLevel, PresenceDeviceType, PresenceRecord, SocialUser, TitlePresenceState,
};

/// Boxed future returned by collaborator calls.
///
/// Boxing keeps the client traits object-safe so the graph can hold them as
/// `Arc<dyn ...>`.
pub type ClientFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, SocialError>> + Send + 'a>>;

/// Opaque handle to an established subscription.
///
/// Returned by subscribe calls and required to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

/// Connection state of the real-time transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Kind of relationship change reported by the social push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipNotification {
    /// The local user started following the listed accounts.
    Added,
    /// Relationship metadata for the listed accounts changed.
    Changed,
    /// The local user stopped following the listed accounts.
    Removed,
}

/// Payload of a device presence push.
#[derive(Debug, Clone)]
pub struct DevicePresenceArgs {
    /// Affected user, decimal wire form.
    pub xuid: String,
    /// Device the state change happened on.
    pub device_type: PresenceDeviceType,
    /// Whether the user is now signed in on that device.
    pub is_user_logged_on_device: bool,
}

/// Payload of a title presence push.
#[derive(Debug, Clone)]
pub struct TitlePresenceArgs {
    /// Affected user, decimal wire form.
    pub xuid: String,
    /// Title whose session changed.
    pub title_id: u32,
    /// Whether the session started or ended.
    pub state: TitlePresenceState,
}

/// Payload of a social relationship push.
#[derive(Debug, Clone)]
pub struct RelationshipChangeArgs {
    /// Affected users, decimal wire form.
    pub xuids: Vec<String>,
    /// What happened to them.
    pub notification: RelationshipNotification,
}

/// Payload of a subscription error notification.
#[derive(Debug, Clone)]
pub struct SubscriptionErrorArgs {
    /// Human-readable failure detail.
    pub detail: String,
}

/// A push delivered by the real-time transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A user signed in or out on a device.
    DevicePresenceChanged(DevicePresenceArgs),
    /// A user started or ended a title session.
    TitlePresenceChanged(TitlePresenceArgs),
    /// The local user's relationships changed.
    SocialRelationshipChanged(RelationshipChangeArgs),
    /// The transport dropped pushes; subscribers should re-fetch.
    Resync,
    /// The transport connection came up or went down.
    ConnectionStateChanged(ConnectionState),
    /// A subscription failed server-side.
    SubscriptionError(SubscriptionErrorArgs),
}

/// Remote service returning the local user's full social roster with
/// profile and presence data.
pub trait PeopleHubClient: Send + Sync + 'static {
    /// Fetches the social roster of `xuid`.
    ///
    /// With `filter` set, only the listed accounts are returned; otherwise
    /// the full roster. `detail` is forwarded opaquely.
    fn get_social_graph(
        &self,
        xuid: u64,
        detail: DetailLevel,
        filter: Option<Vec<String>>,
    ) -> ClientFuture<'_, Vec<SocialUser>>;
}

/// Remote presence service: batch lookup plus per-user change
/// subscriptions.
///
/// Subscribe/unsubscribe calls register interest with the transport and
/// complete synchronously; the pushes themselves arrive through
/// [`RealTimeTransport::events`].
pub trait PresenceClient: Send + Sync + 'static {
    /// Batch-fetches current presence for the listed users.
    fn get_presence_for_users(
        &self,
        xuids: Vec<String>,
    ) -> ClientFuture<'_, Vec<PresenceRecord>>;

    /// Subscribes to device presence changes for one user.
    fn subscribe_device_presence(&self, xuid: &str) -> Result<SubscriptionHandle, SocialError>;

    /// Tears down a device presence subscription.
    fn unsubscribe_device_presence(&self, handle: SubscriptionHandle)
        -> Result<(), SocialError>;

    /// Subscribes to title presence changes for one user within a title.
    fn subscribe_title_presence(
        &self,
        xuid: &str,
        title_id: u32,
    ) -> Result<SubscriptionHandle, SocialError>;

    /// Tears down a title presence subscription.
    fn unsubscribe_title_presence(&self, handle: SubscriptionHandle)
        -> Result<(), SocialError>;
}

/// The real-time push transport.
pub trait RealTimeTransport: Send + Sync + 'static {
    /// Brings the push connection up. Idempotent.
    fn activate(&self);

    /// Tears the push connection down. Idempotent.
    fn deactivate(&self);

    /// Subscribes to relationship changes of the local user.
    fn subscribe_social_relationship_change(
        &self,
        xuid: u64,
    ) -> Result<SubscriptionHandle, SocialError>;

    /// Returns a receiver for the push stream.
    ///
    /// Every call returns a fresh receiver positioned at the current tail.
    fn events(&self) -> broadcast::Receiver<TransportEvent>;
}
