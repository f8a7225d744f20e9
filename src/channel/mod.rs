//! Realtime notification channel.
//!
//! - `client`: public handle and options.
//! - `supervisor`: connection lifecycle and close classification.
//! - `distributor`: per-category fan-out and notification dispatch.
//! - `readiness`: replaying ready/not-ready signal.
//! - `transport`: physical connection contract and websocket implementation.

/// Category registration table.
pub mod categories;
/// Channel handle and options.
pub mod client;
/// Inbound message fan-out.
pub mod distributor;
/// Channel error type.
pub mod error;
/// Wire messages, close codes and subprotocol derivation.
pub mod proto;
/// Readiness state and watcher.
pub mod readiness;
/// Connection supervisor.
pub mod supervisor;
/// Connection contract and websocket transport.
pub mod transport;
/// Merged upstream state and dedup gate.
pub mod upstream;

pub use categories::{CategoryDescriptor, CategoryRegistry, WS_CLIENT_ACTIVITY};
pub use client::{ChannelDefaults, ChannelOptions, NotificationChannel};
pub use distributor::{CategoryMessages, MessageDistributor};
pub use error::ChannelError;
pub use proto::{CloseStatus, NotificationMessage};
pub use readiness::{ReadinessWatcher, ReadyState, ReasonCode};
pub use transport::{
    connection_pair, ConnectionCommand, ConnectionEndpoint, ConnectionHandle, Transport,
    TransportEvent, WsTransport,
};
pub use upstream::UpstreamTuple;
