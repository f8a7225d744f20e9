//! Client for the Cryostat console notification channel.
//!
//! The crate is organized by concern:
//! - `channel`: authenticated websocket channel, reconnect supervision,
//!   readiness and per-category message fan-out.
//! - `session`: session source contract and an in-memory login session.
//! - `resolver`: lookup of the channel's websocket address.
//! - `notifications`: notification sink contract and in-memory store.
//! - `retry`: shared retry utilities.

/// Notification channel.
pub mod channel;
/// User-facing notifications.
pub mod notifications;
/// Channel address lookup.
pub mod resolver;
/// Retry helpers used by the HTTP resolver.
pub mod retry;
/// Session inputs of the channel.
pub mod session;
