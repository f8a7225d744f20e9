//! Replaying readiness signal for the notification channel.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::channel::proto::CloseStatus;

/// Why the channel is not usable.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    /// Never connected yet.
    None,
    LoggedOut,
    ProtocolFailure,
    InternalError,
    Unknown,
}

impl From<CloseStatus> for ReasonCode {
    fn from(status: CloseStatus) -> Self {
        match status {
            CloseStatus::LoggedOut => Self::LoggedOut,
            CloseStatus::ProtocolFailure => Self::ProtocolFailure,
            CloseStatus::InternalError => Self::InternalError,
            CloseStatus::Unknown => Self::Unknown,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReadyState {
    Ready,
    NotReady { reason: ReasonCode },
}

impl ReadyState {
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Reason code, present only when not ready.
    pub fn reason(self) -> Option<ReasonCode> {
        match self {
            Self::Ready => None,
            Self::NotReady { reason } => Some(reason),
        }
    }
}

impl Default for ReadyState {
    fn default() -> Self {
        Self::NotReady {
            reason: ReasonCode::None,
        }
    }
}

#[derive(Debug, Default)]
struct ReadinessShared {
    current: ReadyState,
    feeds: Vec<mpsc::UnboundedSender<ReadyState>>,
    closed: bool,
}

/// Write side of the readiness signal.
///
/// Only the connection supervisor calls [`ReadinessSignal::set`]; the channel
/// handle keeps a clone to read the current value and attach watchers.
#[derive(Clone, Debug, Default)]
pub(crate) struct ReadinessSignal {
    shared: Arc<RwLock<ReadinessShared>>,
}

impl ReadinessSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records `state` and pushes it to every attached watcher.
    pub(crate) fn set(&self, state: ReadyState) {
        let Ok(mut shared) = self.shared.write() else {
            return;
        };
        shared.current = state;
        shared.feeds.retain(|feed| feed.send(state).is_ok());
    }

    pub(crate) fn current(&self) -> ReadyState {
        self.shared
            .read()
            .map(|shared| shared.current)
            .unwrap_or_default()
    }

    /// Watcher seeded with the current value.
    pub(crate) fn observe(&self) -> ReadinessWatcher {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut shared) = self.shared.write() {
            let _ = tx.send(shared.current);
            if !shared.closed {
                shared.feeds.push(tx);
            }
        }
        ReadinessWatcher { rx }
    }

    /// Ends every watcher once it has drained the updates already pushed.
    pub(crate) fn close(&self) {
        if let Ok(mut shared) = self.shared.write() {
            shared.closed = true;
            shared.feeds.clear();
        }
    }
}

/// Observer that yields the current readiness first, then every change in
/// order.
#[derive(Debug)]
pub struct ReadinessWatcher {
    rx: mpsc::UnboundedReceiver<ReadyState>,
}

impl ReadinessWatcher {
    /// Next readiness value; `None` once the channel has stopped and every
    /// pending update was read.
    pub async fn next(&mut self) -> Option<ReadyState> {
        self.rx.recv().await
    }

    /// Waits until readiness satisfies `predicate`, starting with the values
    /// not yet read.
    pub async fn wait_for(
        &mut self,
        mut predicate: impl FnMut(ReadyState) -> bool,
    ) -> Option<ReadyState> {
        while let Some(state) = self.rx.recv().await {
            if predicate(state) {
                return Some(state);
            }
        }
        None
    }
}
