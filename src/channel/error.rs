use thiserror::Error;
use tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue;
use tokio_tungstenite::tungstenite::Error as WsError;

/// Errors surfaced by the channel and its websocket transport.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Websocket handshake or transport failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Frame could not be encoded or decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The credential subprotocol is not a valid header value.
    #[error("invalid subprotocol header: {0}")]
    InvalidSubprotocol(#[from] InvalidHeaderValue),

    /// The connection worker has stopped.
    #[error("send queue is closed")]
    SendQueueClosed,

    /// The supervisor task has stopped.
    #[error("notification channel has stopped")]
    Stopped,
}
