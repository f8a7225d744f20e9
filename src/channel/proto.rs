use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::AuthMethod;

/// Websocket close code the server uses after a logout.
pub const LOGGED_OUT_CODE: u16 = 1000;
/// Websocket close code for a rejected credential or protocol violation.
pub const PROTOCOL_FAILURE_CODE: u16 = 1002;
/// Websocket close code for a server-side failure.
pub const INTERNAL_ERROR_CODE: u16 = 1011;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageType {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "subType", default)]
    pub sub_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageMeta {
    pub category: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MessageType>,
    #[serde(rename = "serverTime", default, skip_serializing_if = "Option::is_none")]
    pub server_time: Option<u64>,
}

/// Inbound frame published by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationMessage {
    pub meta: MessageMeta,
    #[serde(default)]
    pub message: Value,
}

impl NotificationMessage {
    pub fn new(category: impl Into<String>, message: Value) -> Self {
        Self {
            meta: MessageMeta {
                category: category.into(),
                kind: None,
                server_time: None,
            },
            message,
        }
    }

    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn category(&self) -> &str {
        &self.meta.category
    }

    /// String at `pointer` inside the payload, or `"<unknown>"`.
    pub fn field(&self, pointer: &str) -> &str {
        self.message
            .pointer(pointer)
            .and_then(Value::as_str)
            .unwrap_or("<unknown>")
    }
}

/// Why the server closed the connection.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseStatus {
    LoggedOut,
    ProtocolFailure,
    InternalError,
    Unknown,
}

impl CloseStatus {
    /// Classifies a close code. A missing code (dropped socket) is `Unknown`.
    pub fn from_code(code: Option<u16>) -> Self {
        match code {
            Some(LOGGED_OUT_CODE) => Self::LoggedOut,
            Some(PROTOCOL_FAILURE_CODE) => Self::ProtocolFailure,
            Some(INTERNAL_ERROR_CODE) => Self::InternalError,
            _ => Self::Unknown,
        }
    }

    /// Detail line for the "connection lost" notification.
    pub fn detail(self) -> Option<&'static str> {
        match self {
            Self::LoggedOut => Some("Logout success"),
            Self::ProtocolFailure => Some("Authentication failed"),
            Self::InternalError => Some("Internal server error"),
            Self::Unknown => None,
        }
    }

    /// Whether the user has to authenticate again before reconnecting.
    pub fn ends_session(self) -> bool {
        matches!(self, Self::LoggedOut | Self::ProtocolFailure)
    }

    /// Whether the close should be reported as a danger notification.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::ProtocolFailure | Self::InternalError)
    }
}

/// Websocket subprotocol carrying the session credential, if any.
pub fn subprotocol_for(
    app_name: &str,
    method: AuthMethod,
    token: Option<&SecretString>,
) -> Option<SecretString> {
    let token = token?.expose_secret();
    let protocol = match method {
        AuthMethod::Bearer => format!("base64url.bearer.authorization.{app_name}.{token}"),
        AuthMethod::Basic => format!("basic.authorization.{app_name}.{token}"),
        AuthMethod::None => return None,
    };
    Some(SecretString::new(protocol))
}
