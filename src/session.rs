//! Session source contract and the in-memory login session.
//!
//! The channel never owns credentials; it reads them from a [`SessionSource`]
//! and writes the coarse session lifecycle back into it.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

/// How the token carried by the session authenticates the channel.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthMethod {
    #[default]
    None,
    Basic,
    Bearer,
}

/// Coarse authentication lifecycle stage.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    #[default]
    NoSession,
    CreatingSession,
    ActiveSession,
}

/// Upstream provider of credentials and session state.
///
/// Each getter returns a fresh watch receiver whose current value is the
/// latest known state.
pub trait SessionSource: Send + Sync + 'static {
    fn token(&self) -> watch::Receiver<Option<SecretString>>;

    fn auth_method(&self) -> watch::Receiver<AuthMethod>;

    fn session_state(&self) -> watch::Receiver<SessionState>;

    /// Writes a new session state. Implementations should only notify
    /// receivers when the value actually changes.
    fn set_session_state(&self, state: SessionState);

    /// Changes once per logout.
    fn logged_out(&self) -> watch::Receiver<u64>;
}

/// In-memory [`SessionSource`] driven by the embedding application.
///
/// Cloning shares the same underlying state.
#[derive(Clone, Debug)]
pub struct LoginSession {
    token: watch::Sender<Option<SecretString>>,
    auth_method: watch::Sender<AuthMethod>,
    state: watch::Sender<SessionState>,
    logouts: watch::Sender<u64>,
}

impl LoginSession {
    /// Creates a session with no credentials and no session.
    pub fn new() -> Self {
        Self {
            token: watch::channel(None).0,
            auth_method: watch::channel(AuthMethod::None).0,
            state: watch::channel(SessionState::NoSession).0,
            logouts: watch::channel(0).0,
        }
    }

    /// Session authenticated with a bearer token, ready to connect.
    pub fn bearer(token: SecretString) -> Self {
        let session = Self::new();
        session.set_credentials(Some(token), AuthMethod::Bearer);
        session
    }

    /// Session authenticated with HTTP basic credentials, ready to connect.
    pub fn basic(username: &str, password: &SecretString) -> Self {
        let session = Self::new();
        session.set_credentials(
            Some(basic_token(username, password)),
            AuthMethod::Basic,
        );
        session
    }

    /// Replaces the credentials and starts creating a session.
    pub fn set_credentials(&self, token: Option<SecretString>, method: AuthMethod) {
        self.token.send_replace(token);
        self.auth_method.send_if_modified(|current| {
            let changed = *current != method;
            *current = method;
            changed
        });
        debug!(event = "session_credentials_updated", auth_method = ?method);
        self.set_session_state(SessionState::CreatingSession);
    }

    /// Drops the session and signals logout to the channel.
    pub fn logout(&self) {
        self.set_session_state(SessionState::NoSession);
        self.logouts.send_modify(|count| *count += 1);
        debug!(event = "session_logged_out");
    }

    /// Current session state.
    pub fn current_state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Current auth method.
    pub fn current_auth_method(&self) -> AuthMethod {
        *self.auth_method.borrow()
    }
}

impl Default for LoginSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionSource for LoginSession {
    fn token(&self) -> watch::Receiver<Option<SecretString>> {
        self.token.subscribe()
    }

    fn auth_method(&self) -> watch::Receiver<AuthMethod> {
        self.auth_method.subscribe()
    }

    fn session_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn set_session_state(&self, state: SessionState) {
        let changed = self.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
        if changed {
            debug!(event = "session_state_changed", state = ?state);
        }
    }

    fn logged_out(&self) -> watch::Receiver<u64> {
        self.logouts.subscribe()
    }
}

/// Base64 `username:password`, the token format basic auth uses.
pub fn basic_token(username: &str, password: &SecretString) -> SecretString {
    let raw = format!("{username}:{}", password.expose_secret());
    SecretString::new(BASE64_STANDARD.encode(raw))
}
