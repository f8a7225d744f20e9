//! Merged upstream state driving connection decisions.
//!
//! `UpstreamState` keeps the latest value of every input and only yields a
//! snapshot once all of them are known. `DedupGate` suppresses a snapshot
//! that is structurally equal to the previous one.

use secrecy::{ExposeSecret, SecretString};

use crate::session::{AuthMethod, SessionState};

/// Snapshot of everything the supervisor needs to decide on a connection.
#[derive(Clone, Debug)]
pub struct UpstreamTuple {
    pub address: String,
    pub token: Option<SecretString>,
    pub auth_method: AuthMethod,
    pub session_state: SessionState,
    pub tick: u64,
}

impl PartialEq for UpstreamTuple {
    fn eq(&self, other: &Self) -> bool {
        let same_token = match (&self.token, &other.token) {
            (Some(a), Some(b)) => a.expose_secret() == b.expose_secret(),
            (None, None) => true,
            _ => false,
        };
        same_token
            && self.address == other.address
            && self.auth_method == other.auth_method
            && self.session_state == other.session_state
            && self.tick == other.tick
    }
}

impl Eq for UpstreamTuple {}

#[derive(Debug, Default)]
pub(crate) struct UpstreamState {
    address: Option<String>,
    token: Option<SecretString>,
    auth_method: AuthMethod,
    session_state: SessionState,
    tick: u64,
}

impl UpstreamState {
    pub(crate) fn new(
        token: Option<SecretString>,
        auth_method: AuthMethod,
        session_state: SessionState,
    ) -> Self {
        Self {
            address: None,
            token,
            auth_method,
            session_state,
            tick: 0,
        }
    }

    pub(crate) fn has_address(&self) -> bool {
        self.address.is_some()
    }

    pub(crate) fn set_address(&mut self, address: String) {
        self.address = Some(address);
    }

    pub(crate) fn set_token(&mut self, token: Option<SecretString>) {
        self.token = token;
    }

    pub(crate) fn set_auth_method(&mut self, method: AuthMethod) {
        self.auth_method = method;
    }

    pub(crate) fn set_session_state(&mut self, state: SessionState) {
        self.session_state = state;
    }

    pub(crate) fn advance_tick(&mut self) {
        self.tick = self.tick.wrapping_add(1);
    }

    /// `None` until the address has been resolved.
    pub(crate) fn snapshot(&self) -> Option<UpstreamTuple> {
        let address = self.address.clone()?;
        Some(UpstreamTuple {
            address,
            token: self.token.clone(),
            auth_method: self.auth_method,
            session_state: self.session_state,
            tick: self.tick,
        })
    }
}

/// Passes a tuple only when it differs from the last one passed.
#[derive(Debug, Default)]
pub(crate) struct DedupGate {
    last: Option<UpstreamTuple>,
}

impl DedupGate {
    pub(crate) fn admit(&mut self, tuple: UpstreamTuple) -> Option<UpstreamTuple> {
        if self.last.as_ref() == Some(&tuple) {
            return None;
        }
        self.last = Some(tuple.clone());
        Some(tuple)
    }
}
