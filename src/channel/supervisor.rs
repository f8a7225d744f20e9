//! Connection supervisor.
//!
//! A single task owns the physical connection. It merges the session inputs,
//! the resolved address and a periodic tick into an [`UpstreamTuple`], opens
//! a connection whenever a new tuple says a session is being created, and
//! turns close events into readiness changes, session write-backs and
//! notifications.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::channel::categories::WS_CLIENT_ACTIVITY;
use crate::channel::distributor::MessageDistributor;
use crate::channel::proto::{subprotocol_for, CloseStatus, NotificationMessage};
use crate::channel::readiness::{ReadinessSignal, ReadyState, ReasonCode};
use crate::channel::transport::{ConnectionHandle, Transport, TransportEvent};
use crate::channel::upstream::{DedupGate, UpstreamState, UpstreamTuple};
use crate::notifications::{Notification, NotificationSink, Variant};
use crate::resolver::{AddressResolver, ResolutionError};
use crate::session::{SessionSource, SessionState};

/// Title of the notification raised on every close.
pub const CONNECTION_LOST_TITLE: &str = "WebSocket connection lost";

type PendingResolution = BoxFuture<'static, Result<String, ResolutionError>>;

pub(crate) struct ConnectionSupervisor<S, T, N> {
    session: S,
    transport: T,
    sink: N,
    readiness: ReadinessSignal,
    distributor: MessageDistributor,
    app_name: String,
    handshake_frame: String,
    connection: Option<ConnectionHandle>,
    connection_opened: bool,
}

impl<S, T, N> ConnectionSupervisor<S, T, N>
where
    S: SessionSource,
    T: Transport,
    N: NotificationSink,
{
    pub(crate) fn new(
        session: S,
        transport: T,
        sink: N,
        readiness: ReadinessSignal,
        distributor: MessageDistributor,
        app_name: String,
        handshake_frame: String,
    ) -> Self {
        Self {
            session,
            transport,
            sink,
            readiness,
            distributor,
            app_name,
            handshake_frame,
            connection: None,
            connection_opened: false,
        }
    }

    /// Opens a fresh connection for `tuple` when it asks for a session to be
    /// created; any previous connection is completed first.
    pub(crate) fn reconcile(&mut self, tuple: &UpstreamTuple) {
        if tuple.session_state != SessionState::CreatingSession {
            debug!(
                event = "reconcile_skipped",
                session_state = ?tuple.session_state,
                tick = tuple.tick
            );
            return;
        }

        if let Some(previous) = self.connection.take() {
            previous.complete();
            debug!(event = "connection_superseded", was_open = self.connection_opened);
            // The superseded close is never observed; readiness must not
            // outlive the socket.
            if std::mem::take(&mut self.connection_opened) {
                self.readiness.set(ReadyState::NotReady {
                    reason: ReasonCode::Unknown,
                });
            }
        }

        let subprotocol = subprotocol_for(&self.app_name, tuple.auth_method, tuple.token.as_ref());
        info!(
            event = "connection_opening",
            address = %tuple.address,
            auth_method = ?tuple.auth_method,
            tick = tuple.tick
        );
        self.connection = Some(self.transport.open(&tuple.address, subprotocol));
    }

    /// Applies one connection event. Returns the session state written back
    /// to the session source, if any.
    pub(crate) fn handle_event(&mut self, event: TransportEvent) -> Option<SessionState> {
        match event {
            TransportEvent::Opened => Some(self.on_open()),
            TransportEvent::Message(text) => {
                match NotificationMessage::from_text(&text) {
                    Ok(message) => self.distributor.dispatch(message, &self.sink),
                    Err(err) => warn!(event = "undecodable_frame", error = %err),
                }
                None
            }
            TransportEvent::Error(message) => {
                warn!(event = "transport_error", error = %message);
                None
            }
            TransportEvent::Closed { code } => {
                self.connection = None;
                self.connection_opened = false;
                Some(self.on_close(code))
            }
        }
    }

    /// Like [`Self::handle_event`], and mirrors the write-back into
    /// `upstream` so a tick racing the session notification sees it.
    pub(crate) fn apply_event(&mut self, event: TransportEvent, upstream: &mut UpstreamState) {
        if let Some(state) = self.handle_event(event) {
            upstream.set_session_state(state);
        }
    }

    /// Gracefully ends the current connection; its close is still classified.
    pub(crate) fn complete_connection(&self) {
        if let Some(connection) = self.connection.as_ref() {
            connection.complete();
        }
    }

    pub(crate) fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    fn on_open(&mut self) -> SessionState {
        info!(event = "connection_opened");
        self.connection_opened = true;
        self.readiness.set(ReadyState::Ready);
        self.session.set_session_state(SessionState::ActiveSession);

        if let Some(connection) = self.connection.as_ref() {
            if let Err(err) = connection.send(self.handshake_frame.clone()) {
                warn!(event = "handshake_send_failed", error = %err);
            }
        }
        SessionState::ActiveSession
    }

    fn on_close(&mut self, code: Option<u16>) -> SessionState {
        let status = CloseStatus::from_code(code);
        info!(
            event = "connection_closed",
            code = ?code,
            status = ?status,
            was_ready = self.readiness.current().is_ready()
        );

        self.readiness.set(ReadyState::NotReady {
            reason: status.into(),
        });

        let next_state = if status.ends_session() {
            SessionState::NoSession
        } else {
            SessionState::CreatingSession
        };
        self.session.set_session_state(next_state);

        let variant = if status.is_failure() {
            Variant::Danger
        } else {
            Variant::Info
        };
        self.sink.notify(
            Notification::new(variant, CONNECTION_LOST_TITLE)
                .with_message(status.detail().map(str::to_string))
                .with_category(WS_CLIENT_ACTIVITY)
                .with_auto_dismiss(!status.is_failure()),
        );
        next_state
    }

    /// Event loop. Ends on shutdown or when the session source goes away;
    /// the live connection, if any, is completed on the way out.
    pub(crate) async fn run<R>(
        mut self,
        resolver: Arc<R>,
        tick_interval: Duration,
        mut shutdown: oneshot::Receiver<()>,
    ) where
        R: AddressResolver,
    {
        let mut token_rx = self.session.token();
        let mut method_rx = self.session.auth_method();
        let mut state_rx = self.session.session_state();
        let mut logout_rx = self.session.logged_out();
        logout_rx.borrow_and_update();

        let mut upstream = UpstreamState::new(
            token_rx.borrow_and_update().clone(),
            *method_rx.borrow_and_update(),
            *state_rx.borrow_and_update(),
        );
        let mut gate = DedupGate::default();
        let mut resolution: Option<PendingResolution> = None;
        let mut ticker = tokio::time::interval(tick_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    debug!(event = "supervisor_shutdown");
                    break;
                }
                changed = token_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    upstream.set_token(token_rx.borrow_and_update().clone());
                }
                changed = method_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    upstream.set_auth_method(*method_rx.borrow_and_update());
                }
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    upstream.set_session_state(*state_rx.borrow_and_update());
                }
                changed = logout_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    logout_rx.borrow_and_update();
                    debug!(event = "logout_received", connected = self.has_connection());
                    self.complete_connection();
                }
                _ = ticker.tick() => {
                    upstream.advance_tick();
                    if !upstream.has_address() && resolution.is_none() {
                        let resolver = Arc::clone(&resolver);
                        resolution = Some(Box::pin(async move { resolver.resolve().await }));
                    }
                }
                resolved = poll_resolution(&mut resolution) => {
                    match resolved {
                        Ok(address) => upstream.set_address(address),
                        Err(err) => error!(
                            event = "address_resolution_failed",
                            error = %err,
                            retryable = err.is_retryable()
                        ),
                    }
                }
                event = next_event(&mut self.connection) => {
                    self.apply_event(event, &mut upstream);
                }
            }

            if let Some(tuple) = upstream.snapshot().and_then(|tuple| gate.admit(tuple)) {
                self.reconcile(&tuple);
            }
        }

        if let Some(connection) = self.connection.take() {
            connection.complete();
        }
        self.readiness.close();
        debug!(event = "supervisor_stopped");
    }
}

async fn poll_resolution(pending: &mut Option<PendingResolution>) -> Result<String, ResolutionError> {
    let Some(future) = pending.as_mut() else {
        return std::future::pending().await;
    };
    let result = future.await;
    *pending = None;
    result
}

async fn next_event(connection: &mut Option<ConnectionHandle>) -> TransportEvent {
    match connection.as_mut() {
        Some(connection) => connection.next_event().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use secrecy::{ExposeSecret, SecretString};
    use serde_json::json;

    use super::{ConnectionSupervisor, CONNECTION_LOST_TITLE};
    use crate::channel::categories::{CategoryRegistry, WS_CLIENT_ACTIVITY};
    use crate::channel::distributor::MessageDistributor;
    use crate::channel::readiness::{ReadinessSignal, ReadyState, ReasonCode};
    use crate::channel::transport::{
        connection_pair, ConnectionCommand, ConnectionEndpoint, ConnectionHandle, Transport,
        TransportEvent,
    };
    use crate::channel::upstream::{UpstreamState, UpstreamTuple};
    use crate::notifications::{Notifications, Variant};
    use crate::session::{AuthMethod, LoginSession, SessionState};

    #[derive(Debug)]
    struct Opened {
        address: String,
        subprotocol: Option<String>,
        endpoint: ConnectionEndpoint,
        completed_before_next_open: bool,
    }

    #[derive(Clone, Default)]
    struct RecordingTransport {
        opened: Arc<Mutex<Vec<Opened>>>,
    }

    impl RecordingTransport {
        fn count(&self) -> usize {
            self.opened.lock().expect("lock").len()
        }
    }

    impl Transport for RecordingTransport {
        fn open(&self, address: &str, subprotocol: Option<SecretString>) -> ConnectionHandle {
            let mut opened = self.opened.lock().expect("lock");
            if let Some(previous) = opened.last_mut() {
                let mut completed = false;
                while let Some(command) = previous.endpoint.try_recv_command() {
                    completed |= command == ConnectionCommand::Complete;
                }
                previous.completed_before_next_open = completed;
            }
            let (handle, endpoint) = connection_pair();
            opened.push(Opened {
                address: address.to_string(),
                subprotocol: subprotocol.map(|p| p.expose_secret().clone()),
                endpoint,
                completed_before_next_open: false,
            });
            handle
        }
    }

    struct Fixture {
        supervisor: ConnectionSupervisor<LoginSession, RecordingTransport, Notifications>,
        session: LoginSession,
        transport: RecordingTransport,
        sink: Notifications,
        readiness: ReadinessSignal,
    }

    fn fixture() -> Fixture {
        let session = LoginSession::bearer(SecretString::new("abc".to_string()));
        let transport = RecordingTransport::default();
        let sink = Notifications::new();
        let readiness = ReadinessSignal::new();
        let supervisor = ConnectionSupervisor::new(
            session.clone(),
            transport.clone(),
            sink.clone(),
            readiness.clone(),
            MessageDistributor::new(Arc::new(CategoryRegistry::standard())),
            "cryostat".to_string(),
            "connected".to_string(),
        );
        Fixture {
            supervisor,
            session,
            transport,
            sink,
            readiness,
        }
    }

    fn tuple(state: SessionState, tick: u64) -> UpstreamTuple {
        UpstreamTuple {
            address: "wss://x".to_string(),
            token: Some(SecretString::new("abc".to_string())),
            auth_method: AuthMethod::Bearer,
            session_state: state,
            tick,
        }
    }

    fn open_connection(f: &mut Fixture) {
        f.supervisor.reconcile(&tuple(SessionState::CreatingSession, 0));
        f.supervisor.handle_event(TransportEvent::Opened);
    }

    #[test]
    fn creating_tuple_opens_with_bearer_subprotocol() {
        let mut f = fixture();
        f.supervisor.reconcile(&tuple(SessionState::CreatingSession, 0));

        {
            let opened = f.transport.opened.lock().expect("lock");
            assert_eq!(opened.len(), 1);
            assert_eq!(opened[0].address, "wss://x");
            assert_eq!(
                opened[0].subprotocol.as_deref(),
                Some("base64url.bearer.authorization.cryostat.abc")
            );
        }

        f.supervisor.handle_event(TransportEvent::Opened);
        assert_eq!(f.readiness.current(), ReadyState::Ready);
        assert_eq!(f.session.current_state(), SessionState::ActiveSession);

        let mut opened = f.transport.opened.lock().expect("lock");
        assert_eq!(
            opened[0].endpoint.try_recv_command(),
            Some(ConnectionCommand::Send("connected".to_string()))
        );
    }

    #[test]
    fn other_session_states_do_not_connect() {
        let mut f = fixture();
        f.supervisor.reconcile(&tuple(SessionState::NoSession, 0));
        f.supervisor.reconcile(&tuple(SessionState::ActiveSession, 1));
        assert_eq!(f.transport.count(), 0);
        assert!(!f.supervisor.has_connection());
    }

    #[test]
    fn reconnect_completes_previous_connection_first() {
        let mut f = fixture();
        f.supervisor.reconcile(&tuple(SessionState::CreatingSession, 0));
        f.supervisor.reconcile(&tuple(SessionState::CreatingSession, 1));
        f.supervisor.reconcile(&tuple(SessionState::CreatingSession, 2));

        let opened = f.transport.opened.lock().expect("lock");
        assert_eq!(opened.len(), 3);
        assert!(opened[0].completed_before_next_open);
        assert!(opened[1].completed_before_next_open);
    }

    fn close_with(code: Option<u16>) -> Fixture {
        let mut f = fixture();
        open_connection(&mut f);
        f.supervisor.handle_event(TransportEvent::Closed { code });
        f
    }

    fn assert_close_outcome(
        code: Option<u16>,
        reason: ReasonCode,
        state: SessionState,
        variant: Variant,
        detail: Option<&str>,
    ) {
        let f = close_with(code);
        assert_eq!(f.readiness.current(), ReadyState::NotReady { reason });
        assert_eq!(f.session.current_state(), state);
        assert!(!f.supervisor.has_connection());

        let raised = f.sink.all();
        assert_eq!(raised.len(), 1);
        let notification = &raised[0].notification;
        assert_eq!(notification.title, CONNECTION_LOST_TITLE);
        assert_eq!(notification.variant, variant);
        assert_eq!(notification.message.as_deref(), detail);
        assert_eq!(notification.category.as_deref(), Some(WS_CLIENT_ACTIVITY));
    }

    #[test]
    fn logged_out_close() {
        assert_close_outcome(
            Some(1000),
            ReasonCode::LoggedOut,
            SessionState::NoSession,
            Variant::Info,
            Some("Logout success"),
        );
    }

    #[test]
    fn protocol_failure_close() {
        assert_close_outcome(
            Some(1002),
            ReasonCode::ProtocolFailure,
            SessionState::NoSession,
            Variant::Danger,
            Some("Authentication failed"),
        );
    }

    #[test]
    fn internal_error_close() {
        assert_close_outcome(
            Some(1011),
            ReasonCode::InternalError,
            SessionState::CreatingSession,
            Variant::Danger,
            Some("Internal server error"),
        );
    }

    #[test]
    fn unknown_close() {
        assert_close_outcome(
            Some(1006),
            ReasonCode::Unknown,
            SessionState::CreatingSession,
            Variant::Info,
            None,
        );
        assert_close_outcome(
            None,
            ReasonCode::Unknown,
            SessionState::CreatingSession,
            Variant::Info,
            None,
        );
    }

    #[test]
    fn transport_error_leaves_readiness_alone() {
        let mut f = fixture();
        open_connection(&mut f);
        f.supervisor
            .handle_event(TransportEvent::Error("connection reset".to_string()));
        assert_eq!(f.readiness.current(), ReadyState::Ready);
        assert!(f.sink.all().is_empty());
    }

    #[test]
    fn inbound_frames_reach_distributor() {
        let mut f = fixture();
        open_connection(&mut f);
        let frame = json!({
            "meta": {"category": WS_CLIENT_ACTIVITY},
            "message": {"127.0.0.1": "connected"}
        })
        .to_string();

        f.supervisor.handle_event(TransportEvent::Message(frame));
        f.supervisor
            .handle_event(TransportEvent::Message("not json".to_string()));

        let raised = f.sink.all();
        assert_eq!(raised.len(), 1);
        assert_eq!(
            raised[0].notification.message.as_deref(),
            Some("Client at 127.0.0.1 connected")
        );
    }

    #[test]
    fn logout_completes_and_keeps_listening_for_close() {
        let mut f = fixture();
        open_connection(&mut f);
        f.supervisor.complete_connection();
        assert!(f.supervisor.has_connection());

        {
            let mut opened = f.transport.opened.lock().expect("lock");
            let commands: Vec<_> =
                std::iter::from_fn(|| opened[0].endpoint.try_recv_command()).collect();
            assert!(commands.contains(&ConnectionCommand::Complete));
        }

        f.supervisor
            .handle_event(TransportEvent::Closed { code: Some(1000) });
        assert_eq!(
            f.readiness.current(),
            ReadyState::NotReady {
                reason: ReasonCode::LoggedOut
            }
        );
    }

    #[test]
    fn superseding_an_open_connection_drops_readiness_silently() {
        let mut f = fixture();
        open_connection(&mut f);
        assert_eq!(f.readiness.current(), ReadyState::Ready);

        let mut next = tuple(SessionState::CreatingSession, 1);
        next.token = Some(SecretString::new("def".to_string()));
        f.supervisor.reconcile(&next);

        assert_eq!(
            f.readiness.current(),
            ReadyState::NotReady {
                reason: ReasonCode::Unknown
            }
        );
        assert_eq!(f.transport.count(), 2);
        assert_eq!(f.session.current_state(), SessionState::ActiveSession);
        assert!(f.sink.all().is_empty());

        f.supervisor.handle_event(TransportEvent::Opened);
        assert_eq!(f.readiness.current(), ReadyState::Ready);
    }

    #[test]
    fn superseding_a_pending_connection_keeps_readiness() {
        let mut f = fixture();
        f.supervisor.reconcile(&tuple(SessionState::CreatingSession, 0));
        f.supervisor.reconcile(&tuple(SessionState::CreatingSession, 1));
        assert_eq!(f.readiness.current(), ReadyState::default());
    }

    #[test]
    fn write_backs_are_mirrored_into_upstream() {
        let mut f = fixture();
        let mut upstream = UpstreamState::new(
            Some(SecretString::new("abc".to_string())),
            AuthMethod::Bearer,
            SessionState::CreatingSession,
        );
        upstream.set_address("wss://x".to_string());
        f.supervisor.reconcile(&upstream.snapshot().expect("snapshot"));

        f.supervisor.apply_event(TransportEvent::Opened, &mut upstream);
        upstream.advance_tick();
        let tuple = upstream.snapshot().expect("snapshot");
        assert_eq!(tuple.session_state, SessionState::ActiveSession);
        f.supervisor.reconcile(&tuple);
        assert_eq!(f.transport.count(), 1, "open connection is kept on tick");

        f.supervisor
            .apply_event(TransportEvent::Closed { code: Some(1002) }, &mut upstream);
        assert_eq!(
            upstream.snapshot().expect("snapshot").session_state,
            SessionState::NoSession
        );

        f.supervisor
            .apply_event(TransportEvent::Message("not json".to_string()), &mut upstream);
        assert_eq!(
            upstream.snapshot().expect("snapshot").session_state,
            SessionState::NoSession
        );
    }
}
