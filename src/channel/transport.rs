//! Physical connection contract and the websocket implementation.
//!
//! A [`Transport`] opens connections without blocking: `open` returns a
//! [`ConnectionHandle`] immediately and a background worker reports the
//! lifecycle through [`TransportEvent`]s.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::channel::error::ChannelError;
use crate::channel::proto::LOGGED_OUT_CODE;

const SUBPROTOCOL_HEADER: &str = "sec-websocket-protocol";
/// How long a graceful close waits for the peer's close frame.
const CLOSE_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle event reported by a connection worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    /// Transport failure; a `Closed` event follows.
    Error(String),
    /// Terminal event. `code` is the peer's close code when one was received.
    Closed { code: Option<u16> },
}

/// Command from the supervisor to a connection worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionCommand {
    Send(String),
    /// Graceful close.
    Complete,
}

/// Opens physical connections.
pub trait Transport: Send + Sync + 'static {
    fn open(&self, address: &str, subprotocol: Option<SecretString>) -> ConnectionHandle;
}

/// Supervisor side of one connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<ConnectionCommand>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl ConnectionHandle {
    pub fn send(&self, frame: impl Into<String>) -> Result<(), ChannelError> {
        self.commands
            .send(ConnectionCommand::Send(frame.into()))
            .map_err(|_| ChannelError::SendQueueClosed)
    }

    /// Requests a graceful close. A worker that already stopped ignores it.
    pub fn complete(&self) {
        let _ = self.commands.send(ConnectionCommand::Complete);
    }

    /// Next lifecycle event. A worker that vanished without a `Closed`
    /// event is reported as a close without code.
    pub async fn next_event(&mut self) -> TransportEvent {
        self.events
            .recv()
            .await
            .unwrap_or(TransportEvent::Closed { code: None })
    }
}

/// Worker side of one connection.
#[derive(Debug)]
pub struct ConnectionEndpoint {
    commands: mpsc::UnboundedReceiver<ConnectionCommand>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl ConnectionEndpoint {
    /// Reports an event; `false` once the handle has been dropped.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Next command; `None` once the handle has been dropped.
    pub async fn recv_command(&mut self) -> Option<ConnectionCommand> {
        self.commands.recv().await
    }

    pub fn try_recv_command(&mut self) -> Option<ConnectionCommand> {
        self.commands.try_recv().ok()
    }
}

/// Linked handle/endpoint pair for implementing a [`Transport`].
pub fn connection_pair() -> (ConnectionHandle, ConnectionEndpoint) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    (
        ConnectionHandle {
            commands: command_tx,
            events: event_rx,
        },
        ConnectionEndpoint {
            commands: command_rx,
            events: event_tx,
        },
    )
}

/// Websocket transport over `tokio-tungstenite`.
///
/// The credential-bearing subprotocol travels in `Sec-WebSocket-Protocol`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsTransport;

impl Transport for WsTransport {
    fn open(&self, address: &str, subprotocol: Option<SecretString>) -> ConnectionHandle {
        let (handle, endpoint) = connection_pair();
        let address = address.to_string();
        tokio::spawn(async move {
            websocket_worker(address, subprotocol, endpoint).await;
        });
        handle
    }
}

async fn websocket_worker(
    address: String,
    subprotocol: Option<SecretString>,
    mut endpoint: ConnectionEndpoint,
) {
    let code = match run_websocket(&address, subprotocol.as_ref(), &mut endpoint).await {
        Ok(code) => code,
        Err(err) => {
            endpoint.emit(TransportEvent::Error(err.to_string()));
            None
        }
    };
    endpoint.emit(TransportEvent::Closed { code });
}

/// Drives one websocket until it closes; returns the close code.
async fn run_websocket(
    address: &str,
    subprotocol: Option<&SecretString>,
    endpoint: &mut ConnectionEndpoint,
) -> Result<Option<u16>, ChannelError> {
    let mut request = address.into_client_request()?;
    if let Some(protocol) = subprotocol {
        let value = protocol.expose_secret().parse()?;
        request.headers_mut().insert(SUBPROTOCOL_HEADER, value);
    }

    let (mut socket, _) = connect_async(request).await?;
    debug!(event = "websocket_connected", address);

    // Commands queued while connecting: a completed connection never opens.
    let mut queued = Vec::new();
    while let Some(command) = endpoint.try_recv_command() {
        match command {
            ConnectionCommand::Send(text) => queued.push(text),
            ConnectionCommand::Complete => {
                debug!(event = "websocket_completed_before_open", address);
                let _ = socket.close(Some(logged_out_frame())).await;
                return Ok(await_close_ack(&mut socket, CLOSE_ACK_TIMEOUT).await);
            }
        }
    }

    if !endpoint.emit(TransportEvent::Opened) {
        let _ = socket.close(None).await;
        return Ok(None);
    }
    for text in queued {
        if let Err(err) = socket.send(Message::Text(text)).await {
            endpoint.emit(TransportEvent::Error(err.to_string()));
        }
    }

    loop {
        tokio::select! {
            command = endpoint.recv_command() => {
                match command {
                    Some(ConnectionCommand::Send(text)) => {
                        if let Err(err) = socket.send(Message::Text(text)).await {
                            endpoint.emit(TransportEvent::Error(err.to_string()));
                        }
                    }
                    Some(ConnectionCommand::Complete) | None => {
                        let _ = socket.close(Some(logged_out_frame())).await;
                        return Ok(await_close_ack(&mut socket, CLOSE_ACK_TIMEOUT).await);
                    }
                }
            }
            inbound = socket.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        endpoint.emit(TransportEvent::Message(text));
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(err) = socket.send(Message::Pong(payload)).await {
                            endpoint.emit(TransportEvent::Error(err.to_string()));
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return Ok(frame.map(|frame| u16::from(frame.code)));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        endpoint.emit(TransportEvent::Error(err.to_string()));
                        return Ok(None);
                    }
                    None => return Ok(None),
                }
            }
        }
    }
}

fn logged_out_frame() -> CloseFrame<'static> {
    CloseFrame {
        code: CloseCode::from(LOGGED_OUT_CODE),
        reason: "".into(),
    }
}

/// Reads until the peer acknowledges our close frame, for at most `wait`.
/// A missing or silent acknowledgement counts as a logged-out close.
async fn await_close_ack<S>(socket: &mut S, wait: Duration) -> Option<u16>
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    let drain = async {
        while let Some(Ok(message)) = socket.next().await {
            if let Message::Close(frame) = message {
                return frame.map(|frame| u16::from(frame.code));
            }
        }
        None
    };
    match tokio::time::timeout(wait, drain).await {
        Ok(code) => code.or(Some(LOGGED_OUT_CODE)),
        Err(_) => {
            debug!(event = "close_ack_timed_out", wait_ms = wait.as_millis() as u64);
            Some(LOGGED_OUT_CODE)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::stream;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::{Error as WsError, Message};

    use super::{await_close_ack, connection_pair, ConnectionCommand, TransportEvent};

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime")
    }

    #[test]
    fn silent_peer_close_ack_times_out_as_logged_out() {
        runtime().block_on(async {
            let mut silent = stream::pending::<Result<Message, WsError>>();
            let code = tokio::time::timeout(
                Duration::from_secs(2),
                await_close_ack(&mut silent, Duration::from_millis(20)),
            )
            .await
            .expect("close ack wait is bounded");
            assert_eq!(code, Some(1000));
        });
    }

    #[test]
    fn close_ack_reports_peer_code() {
        runtime().block_on(async {
            let frame = CloseFrame {
                code: CloseCode::from(1011),
                reason: "".into(),
            };
            let mut peer = stream::iter(vec![
                Ok::<_, WsError>(Message::Text("late".to_string())),
                Ok(Message::Close(Some(frame))),
            ]);
            assert_eq!(
                await_close_ack(&mut peer, Duration::from_secs(1)).await,
                Some(1011)
            );

            let mut ended = stream::empty::<Result<Message, WsError>>();
            assert_eq!(
                await_close_ack(&mut ended, Duration::from_secs(1)).await,
                Some(1000)
            );
        });
    }

    #[test]
    fn handle_and_endpoint_are_linked() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime");

        runtime.block_on(async {
            let (mut handle, mut endpoint) = connection_pair();

            handle.send("hello").expect("send");
            handle.complete();
            assert_eq!(
                endpoint.recv_command().await,
                Some(ConnectionCommand::Send("hello".to_string()))
            );
            assert_eq!(endpoint.try_recv_command(), Some(ConnectionCommand::Complete));

            assert!(endpoint.emit(TransportEvent::Opened));
            assert_eq!(handle.next_event().await, TransportEvent::Opened);
        });
    }

    #[test]
    fn vanished_worker_reads_as_close_without_code() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime");

        runtime.block_on(async {
            let (mut handle, endpoint) = connection_pair();
            drop(endpoint);
            assert_eq!(handle.next_event().await, TransportEvent::Closed { code: None });
            assert!(handle.send("late").is_err());
        });
    }
}
