//! Public entry point for the notification channel.
//!
//! [`NotificationChannel::start`] spawns the supervisor task and returns a
//! handle for observing readiness and subscribing to message categories.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::channel::categories::CategoryRegistry;
use crate::channel::distributor::{CategoryMessages, MessageDistributor};
use crate::channel::error::ChannelError;
use crate::channel::readiness::{ReadinessSignal, ReadinessWatcher, ReadyState};
use crate::channel::supervisor::ConnectionSupervisor;
use crate::channel::transport::Transport;
use crate::notifications::NotificationSink;
use crate::resolver::AddressResolver;
use crate::session::SessionSource;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChannelDefaults;

impl ChannelDefaults {
    /// Application name embedded in the credential subprotocol.
    pub const APP_NAME: &'static str = "cryostat";
    /// How often the upstream state is recomputed without any input change.
    pub const TICK_INTERVAL: Duration = Duration::from_secs(5);
    /// Frame sent right after open so the server binds the credential.
    pub const HANDSHAKE_FRAME: &'static str = "connected";
}

/// Settings for a [`NotificationChannel`].
#[derive(Clone, Debug)]
pub struct ChannelOptions {
    pub app_name: String,
    pub tick_interval: Duration,
    pub handshake_frame: String,
    pub registry: Arc<CategoryRegistry>,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            app_name: ChannelDefaults::APP_NAME.to_string(),
            tick_interval: ChannelDefaults::TICK_INTERVAL,
            handshake_frame: ChannelDefaults::HANDSHAKE_FRAME.to_string(),
            registry: Arc::new(CategoryRegistry::standard()),
        }
    }
}

impl ChannelOptions {
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn with_handshake_frame(mut self, frame: impl Into<String>) -> Self {
        self.handshake_frame = frame.into();
        self
    }

    pub fn with_registry(mut self, registry: CategoryRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }
}

/// Running notification channel.
///
/// Dropping the handle stops the supervisor and gracefully closes the
/// connection; [`NotificationChannel::shutdown`] does the same and waits for
/// it.
#[derive(Debug)]
pub struct NotificationChannel {
    readiness: ReadinessSignal,
    distributor: MessageDistributor,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl NotificationChannel {
    /// Spawns the supervisor on the current tokio runtime.
    pub fn start<S, R, T, N>(
        options: ChannelOptions,
        session: S,
        resolver: R,
        transport: T,
        sink: N,
    ) -> Self
    where
        S: SessionSource,
        R: AddressResolver,
        T: Transport,
        N: NotificationSink,
    {
        let readiness = ReadinessSignal::new();
        let distributor = MessageDistributor::new(options.registry);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let supervisor = ConnectionSupervisor::new(
            session,
            transport,
            sink,
            readiness.clone(),
            distributor.clone(),
            options.app_name,
            options.handshake_frame,
        );
        let task = tokio::spawn(supervisor.run(
            Arc::new(resolver),
            options.tick_interval,
            shutdown_rx,
        ));

        Self {
            readiness,
            distributor,
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    /// Current readiness.
    pub fn readiness(&self) -> ReadyState {
        self.readiness.current()
    }

    /// Watcher yielding the current readiness first, then every change.
    pub fn observe_readiness(&self) -> ReadinessWatcher {
        self.readiness.observe()
    }

    /// Messages of exactly `category` received from now on.
    pub fn messages(&self, category: impl Into<String>) -> CategoryMessages {
        self.distributor.subscribe(category)
    }

    pub fn registry(&self) -> &CategoryRegistry {
        self.distributor.registry()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stops the supervisor and waits for it to finish.
    pub async fn shutdown(mut self) -> Result<(), ChannelError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.task.await.map_err(|_| ChannelError::Stopped)
    }
}
