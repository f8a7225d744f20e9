//! Notification channel example.
//!
//! This program looks up the notification channel of a Cryostat console,
//! connects with a bearer token and prints readiness changes, raised
//! notifications and recording lifecycle messages until Ctrl-C.
//!
//! Before running:
//! - Replace the console URL and token placeholders below.
//! - Set `RUST_LOG=cryostat_channel=debug` to see the connection lifecycle.

use std::error::Error;

use cryostat_channel::channel::{ChannelOptions, NotificationChannel, WsTransport};
use cryostat_channel::notifications::Notifications;
use cryostat_channel::resolver::HttpAddressResolver;
use cryostat_channel::session::LoginSession;
use secrecy::SecretString;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let console_url = "REPLACE_WITH_CONSOLE_URL";
    let token = "REPLACE_WITH_BEARER_TOKEN".to_string();

    let session = LoginSession::bearer(SecretString::new(token));
    let notifications = Notifications::new();
    let mut feed = notifications.subscribe();

    let channel = NotificationChannel::start(
        ChannelOptions::default(),
        session.clone(),
        HttpAddressResolver::new(console_url)?,
        WsTransport,
        notifications.clone(),
    );
    let mut readiness = channel.observe_readiness();
    let mut created = channel.messages("ActiveRecordingCreated");
    let mut stopped = channel.messages("ActiveRecordingStopped");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("logging out");
                session.logout();
                break;
            }
            state = readiness.next() => {
                let Some(state) = state else { break };
                println!("readiness: {state:?}");
            }
            entry = feed.recv() => {
                let Some(entry) = entry else { break };
                if entry.notification.hidden {
                    continue;
                }
                println!(
                    "[{:?}] {}: {}",
                    entry.notification.variant,
                    entry.notification.title,
                    entry.notification.message.as_deref().unwrap_or("")
                );
            }
            Some(message) = created.recv() => {
                println!("recording created: {}", message.field("/recording/name"));
            }
            Some(message) = stopped.recv() => {
                println!("recording stopped: {}", message.field("/recording/name"));
            }
        }
    }

    channel.shutdown().await?;
    Ok(())
}
