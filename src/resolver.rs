//! Lookup of the notification channel endpoint.
//!
//! The server hands out the websocket address over HTTP; the channel asks
//! once and keeps the first successful answer.

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::retry::{retry_async, RetryPolicy};

const ERROR_BODY_SNIPPET_LEN: usize = 220;
/// Path of the endpoint that returns the notification channel address.
pub const NOTIFICATIONS_URL_PATH: &str = "/api/v1/notifications_url";

/// Resolves the websocket address of the notification channel.
pub trait AddressResolver: Send + Sync + 'static {
    fn resolve(&self) -> impl Future<Output = Result<String, ResolutionError>> + Send;
}

#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },

    #[error("failed to parse response: {0}")]
    Parse(String),
}

impl ResolutionError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_timeout() || err.is_connect(),
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Parse(_) => false,
        }
    }
}

/// Fixed address, for deployments where it is known up front.
#[derive(Clone, Debug)]
pub struct StaticAddress(String);

impl StaticAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into().trim_end().to_string())
    }
}

impl AddressResolver for StaticAddress {
    fn resolve(&self) -> impl Future<Output = Result<String, ResolutionError>> + Send {
        let address = self.0.clone();
        async move { Ok(address) }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ResolverDefaults;

impl ResolverDefaults {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
    pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);
}

#[derive(Clone, Debug)]
pub struct ResolverOptions {
    pub connect_timeout: Duration,
    pub attempt_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            connect_timeout: ResolverDefaults::CONNECT_TIMEOUT,
            attempt_timeout: ResolverDefaults::ATTEMPT_TIMEOUT,
            retry_policy: RetryPolicy::address_lookup(),
        }
    }
}

/// Asks the console API for the channel address.
#[derive(Debug)]
pub struct HttpAddressResolver {
    http: Client,
    endpoint: String,
    attempt_timeout: Duration,
    retry_policy: RetryPolicy,
    resolved: OnceCell<String>,
}

impl HttpAddressResolver {
    /// `base_url` is the console API root, e.g. `https://cryostat.example`.
    pub fn new(base_url: &str) -> Result<Self, ResolutionError> {
        Self::with_options(base_url, ResolverOptions::default())
    }

    pub fn with_options(base_url: &str, options: ResolverOptions) -> Result<Self, ResolutionError> {
        let http = Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(ResolutionError::Transport)?;

        Ok(Self {
            http,
            endpoint: format!("{}{}", base_url.trim_end().trim_end_matches('/'), NOTIFICATIONS_URL_PATH),
            attempt_timeout: options.attempt_timeout,
            retry_policy: options.retry_policy,
            resolved: OnceCell::new(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn fetch(&self) -> Result<String, ResolutionError> {
        retry_async(
            "resolve_notifications_url",
            &self.retry_policy,
            |_| self.send_attempt(),
            ResolutionError::is_retryable,
        )
        .await
    }

    async fn send_attempt(&self) -> Result<String, ResolutionError> {
        let response = self
            .http
            .get(&self.endpoint)
            .timeout(self.attempt_timeout)
            .send()
            .await
            .map_err(ResolutionError::Transport)?;
        let status = response.status();
        let body = response.text().await.map_err(ResolutionError::Transport)?;

        if !status.is_success() {
            return Err(ResolutionError::HttpStatus {
                status,
                body: summarize_error_body(&body),
            });
        }

        parse_notifications_url(&body)
    }
}

impl AddressResolver for HttpAddressResolver {
    fn resolve(&self) -> impl Future<Output = Result<String, ResolutionError>> + Send {
        async move {
            let address = self.resolved.get_or_try_init(|| self.fetch()).await?;
            debug!(event = "notifications_url_resolved", address = %address);
            Ok(address.clone())
        }
    }
}

fn parse_notifications_url(body: &str) -> Result<String, ResolutionError> {
    #[derive(Debug, Deserialize)]
    struct NotificationsUrl {
        #[serde(rename = "notificationsUrl")]
        notifications_url: String,
    }

    let parsed: NotificationsUrl =
        serde_json::from_str(body).map_err(|err| ResolutionError::Parse(err.to_string()))?;
    let url = parsed.notifications_url.trim();
    if url.is_empty() {
        return Err(ResolutionError::Parse("notificationsUrl is empty".to_string()));
    }
    Ok(url.to_string())
}

fn summarize_error_body(body: &str) -> String {
    #[derive(Debug, Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        message: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed.error.or(parsed.message) {
            return message;
        }
    }

    body.chars().take(ERROR_BODY_SNIPPET_LEN).collect()
}
