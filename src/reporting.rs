//! Client for the reporting service (the Zafira REST API).
//!
//! The relay only needs a small part of the service: a health check, the
//! token refresh that authorizes later calls, and the tool settings bundle
//! that carries the broker coordinates. The [`ReportingService`] trait covers
//! what the broker layer consumes so it can be mocked in tests;
//! [`HttpReportingClient`] is the production implementation.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ReportingConfig;

const STATUS_PATH: &str = "/api/status";
const REFRESH_TOKEN_PATH: &str = "/api/auth/refresh";
const SETTINGS_TOOL_PATH: &str = "/api/settings/tool";

/// Result type for reporting service calls.
pub type ReportingResult<T> = Result<T, ReportingError>;

/// Errors returned by the reporting service client.
#[derive(Debug, thiserror::Error)]
pub enum ReportingError {
    /// The request could not be sent or the response body could not be read.
    #[error("Request to reporting service failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service answered with a non-success status code.
    #[error("{context}: reporting service responded with status {status}")]
    Status { status: u16, context: String },

    /// The client is not configured well enough to make the call.
    #[error("Reporting service is not configured: {0}")]
    NotConfigured(String),

    /// The health check failed, so no access token could be obtained.
    #[error("Reporting service is unavailable")]
    Unavailable,
}

/// A single `{name, value}` entry of a tool settings bundle.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Setting {
    pub name: String,

    #[serde(default)]
    pub value: Option<String>,
}

impl Setting {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }
}

/// The subset of the reporting service consumed by the relay core.
#[async_trait]
pub trait ReportingService: Send + Sync {
    /// Fetches the named tool settings bundle.
    async fn settings(&self, tool: &str, decrypt: bool) -> ReportingResult<Vec<Setting>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthTokens {
    access_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshTokenRequest<'a> {
    refresh_token: &'a str,
}

/// HTTP client for the reporting service.
///
/// Calls made after [`authenticate`](Self::authenticate) carry a
/// `Authorization: Bearer <token>` header.
///
/// With a refresh token configured, a settings request made while no access
/// token is held authenticates first. A `401` drops the held token, so the
/// next request authenticates again.
pub struct HttpReportingClient {
    client: reqwest::Client,
    base_url: String,
    refresh_token: Option<String>,
    access_token: RwLock<Option<String>>,
}

impl HttpReportingClient {
    /// Creates a client for the service rooted at `base_url`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> ReportingResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            refresh_token: None,
            access_token: RwLock::new(None),
        })
    }

    /// Sets the refresh token traded for access tokens on demand.
    pub fn with_refresh_token(mut self, refresh_token: Option<String>) -> Self {
        self.refresh_token = refresh_token.filter(|t| !t.trim().is_empty());
        self
    }

    /// Creates a client from the `[reporting]` configuration section.
    pub fn from_config(config: &ReportingConfig) -> ReportingResult<Self> {
        if config.service_url.trim().is_empty() {
            return Err(ReportingError::NotConfigured(
                "service_url is empty".to_string(),
            ));
        }
        Ok(Self::new(
            config.service_url.clone(),
            Duration::from_secs(config.timeout_secs),
        )?
        .with_refresh_token(config.access_token.clone()))
    }

    /// Checks the service health endpoint.
    ///
    /// Any failure (network or status) is reported as unavailable.
    pub async fn is_available(&self) -> bool {
        match self.client.get(self.url(STATUS_PATH)).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Reporting service ping failed: {}", e);
                false
            }
        }
    }

    /// Exchanges a refresh token for an access token.
    pub async fn refresh_token(&self, refresh_token: &str) -> ReportingResult<String> {
        let response = self
            .client
            .post(self.url(REFRESH_TOKEN_PATH))
            .json(&RefreshTokenRequest { refresh_token })
            .send()
            .await?;
        let response = verify(response, "Unable to refresh token")?;
        let tokens: AuthTokens = response.json().await?;
        Ok(tokens.access_token)
    }

    /// Pings the service and, if it is up, trades `refresh_token` for an
    /// access token used by subsequent calls.
    ///
    /// Returns whether the service is available.
    pub async fn authenticate(&self, refresh_token: &str) -> ReportingResult<bool> {
        if !self.is_available().await {
            info!("Reporting service is unavailable");
            return Ok(false);
        }
        let access_token = self.refresh_token(refresh_token).await?;
        self.set_access_token(Some(access_token));
        info!("Reporting service is available");
        Ok(true)
    }

    /// Authenticates with the configured refresh token unless an access token
    /// is already held. Without a refresh token this does nothing.
    pub async fn ensure_authorized(&self) -> ReportingResult<()> {
        let Some(refresh_token) = self.refresh_token.as_deref() else {
            return Ok(());
        };
        if self.has_access_token() {
            return Ok(());
        }
        if self.authenticate(refresh_token).await? {
            Ok(())
        } else {
            Err(ReportingError::Unavailable)
        }
    }

    pub fn has_access_token(&self) -> bool {
        self.access_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Replaces the bearer token sent with authorized calls.
    pub fn set_access_token(&self, token: Option<String>) {
        *self
            .access_token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = token;
    }

    fn bearer(&self) -> String {
        let token = self
            .access_token
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        format!("Bearer {}", token.as_deref().unwrap_or_default())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl ReportingService for HttpReportingClient {
    async fn settings(&self, tool: &str, decrypt: bool) -> ReportingResult<Vec<Setting>> {
        self.ensure_authorized().await?;

        let url = self.url(&format!("{}/{}", SETTINGS_TOOL_PATH, tool));
        let response = self
            .client
            .get(url)
            .query(&[("decrypt", decrypt)])
            .header(AUTHORIZATION, self.bearer())
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED && self.refresh_token.is_some() {
            warn!("[mq] access token rejected by the reporting service");
            self.set_access_token(None);
        }
        let response = verify(response, "Unable to get settings by tool")?;
        Ok(response.json().await?)
    }
}

fn verify(response: reqwest::Response, context: &str) -> ReportingResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(ReportingError::Status {
            status: status.as_u16(),
            context: context.to_string(),
        })
    }
}
