//! Configuration schema definitions for zafira-relay.
//!
//! This module defines all configuration types that can be deserialized from
//! TOML configuration files.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── ReportingConfig        - Reporting service URL, token, timeout
//! ├── BrokerConfig           - Broker override and connection details not
//! │                            served by the reporting service
//! ├── ArtifactConfig         - Screenshot persistence and artifact TTL
//! └── RelayConfig            - Queue sizes, worker counts, target filters
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration structure for zafira-relay.
///
/// # TOML Structure
///
/// ```toml
/// [reporting]
/// service_url = "https://zafira.example.com/zafira-ws"
/// access_token = "<refresh token>"
///
/// [broker]
/// exchange = "logs"
///
/// [artifacts]
/// save_screenshots = true
/// ```
///
/// Only `[reporting]` is required; all other sections have defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Reporting service connection settings.
    pub reporting: ReportingConfig,

    /// Broker settings (optional, has defaults).
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Artifact persistence settings (optional, has defaults).
    #[serde(default)]
    pub artifacts: ArtifactConfig,

    /// Relay tuning (optional, has defaults).
    #[serde(default)]
    pub relay: RelayConfig,
}

/// Reporting service connection settings.
///
/// # Example
///
/// ```toml
/// [reporting]
/// enabled = true
/// service_url = "https://zafira.example.com/zafira-ws"
/// access_token = "eyJhbGciOi..."
/// timeout_secs = 10
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportingConfig {
    /// Master switch for the reporting integration.
    ///
    /// When off, broker coordinates are never fetched and log shipping
    /// stays disabled.
    ///
    /// Default: true
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Base URL of the reporting service REST API.
    pub service_url: String,

    /// Refresh token exchanged for an access token at startup.
    pub access_token: Option<String>,

    /// HTTP request timeout in seconds.
    ///
    /// Default: 10
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

/// Broker settings.
///
/// Host, port, user and the enabled flag come from the reporting service;
/// the values here complete them.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `enabled` | None (follow the reporting service) |
/// | `tool_name` | `"RABBITMQ"` |
/// | `password` | `"qpsdemo"` |
/// | `virtual_host` | `"/"` |
/// | `exchange` | `"logs"` |
/// | `history` | 1000 |
/// | `heartbeat_secs` | 10 |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    /// Local override of the enabled flag served by the reporting service.
    ///
    /// `Some(false)` turns log shipping off regardless of the remote flag;
    /// `Some(true)` turns it on even if the remote flag is off.
    pub enabled: Option<bool>,

    /// Name of the settings bundle holding the broker coordinates.
    #[serde(default = "default_tool_name")]
    pub tool_name: String,

    #[serde(default = "default_password")]
    pub password: String,

    #[serde(default = "default_virtual_host")]
    pub virtual_host: String,

    /// Exchange receiving the log envelopes.
    #[serde(default = "default_exchange")]
    pub exchange: String,

    /// Number of messages the recent-history exchange retains.
    #[serde(default = "default_history")]
    pub history: u32,

    /// AMQP heartbeat interval in seconds.
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: None,
            tool_name: default_tool_name(),
            password: default_password(),
            virtual_host: default_virtual_host(),
            exchange: default_exchange(),
            history: default_history(),
            heartbeat_secs: default_heartbeat(),
        }
    }
}

impl BrokerConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }
}

/// Artifact persistence settings.
///
/// # Example
///
/// ```toml
/// [artifacts]
/// save_screenshots = true
/// expires_in_secs = 86400
/// log_name = "Log"
/// directory = "target/artifacts"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArtifactConfig {
    /// Upload failure screenshots to the artifact sink.
    ///
    /// Also controls whether meta-info envelopes carry a headers block.
    ///
    /// Default: false
    #[serde(default)]
    pub save_screenshots: bool,

    /// Lifetime of presigned artifact URLs in seconds.
    ///
    /// Default: 86400 (one day)
    #[serde(default = "default_expires_in")]
    pub expires_in_secs: u64,

    /// Name under which the run log is attached to each test.
    ///
    /// Default: `"Log"`
    #[serde(default = "default_log_name")]
    pub log_name: String,

    /// Local directory used as artifact storage by the filesystem sink.
    ///
    /// Default: none (screenshots need an externally provided sink)
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            save_screenshots: false,
            expires_in_secs: default_expires_in(),
            log_name: default_log_name(),
            directory: None,
        }
    }
}

impl ArtifactConfig {
    pub fn expires_in(&self) -> Duration {
        Duration::from_secs(self.expires_in_secs)
    }
}

/// Relay tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    /// Capacity of the queue between the tracing layer and the publisher.
    /// Records arriving while the queue is full are dropped.
    ///
    /// Default: 4096
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Maximum number of concurrent screenshot uploads.
    ///
    /// Default: 4
    #[serde(default = "default_upload_workers")]
    pub upload_workers: usize,

    /// Event targets (prefix match) never forwarded to the broker.
    ///
    /// The relay's own crate is always ignored.
    #[serde(default = "default_ignored_targets")]
    pub ignored_targets: Vec<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            upload_workers: default_upload_workers(),
            ignored_targets: default_ignored_targets(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    10
}

fn default_tool_name() -> String {
    "RABBITMQ".to_string()
}

fn default_password() -> String {
    "qpsdemo".to_string()
}

fn default_virtual_host() -> String {
    "/".to_string()
}

fn default_exchange() -> String {
    "logs".to_string()
}

fn default_history() -> u32 {
    1000
}

fn default_heartbeat() -> u64 {
    10
}

fn default_expires_in() -> u64 {
    86400 // 1 day
}

fn default_log_name() -> String {
    "Log".to_string()
}

fn default_queue_capacity() -> usize {
    4096
}

fn default_upload_workers() -> usize {
    4
}

fn default_ignored_targets() -> Vec<String> {
    [
        "lapin",
        "amq_protocol",
        "pinky_swear",
        "async_io",
        "polling",
        "reqwest",
        "hyper",
        "h2",
        "rustls",
    ]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
