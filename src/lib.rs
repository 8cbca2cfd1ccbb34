//! zafira-relay: test-run telemetry for the Zafira reporting service.
//!
//! This crate ships the log stream of a test run to a message broker and
//! uploads screenshots of failed tests to artifact storage, tagging their
//! locations back into the stream. Broker coordinates come from the
//! reporting service. Every failure on the way is logged and swallowed: the
//! test run itself is never interrupted by the relay.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Record / Format**: Log records and their JSON envelope
//! - **Reporting**: Client for the reporting service REST API
//! - **Broker**: Coordinate resolution, connection state machine, publish gate
//! - **Layer**: `tracing` bridge feeding records to the broker
//! - **Screenshot**: Failure screenshot capture and upload
//! - **Relay**: Wires all of the above from a [`Config`]
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tracing_subscriber::layer::SubscriberExt;
//! use tracing_subscriber::util::SubscriberInitExt;
//! use zafira_relay::broker::AmqpTransport;
//! use zafira_relay::config::load_config;
//! use zafira_relay::relay::{RelayHandle, reporting_client};
//! use zafira_relay::{ReportingService, RunContext};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("zafira.toml"))?;
//!     let reporting = reporting_client(&config.reporting)
//!         .await?
//!         .map(|client| Arc::new(client) as Arc<dyn ReportingService>);
//!     let context = Arc::new(RunContext::new("ci-run-42"));
//!
//!     let relay = RelayHandle::start(config, reporting, Arc::new(AmqpTransport::new()), context).await;
//!     tracing_subscriber::registry()
//!         .with(tracing_subscriber::fmt::layer())
//!         .with(relay.layer())
//!         .init();
//!
//!     // ... run tests ...
//!
//!     relay.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod config;
pub mod context;
pub mod format;
pub mod layer;
pub mod record;
pub mod relay;
pub mod reporting;
pub mod screenshot;

// Re-export commonly used types
pub use broker::{PublishGate, StateMachine};
pub use config::{Config, load_config};
pub use context::RunContext;
pub use layer::RelayLayer;
pub use record::{Level, LogRecord, RecordExtras};
pub use relay::RelayHandle;
pub use reporting::{HttpReportingClient, ReportingService};
pub use screenshot::{ArtifactSink, Driver, ScreenshotCapture};
