//! Wiring of the relay components from a [`Config`].
//!
//! ```text
//!  Config ──► RelayHandle::start()
//!               ├── StateMachine (+ CoordinateResolver when reporting is on)
//!               ├── PublishGate
//!               ├── record queue + delivery task
//!               └── ScreenshotCapture (when an artifact sink is known)
//! ```
//!
//! The handle hands out [`RelayLayer`]s for the host's subscriber and shuts
//! everything down in order: pending uploads, queued records, then the
//! broker connection.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broker::{
    BrokerSettings, CoordinateResolver, Phase, PublishGate, StateMachine, Transport,
};
use crate::config::{Config, ReportingConfig};
use crate::context::RunContext;
use crate::format::FormatOptions;
use crate::layer::{RecordSender, RelayLayer, record_channel, spawn_delivery};
use crate::reporting::{HttpReportingClient, ReportingError, ReportingResult, ReportingService};
use crate::screenshot::{
    ArtifactSink, FsArtifactSink, ScreenshotCapture, ScreenshotUploader, UploadSettings,
};

/// Builds a reporting client, or `None` when reporting is switched off.
///
/// The client authenticates up front when a refresh token is configured. If
/// the service is down or rejects the token, the failure is logged and the
/// client is returned anyway: it authenticates again the next time broker
/// coordinates are resolved. Only an unusable configuration is an error.
pub async fn reporting_client(
    config: &ReportingConfig,
) -> ReportingResult<Option<HttpReportingClient>> {
    if !config.enabled {
        info!("Reporting integration is disabled");
        return Ok(None);
    }

    let client = HttpReportingClient::from_config(config)?;
    match client.ensure_authorized().await {
        Ok(()) => {}
        Err(ReportingError::Unavailable) => {
            info!("[mq] reporting service is down, broker coordinates will be resolved later")
        }
        Err(e) => warn!("[mq] unable to authenticate with the reporting service: {}", e),
    }
    Ok(Some(client))
}

/// A running relay.
pub struct RelayHandle {
    config: Config,
    context: Arc<RunContext>,
    gate: Arc<PublishGate>,
    sender: RecordSender,
    cancel: CancellationToken,
    delivery: JoinHandle<()>,
    screenshots: Option<ScreenshotCapture>,
}

impl RelayHandle {
    /// Resolves the broker, connects, and starts the delivery task.
    ///
    /// Without a reporting service the broker stays disabled and records are
    /// dropped. When `[artifacts] directory` is set, screenshots go to a
    /// [`FsArtifactSink`] there.
    pub async fn start(
        config: Config,
        reporting: Option<Arc<dyn ReportingService>>,
        transport: Arc<dyn Transport>,
        context: Arc<RunContext>,
    ) -> Self {
        let settings = BrokerSettings::from_config(&config.broker);
        let machine = match reporting {
            Some(service) => {
                let resolver = CoordinateResolver::new(service, config.broker.tool_name.clone());
                StateMachine::initialize(transport, resolver, settings).await
            }
            None => StateMachine::new(transport, None, settings),
        };

        let options = FormatOptions {
            persist_artifacts: config.artifacts.save_screenshots,
        };
        let gate = Arc::new(PublishGate::new(machine, Arc::clone(&context), options));
        gate.activate().await;

        let (sender, rx) = record_channel(config.relay.queue_capacity);
        let cancel = CancellationToken::new();
        let delivery = spawn_delivery(Arc::clone(&gate), rx, cancel.clone());

        let mut relay = Self {
            config,
            context,
            gate,
            sender,
            cancel,
            delivery,
            screenshots: None,
        };
        if let Some(directory) = relay.config.artifacts.directory.clone() {
            relay = relay.with_artifact_sink(Arc::new(FsArtifactSink::new(directory)));
        }
        relay
    }

    /// Enables screenshot uploads to `sink`.
    pub fn with_artifact_sink(mut self, sink: Arc<dyn ArtifactSink>) -> Self {
        let uploader = ScreenshotUploader::new(
            sink,
            Arc::clone(&self.gate),
            UploadSettings::from_config(&self.config.artifacts),
        );
        self.screenshots = Some(ScreenshotCapture::new(
            uploader,
            Arc::clone(&self.context),
            self.config.relay.upload_workers,
        ));
        self
    }

    /// A tracing layer feeding this relay.
    pub fn layer(&self) -> RelayLayer {
        RelayLayer::new(self.sender.clone())
            .with_ignored_targets(self.config.relay.ignored_targets.iter().cloned())
    }

    pub fn sender(&self) -> &RecordSender {
        &self.sender
    }

    pub fn gate(&self) -> &Arc<PublishGate> {
        &self.gate
    }

    pub fn context(&self) -> &Arc<RunContext> {
        &self.context
    }

    pub fn screenshots(&self) -> Option<&ScreenshotCapture> {
        self.screenshots.as_ref()
    }

    pub async fn phase(&self) -> Phase {
        self.gate.phase().await
    }

    /// Waits for pending uploads, drains the record queue, then closes the
    /// broker connection.
    pub async fn shutdown(self) {
        if let Some(screenshots) = &self.screenshots {
            let uploaded = screenshots.wait().await;
            info!("Uploaded {} screenshot(s)", uploaded);
        }

        self.cancel.cancel();
        if let Err(e) = self.delivery.await {
            warn!("Record delivery task failed: {}", e);
        }

        let dropped = self.sender.dropped();
        if dropped > 0 {
            warn!("{} log record(s) dropped because the queue was full", dropped);
        }

        self.gate.close().await;
    }
}
