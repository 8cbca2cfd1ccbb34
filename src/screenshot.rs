//! Failure screenshots: capture, upload, and tagging into the log stream.
//!
//! When a test fails, every implicated [`Driver`] is asked for a screenshot.
//! Payloads are uploaded to an [`ArtifactSink`] on a bounded set of
//! background tasks, so the test run never waits on the network.
//!
//! ```text
//!  on_failure(groups, failure_text)
//!        │
//!        ▼
//!  get_failed_drivers() ──► Driver::screenshot_base64()
//!                                   │
//!                                   ▼ submit()
//!                     JoinSet + Semaphore (upload_workers)
//!                                   │
//!                                   ▼
//!                    ScreenshotUploader::upload()
//!                      ├── META_INFO "Uploading ..."  ──► PublishGate
//!                      ├── ArtifactSink::upload
//!                      ├── ArtifactSink::presign
//!                      └── META_INFO "Uploaded ..."   ──► PublishGate
//! ```
//!
//! Both meta-info records of one upload share a fresh correlation id and the
//! id of the test that was active when the screenshot was taken. The second
//! one carries the presigned URL.

pub mod sink;

pub use sink::FsArtifactSink;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use chrono::NaiveDate;
use futures::future;
use rand::Rng;
use rand::seq::SliceRandom;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::broker::PublishGate;
use crate::config::ArtifactConfig;
use crate::context::RunContext;
use crate::record::{LogRecord, RecordExtras};

/// Key prefix of every screenshot artifact.
pub const SCREENSHOT_KEY_PREFIX: &str = "artifacts/screenshots";

const FILE_NAME_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const FILE_NAME_LENGTH: usize = 10;

/// Result type for artifact sink operations.
pub type ArtifactResult<T> = Result<T, ArtifactError>;

/// Errors raised by an [`ArtifactSink`].
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Upload of {key} failed: {message}")]
    Upload { key: String, message: String },

    #[error("Presigning {key} failed: {message}")]
    Presign { key: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for screenshot operations.
pub type ScreenshotResult<T> = Result<T, ScreenshotError>;

/// Errors raised while capturing or uploading a screenshot.
#[derive(Debug, thiserror::Error)]
pub enum ScreenshotError {
    /// The driver could not produce a screenshot.
    #[error("Capture failed: {0}")]
    Capture(String),

    /// The payload was not valid base64.
    #[error("Invalid screenshot payload: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// Object storage for uploaded artifacts.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Stores `bytes` under `key`.
    async fn upload(&self, bytes: Vec<u8>, key: &str) -> ArtifactResult<()>;

    /// Returns a URL granting read access to `key` for `ttl`.
    async fn presign(&self, key: &str, ttl: Duration) -> ArtifactResult<String>;

    /// Sink name (for log messages).
    fn name(&self) -> &str;
}

/// A browser (or other UI) session able to take screenshots.
///
/// The `Display` form identifies the driver; it is matched against the
/// failure text by [`get_failed_drivers`].
#[async_trait]
pub trait Driver: fmt::Display + Send + Sync {
    /// Captures the current screen as base64-encoded PNG.
    async fn screenshot_base64(&self) -> ScreenshotResult<String>;
}

/// Picks the drivers implicated in a failure.
///
/// Returns the first driver of each group whose textual form appears in
/// `failure_text`. If no group matches, every driver of every group is
/// returned.
pub fn get_failed_drivers(
    groups: &[Vec<Arc<dyn Driver>>],
    failure_text: &str,
) -> Vec<Arc<dyn Driver>> {
    let failed: Vec<Arc<dyn Driver>> = groups
        .iter()
        .filter_map(|group| group.first())
        .filter(|driver| failure_text.contains(&driver.to_string()))
        .cloned()
        .collect();

    if !failed.is_empty() {
        return failed;
    }
    groups.iter().flatten().cloned().collect()
}

/// Random PNG file name: ten distinct lower-case alphanumerics.
pub fn artifact_file_name<R: Rng + ?Sized>(rng: &mut R) -> String {
    let stem: String = FILE_NAME_ALPHABET
        .choose_multiple(rng, FILE_NAME_LENGTH)
        .map(|&b| b as char)
        .collect();
    format!("{}.png", stem)
}

/// `artifacts/screenshots/{MM-DD-YYYY}/{file_name}`
pub fn artifact_key(date: NaiveDate, file_name: &str) -> String {
    format!(
        "{}/{}/{}",
        SCREENSHOT_KEY_PREFIX,
        date.format("%m-%d-%Y"),
        file_name
    )
}

/// Upload behaviour taken from `[artifacts]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSettings {
    /// Uploads are skipped entirely when false.
    pub persist: bool,
    /// Lifetime of the presigned URL.
    pub expires_in: Duration,
    /// Logger name of the meta-info records.
    pub logger: String,
}

impl UploadSettings {
    pub fn from_config(config: &ArtifactConfig) -> Self {
        Self {
            persist: config.save_screenshots,
            expires_in: config.expires_in(),
            logger: config.log_name.clone(),
        }
    }
}

/// Uploads one screenshot and announces it on the log stream.
pub struct ScreenshotUploader {
    sink: Arc<dyn ArtifactSink>,
    gate: Arc<PublishGate>,
    settings: UploadSettings,
}

impl ScreenshotUploader {
    pub fn new(sink: Arc<dyn ArtifactSink>, gate: Arc<PublishGate>, settings: UploadSettings) -> Self {
        Self {
            sink,
            gate,
            settings,
        }
    }

    /// Uploads a base64 payload and returns the presigned URL.
    ///
    /// Returns `Ok(None)` without touching the sink when persistence is off.
    pub async fn upload(
        &self,
        payload: &str,
        test_id: Option<String>,
    ) -> ScreenshotResult<Option<String>> {
        if !self.settings.persist {
            debug!("Screenshot persistence is disabled, skipping upload");
            return Ok(None);
        }

        let bytes = BASE64_STANDARD.decode(payload.trim())?;
        let file_name = artifact_file_name(&mut rand::thread_rng());
        let key = artifact_key(chrono::Local::now().date_naive(), &file_name);

        let mut extras = RecordExtras {
            artifact_path: None,
            test_id,
            correlation_id: Some(uuid::Uuid::new_v4().to_string()),
        };

        let uploading = format!(
            "Uploading to {}: {}. Expires in {} seconds.",
            self.sink.name(),
            file_name,
            self.settings.expires_in.as_secs()
        );
        self.gate
            .emit(&LogRecord::meta_info(&self.settings.logger, uploading, extras.clone()))
            .await;

        self.sink.upload(bytes, &key).await?;
        let url = self.sink.presign(&key, self.settings.expires_in).await?;

        extras.artifact_path = Some(url.clone());
        let uploaded = format!("Uploaded to {}: {}", self.sink.name(), file_name);
        self.gate
            .emit(&LogRecord::meta_info(&self.settings.logger, uploaded, extras))
            .await;

        Ok(Some(url))
    }
}

/// Captures screenshots of failed tests and uploads them in the background.
pub struct ScreenshotCapture {
    uploader: Arc<ScreenshotUploader>,
    context: Arc<RunContext>,
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<ScreenshotResult<Option<String>>>>,
    reaped_uploads: AtomicUsize,
}

type UploadOutcome = Result<ScreenshotResult<Option<String>>, tokio::task::JoinError>;

impl ScreenshotCapture {
    /// At most `workers` uploads run at the same time.
    pub fn new(uploader: ScreenshotUploader, context: Arc<RunContext>, workers: usize) -> Self {
        Self {
            uploader: Arc::new(uploader),
            context,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            tasks: Mutex::new(JoinSet::new()),
            reaped_uploads: AtomicUsize::new(0),
        }
    }

    /// Captures a screenshot from every driver implicated in the failure and
    /// submits it for upload. Returns the number of submitted screenshots.
    ///
    /// Drivers are captured concurrently. Capture failures are logged and
    /// skipped.
    pub async fn on_failure(&self, groups: &[Vec<Arc<dyn Driver>>], failure_text: &str) -> usize {
        let drivers = get_failed_drivers(groups, failure_text);
        info!("Test failed, capturing {} screenshot(s)", drivers.len());

        let captures = future::join_all(drivers.iter().map(|driver| driver.screenshot_base64())).await;

        let mut submitted = 0;
        for (driver, capture) in drivers.iter().zip(captures) {
            match capture {
                Ok(payload) => {
                    self.submit(payload);
                    submitted += 1;
                }
                Err(e) => warn!("Failed to capture screenshot from {}: {}", driver, e),
            }
        }
        submitted
    }

    /// Queues a base64 payload for upload, tagged with the current test id.
    pub fn submit(&self, payload: String) {
        self.reap();

        let uploader = Arc::clone(&self.uploader);
        let permits = Arc::clone(&self.permits);
        let test_id = self.context.current_test_id();

        self.lock_tasks().spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return Ok(None);
            };
            uploader.upload(&payload, test_id).await
        });
    }

    /// Collects uploads that already finished, logging their outcome.
    /// Returns how many were collected.
    pub fn reap(&self) -> usize {
        let mut tasks = self.lock_tasks();
        let mut reaped = 0;
        while let Some(joined) = tasks.try_join_next() {
            if log_outcome(joined) {
                self.reaped_uploads.fetch_add(1, Ordering::SeqCst);
            }
            reaped += 1;
        }
        reaped
    }

    /// Number of uploads submitted but not yet collected.
    pub fn pending(&self) -> usize {
        self.lock_tasks().len()
    }

    /// Waits for every submitted upload and returns how many succeeded,
    /// including uploads already collected by [`reap`](Self::reap).
    pub async fn wait(&self) -> usize {
        let mut tasks = std::mem::take(&mut *self.lock_tasks());

        let mut uploaded = self.reaped_uploads.swap(0, Ordering::SeqCst);
        while let Some(joined) = tasks.join_next().await {
            if log_outcome(joined) {
                uploaded += 1;
            }
        }
        uploaded
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, JoinSet<ScreenshotResult<Option<String>>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Returns whether the upload produced a URL.
fn log_outcome(joined: UploadOutcome) -> bool {
    match joined {
        Ok(Ok(Some(url))) => {
            debug!("Screenshot available at {}", url);
            true
        }
        Ok(Ok(None)) => false,
        Ok(Err(e)) => {
            warn!("Failed to upload screenshot: {}", e);
            false
        }
        Err(e) => {
            warn!("Screenshot upload task failed: {}", e);
            false
        }
    }
}
