//! Log records flowing through the relay.
//!
//! A [`LogRecord`] is an immutable snapshot of one log event, taken at the
//! moment the event was produced. Records are created either by the tracing
//! bridge ([`crate::layer::RelayLayer`]) or directly by components that need
//! to tag extra data into the log stream, such as the screenshot uploader
//! emitting [`Level::MetaInfo`] records that carry artifact locations.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a log record.
///
/// Mirrors the `tracing` levels plus [`Level::MetaInfo`], a relay-specific
/// level used to tag artifact metadata into the stream. Only `MetaInfo`
/// records can carry a headers block on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    /// Artifact metadata (screenshot locations and their correlation ids).
    MetaInfo,
}

impl Level {
    /// Returns the wire name of the level (e.g. `"META_INFO"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::MetaInfo => "META_INFO",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    /// Accepts wire names and their lower-case forms (`meta_info`, `warn`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TRACE" => Ok(Level::Trace),
            "DEBUG" => Ok(Level::Debug),
            "INFO" => Ok(Level::Info),
            "WARN" | "WARNING" => Ok(Level::Warn),
            "ERROR" => Ok(Level::Error),
            "META_INFO" => Ok(Level::MetaInfo),
            _ => Err(format!("unknown level: {}", s)),
        }
    }
}

impl From<&tracing::Level> for Level {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => Level::Trace,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// Optional attributes attached to a record.
///
/// These end up in the envelope's headers block when the record is a
/// [`Level::MetaInfo`] record and artifact persistence is enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordExtras {
    /// Location of an uploaded artifact (a presigned URL).
    pub artifact_path: Option<String>,

    /// CI test id the artifact belongs to.
    pub test_id: Option<String>,

    /// Id shared by all records describing the same artifact.
    pub correlation_id: Option<String>,
}

impl RecordExtras {
    /// Returns true if no attribute is set.
    pub fn is_empty(&self) -> bool {
        self.artifact_path.is_none() && self.test_id.is_none() && self.correlation_id.is_none()
    }
}

/// A single log event, captured at emit time.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub level: Level,

    /// Logger name. For records produced from `tracing` events this is the
    /// event target (usually the module path).
    pub logger: String,

    pub message: String,

    /// Name of the thread that produced the record.
    pub thread_name: String,

    /// Wall-clock time at which the record was created.
    pub created_at: DateTime<Utc>,

    pub extras: RecordExtras,
}

impl LogRecord {
    /// Creates a record stamped with the current time and thread.
    pub fn new(level: Level, logger: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            logger: logger.into(),
            message: message.into(),
            thread_name: current_thread_name(),
            created_at: Utc::now(),
            extras: RecordExtras::default(),
        }
    }

    /// Creates a [`Level::MetaInfo`] record carrying artifact attributes.
    pub fn meta_info(
        logger: impl Into<String>,
        message: impl Into<String>,
        extras: RecordExtras,
    ) -> Self {
        Self::new(Level::MetaInfo, logger, message).with_extras(extras)
    }

    /// Replaces the extra attributes.
    pub fn with_extras(mut self, extras: RecordExtras) -> Self {
        self.extras = extras;
        self
    }

    /// Overrides the captured thread name.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Overrides the creation time.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Returns a display name for the current thread.
///
/// Rust thread names are usually lower-case (`main`, `tokio-runtime-worker`),
/// which would leave nothing for [`crate::format::thread_tag`] to keep, so
/// names without any upper-case character are converted to PascalCase:
/// `tokio-runtime-worker` becomes `TokioRuntimeWorker`.
pub fn current_thread_name() -> String {
    match std::thread::current().name() {
        Some(name) if name.chars().any(char::is_uppercase) => name.to_string(),
        Some(name) => pascal_case(name),
        None => "UnnamedThread".to_string(),
    }
}

fn pascal_case(name: &str) -> String {
    name.split(|c: char| c == '-' || c == '_' || c == ' ')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_wire_names() {
        assert_eq!(Level::Info.as_str(), "INFO");
        assert_eq!(Level::MetaInfo.to_string(), "META_INFO");
        assert_eq!(
            serde_json::to_string(&Level::MetaInfo).unwrap(),
            "\"META_INFO\""
        );
    }

    #[test]
    fn test_level_from_str() {
        assert_eq!("info".parse::<Level>().unwrap(), Level::Info);
        assert_eq!("warning".parse::<Level>().unwrap(), Level::Warn);
        assert_eq!("META_INFO".parse::<Level>().unwrap(), Level::MetaInfo);
        assert!("verbose".parse::<Level>().is_err());
    }

    #[test]
    fn test_level_from_tracing() {
        assert_eq!(Level::from(&tracing::Level::WARN), Level::Warn);
        assert_eq!(Level::from(&tracing::Level::TRACE), Level::Trace);
    }

    #[test]
    fn test_pascal_case() {
        assert_eq!(pascal_case("main"), "Main");
        assert_eq!(pascal_case("tokio-runtime-worker"), "TokioRuntimeWorker");
        assert_eq!(pascal_case("upload_pool 3"), "UploadPool3");
        assert_eq!(pascal_case(""), "");
    }

    #[test]
    fn test_named_thread_keeps_its_name() {
        let name = std::thread::Builder::new()
            .name("ThreadPoolExecutor-3".to_string())
            .spawn(current_thread_name)
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(name, "ThreadPoolExecutor-3");
    }

    #[test]
    fn test_lowercase_thread_is_converted() {
        let name = std::thread::Builder::new()
            .name("log-delivery".to_string())
            .spawn(current_thread_name)
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(name, "LogDelivery");
    }

    #[test]
    fn test_meta_info_record() {
        let extras = RecordExtras {
            artifact_path: None,
            test_id: Some("t-1".to_string()),
            correlation_id: Some("c-1".to_string()),
        };
        let record = LogRecord::meta_info("zafira", "Uploading", extras.clone());
        assert_eq!(record.level, Level::MetaInfo);
        assert_eq!(record.extras, extras);
        assert!(!record.extras.is_empty());
        assert!(RecordExtras::default().is_empty());
    }
}
