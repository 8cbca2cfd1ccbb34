//! Logstash-compatible JSON envelope for log records.
//!
//! Every record published to the broker is serialized as a flat JSON object:
//!
//! ```json
//! {
//!   "timestamp": 1700000000123,
//!   "threadName": "MT",
//!   "logger": "zafira",
//!   "message": "Uploaded screenshot",
//!   "level": "META_INFO",
//!   "headers": {
//!     "AMAZON_PATH": "https://...",
//!     "CI_TEST_ID": "...",
//!     "AMAZON_PATH_CORRELATION_ID": "..."
//!   }
//! }
//! ```
//!
//! The `headers` key is only present for [`Level::MetaInfo`] records when
//! artifact persistence is enabled. It is omitted entirely otherwise.

use serde::Serialize;

use crate::record::{Level, LogRecord};

/// Result type for formatting operations.
pub type FormatResult<T> = Result<T, FormatError>;

/// Errors raised while turning a record into bytes.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// The record could not be serialized. Only this record is dropped.
    #[error("Failed to serialize log record: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Process-wide switches that influence the envelope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormatOptions {
    /// Whether screenshots are persisted to the artifact sink. Headers are
    /// only attached when this is on.
    pub persist_artifacts: bool,
}

/// The serialized form of a [`LogRecord`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope<'a> {
    /// Epoch milliseconds.
    pub timestamp: i64,

    #[serde(rename = "threadName")]
    pub thread_tag: String,

    pub logger: &'a str,

    pub message: &'a str,

    pub level: Level,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers<'a>>,
}

/// Artifact attributes attached to meta-info envelopes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Headers<'a> {
    #[serde(rename = "AMAZON_PATH")]
    pub artifact_path: Option<&'a str>,

    #[serde(rename = "CI_TEST_ID")]
    pub test_id: Option<&'a str>,

    #[serde(rename = "AMAZON_PATH_CORRELATION_ID")]
    pub correlation_id: Option<&'a str>,
}

impl<'a> Envelope<'a> {
    /// Builds the envelope for `record`.
    pub fn from_record(record: &'a LogRecord, options: &FormatOptions) -> Self {
        let headers = (record.level == Level::MetaInfo && options.persist_artifacts).then(|| {
            Headers {
                artifact_path: record.extras.artifact_path.as_deref(),
                test_id: record.extras.test_id.as_deref(),
                correlation_id: record.extras.correlation_id.as_deref(),
            }
        });

        Self {
            timestamp: record.created_at.timestamp_millis(),
            thread_tag: thread_tag(&record.thread_name),
            logger: &record.logger,
            message: &record.message,
            level: record.level,
            headers,
        }
    }
}

/// Serializes `record` into the JSON bytes published to the broker.
pub fn format(record: &LogRecord, options: &FormatOptions) -> FormatResult<Vec<u8>> {
    let envelope = Envelope::from_record(record, options);
    Ok(serde_json::to_vec(&envelope)?)
}

/// Abbreviates a thread name to its upper-case characters.
///
/// `MainThread` becomes `MT`, `ThreadPoolExecutor-3` becomes `TPE`.
pub fn thread_tag(thread_name: &str) -> String {
    thread_name.chars().filter(|c| c.is_uppercase()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordExtras;
    use chrono::TimeZone;
    use serde_json::Value;

    fn artifact_extras() -> RecordExtras {
        RecordExtras {
            artifact_path: Some("https://bucket/key.png".to_string()),
            test_id: Some("test-1".to_string()),
            correlation_id: Some("corr-1".to_string()),
        }
    }

    fn to_json(record: &LogRecord, persist_artifacts: bool) -> Value {
        let bytes = format(record, &FormatOptions { persist_artifacts }).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_thread_tag() {
        assert_eq!(thread_tag("MainThread"), "MT");
        assert_eq!(thread_tag("ThreadPoolExecutor-3"), "TPE");
        assert_eq!(thread_tag("Worker-7"), "W");
        assert_eq!(thread_tag("worker"), "");
        assert_eq!(thread_tag(""), "");
    }

    #[test]
    fn test_basic_fields() {
        let created_at = chrono::Utc
            .timestamp_millis_opt(1_700_000_000_123)
            .unwrap();
        let record = LogRecord::new(Level::Info, "zafira", "hello")
            .with_thread_name("MainThread")
            .with_created_at(created_at);

        let json = to_json(&record, false);
        assert_eq!(json["timestamp"], 1_700_000_000_123_i64);
        assert_eq!(json["threadName"], "MT");
        assert_eq!(json["logger"], "zafira");
        assert_eq!(json["message"], "hello");
        assert_eq!(json["level"], "INFO");
        assert!(json.get("headers").is_none());
    }

    #[test]
    fn test_headers_for_meta_info_with_persistence() {
        let record = LogRecord::meta_info("zafira", "Uploaded", artifact_extras());
        let json = to_json(&record, true);

        let headers = &json["headers"];
        assert_eq!(headers["AMAZON_PATH"], "https://bucket/key.png");
        assert_eq!(headers["CI_TEST_ID"], "test-1");
        assert_eq!(headers["AMAZON_PATH_CORRELATION_ID"], "corr-1");
        assert_eq!(json["level"], "META_INFO");
    }

    #[test]
    fn test_no_headers_when_persistence_disabled() {
        let record = LogRecord::meta_info("zafira", "Uploaded", artifact_extras());
        let json = to_json(&record, false);
        assert!(json.get("headers").is_none());
    }

    #[test]
    fn test_no_headers_for_other_levels() {
        for level in [
            Level::Trace,
            Level::Debug,
            Level::Info,
            Level::Warn,
            Level::Error,
        ] {
            let record = LogRecord::new(level, "zafira", "msg").with_extras(artifact_extras());
            let json = to_json(&record, true);
            assert!(json.get("headers").is_none(), "unexpected headers for {level}");
        }
    }

    #[test]
    fn test_missing_artifact_path_is_null() {
        let mut extras = artifact_extras();
        extras.artifact_path = None;
        let record = LogRecord::meta_info("zafira", "Uploading", extras);

        let json = to_json(&record, true);
        assert!(json["headers"]["AMAZON_PATH"].is_null());
        assert_eq!(json["headers"]["CI_TEST_ID"], "test-1");
    }
}
