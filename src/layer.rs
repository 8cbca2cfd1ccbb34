//! Tracing bridge: turns `tracing` events into broker records.
//!
//! ```text
//! tracing::info!("...")
//!        │
//!        ▼
//!   RelayLayer::on_event()          (caller's thread, never blocks)
//!        │
//!        ▼
//!   RecordSender::try_send() ──► bounded queue ──► delivery task
//!        │                                             │
//!        └── queue full: record dropped                ▼
//!                                              PublishGate::emit()
//! ```
//!
//! Events from this crate and from the transport stack are skipped, otherwise
//! a failing publish would log, which would publish, which would fail again.
//!
//! Events carrying `meta_info = true` become [`Level::MetaInfo`] records. The
//! `artifact_path`, `test_id` and `correlation_id` fields fill the record
//! extras:
//!
//! ```no_run
//! tracing::info!(
//!     meta_info = true,
//!     artifact_path = "https://bucket/key.png",
//!     test_id = "t-1",
//!     "Uploaded screenshot"
//! );
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::field::{Field, Visit};
use tracing_subscriber::Layer;

use crate::broker::PublishGate;
use crate::record::{Level, LogRecord, RecordExtras};

/// Target prefix of this crate's own events; always ignored.
pub const OWN_TARGET: &str = "zafira_relay";

const META_INFO_FIELD: &str = "meta_info";
const ARTIFACT_PATH_FIELD: &str = "artifact_path";
const TEST_ID_FIELD: &str = "test_id";
const CORRELATION_ID_FIELD: &str = "correlation_id";

/// Creates the bounded queue between the layer and the delivery task.
pub fn record_channel(capacity: usize) -> (RecordSender, mpsc::Receiver<LogRecord>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let sender = RecordSender {
        tx,
        dropped: Arc::new(AtomicU64::new(0)),
    };
    (sender, rx)
}

/// Producer side of the record queue.
#[derive(Debug, Clone)]
pub struct RecordSender {
    tx: mpsc::Sender<LogRecord>,
    dropped: Arc<AtomicU64>,
}

impl RecordSender {
    /// Queues `record` without waiting. Returns false if it was dropped
    /// because the queue is full or the delivery task is gone.
    pub fn try_send(&self, record: LogRecord) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Number of records dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Collects the message, the record extras and any other fields of an event.
#[derive(Default)]
struct RecordVisitor {
    message: String,
    fields: Vec<String>,
    extras: RecordExtras,
    meta_info: bool,
}

impl RecordVisitor {
    /// "message key=val key=val ..."
    fn finish(self) -> (String, RecordExtras, bool) {
        let message = if self.fields.is_empty() {
            self.message
        } else {
            format!("{} {}", self.message, self.fields.join(" "))
        };
        (message, self.extras, self.meta_info)
    }

    fn record_value(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = value,
            ARTIFACT_PATH_FIELD => self.extras.artifact_path = Some(value),
            TEST_ID_FIELD => self.extras.test_id = Some(value),
            CORRELATION_ID_FIELD => self.extras.correlation_id = Some(value),
            name => self.fields.push(format!("{}={}", name, value)),
        }
    }
}

impl Visit for RecordVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record_value(field, format!("{:?}", value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_value(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == META_INFO_FIELD {
            self.meta_info = value;
        } else {
            self.record_value(field, value.to_string());
        }
    }
}

/// Tracing layer that queues events for the broker.
///
/// Attach it to the subscriber alongside the fmt layer.
pub struct RelayLayer {
    sender: RecordSender,
    ignored_targets: Vec<String>,
    max_level: tracing::Level,
}

impl RelayLayer {
    pub fn new(sender: RecordSender) -> Self {
        Self {
            sender,
            ignored_targets: vec![OWN_TARGET.to_string()],
            max_level: tracing::Level::TRACE,
        }
    }

    /// Skips events whose target is, or is nested under, one of `targets`.
    pub fn with_ignored_targets<I, T>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.ignored_targets.extend(targets.into_iter().map(Into::into));
        self
    }

    /// Only forwards events at `level` or more severe.
    pub fn with_max_level(mut self, level: tracing::Level) -> Self {
        self.max_level = level;
        self
    }

    fn is_ignored(&self, target: &str) -> bool {
        self.ignored_targets.iter().any(|prefix| {
            target
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
        })
    }
}

impl<S: tracing::Subscriber> Layer<S> for RelayLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let metadata = event.metadata();

        if *metadata.level() > self.max_level || self.is_ignored(metadata.target()) {
            return;
        }

        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);
        let (message, extras, meta_info) = visitor.finish();

        let level = if meta_info {
            Level::MetaInfo
        } else {
            Level::from(metadata.level())
        };
        let record = LogRecord::new(level, metadata.target(), message).with_extras(extras);

        self.sender.try_send(record);
    }
}

/// Spawns the task draining the queue into `gate`.
///
/// On cancellation the queue is closed and the records already queued are
/// still delivered before the task ends.
pub fn spawn_delivery(
    gate: Arc<PublishGate>,
    mut rx: mpsc::Receiver<LogRecord>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                record = rx.recv() => match record {
                    Some(record) => gate.emit(&record).await,
                    None => return,
                },
            }
        }

        rx.close();
        while let Some(record) = rx.recv().await {
            gate.emit(&record).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::testing::{MockBroker, coordinates};
    use crate::broker::{BrokerSettings, StateMachine};
    use crate::context::RunContext;
    use crate::format::FormatOptions;
    use tracing_subscriber::layer::SubscriberExt;

    fn capture(layer: RelayLayer, f: impl FnOnce()) {
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, f);
    }

    #[test]
    fn test_event_becomes_record() {
        let (sender, mut rx) = record_channel(8);

        capture(RelayLayer::new(sender), || {
            tracing::warn!(target: "app::login", user = "alice", "login slow");
        });

        let record = rx.try_recv().unwrap();
        assert_eq!(record.level, Level::Warn);
        assert_eq!(record.logger, "app::login");
        assert_eq!(record.message, "login slow user=alice");
        assert!(record.extras.is_empty());
    }

    #[test]
    fn test_meta_info_event_carries_extras() {
        let (sender, mut rx) = record_channel(8);

        capture(RelayLayer::new(sender), || {
            tracing::info!(
                target: "app",
                meta_info = true,
                artifact_path = "https://bucket/key.png",
                test_id = "t-1",
                correlation_id = "c-1",
                "Uploaded screenshot"
            );
        });

        let record = rx.try_recv().unwrap();
        assert_eq!(record.level, Level::MetaInfo);
        assert_eq!(record.message, "Uploaded screenshot");
        assert_eq!(
            record.extras.artifact_path.as_deref(),
            Some("https://bucket/key.png")
        );
        assert_eq!(record.extras.test_id.as_deref(), Some("t-1"));
        assert_eq!(record.extras.correlation_id.as_deref(), Some("c-1"));
    }

    #[test]
    fn test_ignored_targets() {
        let (sender, mut rx) = record_channel(8);
        let layer = RelayLayer::new(sender).with_ignored_targets(["lapin"]);

        capture(layer, || {
            tracing::error!(target: "zafira_relay::broker::gate", "own event");
            tracing::error!(target: "lapin::channel", "transport event");
            tracing::error!(target: "lapin", "transport root event");
            tracing::error!(target: "lapinx", "unrelated event");
        });

        let record = rx.try_recv().unwrap();
        assert_eq!(record.message, "unrelated event");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_max_level() {
        let (sender, mut rx) = record_channel(8);
        let layer = RelayLayer::new(sender).with_max_level(tracing::Level::INFO);

        capture(layer, || {
            tracing::debug!(target: "app", "noise");
            tracing::info!(target: "app", "signal");
        });

        assert_eq!(rx.try_recv().unwrap().message, "signal");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_full_queue_drops_records() {
        let (sender, mut rx) = record_channel(2);
        let counter = sender.clone();

        capture(RelayLayer::new(sender), || {
            for i in 0..5 {
                tracing::info!(target: "app", "event {}", i);
            }
        });

        assert_eq!(counter.dropped(), 3);
        assert_eq!(rx.try_recv().unwrap().message, "event 0");
        assert_eq!(rx.try_recv().unwrap().message, "event 1");
    }

    #[tokio::test]
    async fn test_delivery_drains_queue_on_cancel() {
        let broker = MockBroker::new();
        let machine = StateMachine::new(broker.transport(), None, BrokerSettings::default())
            .with_coordinates(Some(coordinates()));
        let gate = Arc::new(PublishGate::new(
            machine,
            Arc::new(RunContext::new("run-1")),
            FormatOptions::default(),
        ));

        let (sender, rx) = record_channel(16);
        for i in 0..10 {
            assert!(sender.try_send(LogRecord::new(Level::Info, "app", format!("record {}", i))));
        }

        let cancel = CancellationToken::new();
        cancel.cancel();
        spawn_delivery(gate, rx, cancel).await.unwrap();

        assert_eq!(broker.published().len(), 10);
        assert!(!sender.try_send(LogRecord::new(Level::Info, "app", "late")));
    }

    #[tokio::test]
    async fn test_delivery_ends_when_senders_drop() {
        let broker = MockBroker::new();
        let machine = StateMachine::new(broker.transport(), None, BrokerSettings::default())
            .with_coordinates(Some(coordinates()));
        let gate = Arc::new(PublishGate::new(
            machine,
            Arc::new(RunContext::new("run-1")),
            FormatOptions::default(),
        ));

        let (sender, rx) = record_channel(16);
        let handle = spawn_delivery(gate, rx, CancellationToken::new());
        sender.try_send(LogRecord::new(Level::Info, "app", "only"));
        drop(sender);

        handle.await.unwrap();
        assert_eq!(broker.published().len(), 1);
    }
}
