//! Serialized publishing onto the single broker channel.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::error;

use super::state::{Phase, StateMachine};
use super::transport::{OutgoingMessage, TransportError};
use crate::context::RunContext;
use crate::format::{self, FormatError, FormatOptions};
use crate::record::LogRecord;

/// Target of the diagnostics logged for records that could not be delivered.
pub const FALLBACK_TARGET: &str = "zafira_relay::fallback";

/// Why a record was not published.
#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Format(#[from] FormatError),
}

impl EmitError {
    /// The broker integration is switched off; the record is dropped quietly.
    pub fn is_disabled(&self) -> bool {
        matches!(self, EmitError::Transport(e) if e.is_disabled())
    }
}

/// Receives every record the gate failed to publish, once per failure.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, record: &LogRecord, error: &EmitError);
}

/// Logs undeliverable records through `tracing` under [`FALLBACK_TARGET`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingErrorReporter;

impl ErrorReporter for TracingErrorReporter {
    fn report(&self, record: &LogRecord, error: &EmitError) {
        error!(
            target: FALLBACK_TARGET,
            "[mq] dropped {} record from '{}': {}", record.level, record.logger, error
        );
    }
}

/// Publishes records to the broker, one at a time.
///
/// A single lock guards the state machine for the whole publish path, so a
/// reconnect and the publish that follows it are never interleaved with
/// another emit. [`PublishGate::emit`] never fails: transport errors reset the
/// state machine and are handed to the [`ErrorReporter`].
pub struct PublishGate {
    machine: Mutex<StateMachine>,
    context: Arc<RunContext>,
    options: FormatOptions,
    reporter: Arc<dyn ErrorReporter>,
}

impl PublishGate {
    pub fn new(machine: StateMachine, context: Arc<RunContext>, options: FormatOptions) -> Self {
        Self {
            machine: Mutex::new(machine),
            context,
            options,
            reporter: Arc::new(TracingErrorReporter),
        }
    }

    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn context(&self) -> &Arc<RunContext> {
        &self.context
    }

    pub fn format_options(&self) -> FormatOptions {
        self.options
    }

    /// Publishes `record`, activating the transport first if needed.
    ///
    /// Records are dropped silently while the broker integration is disabled.
    /// Any other failure is reported exactly once.
    pub async fn emit(&self, record: &LogRecord) {
        match self.try_emit(record).await {
            Ok(()) => {}
            Err(e) if e.is_disabled() => {}
            Err(e) => self.reporter.report(record, &e),
        }
    }

    /// Like [`PublishGate::emit`], but returns the failure instead of
    /// reporting it.
    ///
    /// A record that fails to serialize leaves the transport up; only
    /// activation and publish failures reset the state machine.
    pub async fn try_emit(&self, record: &LogRecord) -> Result<(), EmitError> {
        let correlation_id = self.context.correlation_id();

        let mut machine = self.machine.lock().await;

        if !machine.is_ready()
            && let Err(e) = machine.try_activate().await
        {
            machine.reset();
            return Err(e.into());
        }

        // A record that cannot be serialized says nothing about the transport
        let body = format::format(record, &self.options)?;

        let Some(channel) = machine.publish_channel() else {
            machine.reset();
            return Err(TransportError::NotReady.into());
        };
        let message = OutgoingMessage {
            exchange: machine.exchange(),
            routing_key: self.context.routing_key(),
            correlation_id: &correlation_id,
            body: &body,
        };
        let result = channel.publish(&message).await;

        if let Err(e) = result {
            machine.reset();
            return Err(e.into());
        }
        Ok(())
    }

    /// Brings the transport up ahead of the first emit.
    pub async fn activate(&self) {
        self.machine.lock().await.activate().await;
    }

    /// Closes channel and connection. Later emits reconnect.
    pub async fn close(&self) {
        self.machine.lock().await.close().await;
    }

    pub async fn phase(&self) -> Phase {
        self.machine.lock().await.phase()
    }

    pub async fn is_enabled(&self) -> bool {
        self.machine.lock().await.is_enabled()
    }
}
