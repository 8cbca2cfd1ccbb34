//! Transport abstraction over the message broker.
//!
//! The state machine talks to the broker only through these traits, which
//! keeps connection handling testable with in-memory transports. The
//! production implementation lives in [`super::amqp`].

use std::time::Duration;

use async_trait::async_trait;

/// Exchange type retaining the last N messages for late subscribers.
pub const RECENT_HISTORY_EXCHANGE: &str = "x-recent-history";

/// Exchange argument holding the number of retained messages.
pub const RECENT_HISTORY_LENGTH_ARG: &str = "x-recent-history-length";

/// AMQP delivery mode for messages the broker need not persist.
pub const DELIVERY_MODE_TRANSIENT: u8 = 1;

pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Transport failures.
///
/// Every variant except [`TransportError::Disabled`] is a real failure that
/// resets the connection state. `Disabled` means the broker integration is
/// switched off or has no usable coordinates, and records are dropped quietly.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("channel open failed: {0}")]
    ChannelOpen(String),

    #[error("exchange declare failed: {0}")]
    ExchangeDeclare(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("close failed: {0}")]
    Close(String),

    /// Activation finished without reaching a publishable state.
    #[error("transport not ready")]
    NotReady,

    #[error("broker integration disabled: {0}")]
    Disabled(String),
}

impl TransportError {
    pub fn is_disabled(&self) -> bool {
        matches!(self, TransportError::Disabled(_))
    }
}

/// Everything needed to open a broker connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub virtual_host: String,
    /// Heartbeat interval used to detect half-open connections.
    pub heartbeat: Duration,
}

/// Declaration parameters of the log exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeDefinition {
    pub name: String,
    pub kind: String,
    /// Number of messages retained by the recent-history exchange.
    pub history: u32,
    pub durable: bool,
    pub auto_delete: bool,
}

impl ExchangeDefinition {
    /// A non-durable, non-auto-deleted recent-history exchange.
    pub fn recent_history(name: impl Into<String>, history: u32) -> Self {
        Self {
            name: name.into(),
            kind: RECENT_HISTORY_EXCHANGE.to_string(),
            history,
            durable: false,
            auto_delete: false,
        }
    }
}

/// One message handed to [`BrokerChannel::publish`].
///
/// Delivery mode and content type are fixed by the wire contract
/// ([`DELIVERY_MODE_TRANSIENT`], [`CONTENT_TYPE_JSON`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutgoingMessage<'a> {
    pub exchange: &'a str,
    pub routing_key: &'a str,
    pub correlation_id: &'a str,
    pub body: &'a [u8],
}

/// Factory for broker connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens a new connection.
    async fn connect(&self, params: &ConnectionParams) -> TransportResult<Box<dyn BrokerConnection>>;

    /// Transport name (for logging).
    fn name(&self) -> &str;
}

/// An open broker connection.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    fn is_open(&self) -> bool;

    async fn open_channel(&self) -> TransportResult<Box<dyn BrokerChannel>>;

    async fn close(&self) -> TransportResult<()>;
}

/// A channel on a broker connection. Not safe for concurrent publishing;
/// callers serialize access.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    fn is_open(&self) -> bool;

    async fn declare_exchange(&self, definition: &ExchangeDefinition) -> TransportResult<()>;

    async fn publish(&self, message: &OutgoingMessage<'_>) -> TransportResult<()>;

    async fn close(&self) -> TransportResult<()>;
}
