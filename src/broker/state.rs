//! Connection / channel / exchange lifecycle.
//!
//! ```text
//!                 connect            open_channel          declare_exchange
//!  Disconnected ──────────► Connected ────────────► ChannelReady ─────────────► ExchangeDeclared
//!       ▲                       │                        │                            │
//!       └───────────────────────┴──────── reset() ───────┴────────────────────────────┘
//! ```
//!
//! Handles live inside the [`TransportState`] variants, so a channel without
//! a connection cannot be represented. A failed step during
//! [`StateMachine::activate`] keeps the steps already reached; the next
//! activation resumes from there. [`StateMachine::reset`] drops everything,
//! including the exchange declaration, which is tracked per channel.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use super::resolver::{BrokerCoordinates, CoordinateResolver};
use super::transport::{
    BrokerChannel, BrokerConnection, ConnectionParams, ExchangeDefinition, Transport, TransportError,
    TransportResult,
};
use crate::config::BrokerConfig;

/// Broker settings that do not come from the reporting service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    pub exchange: ExchangeDefinition,
    pub password: String,
    pub virtual_host: String,
    pub heartbeat: Duration,
    /// Local override of the remote enabled flag.
    pub enabled_override: Option<bool>,
}

impl BrokerSettings {
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            exchange: ExchangeDefinition::recent_history(config.exchange.clone(), config.history),
            password: config.password.clone(),
            virtual_host: config.virtual_host.clone(),
            heartbeat: config.heartbeat(),
            enabled_override: config.enabled,
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self::from_config(&BrokerConfig::default())
    }
}

/// How far the transport has been brought up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Disconnected,
    Connected,
    ChannelReady,
    ExchangeDeclared,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Disconnected => "disconnected",
            Phase::Connected => "connected",
            Phase::ChannelReady => "channel ready",
            Phase::ExchangeDeclared => "exchange declared",
        };
        f.write_str(name)
    }
}

/// Transport handles, by phase.
#[derive(Default)]
pub enum TransportState {
    #[default]
    Disconnected,
    Connected(Box<dyn BrokerConnection>),
    ChannelReady(Box<dyn BrokerConnection>, Box<dyn BrokerChannel>),
    ExchangeDeclared(Box<dyn BrokerConnection>, Box<dyn BrokerChannel>),
}

type Parts = (
    Option<Box<dyn BrokerConnection>>,
    Option<Box<dyn BrokerChannel>>,
    bool,
);

impl TransportState {
    pub fn phase(&self) -> Phase {
        match self {
            TransportState::Disconnected => Phase::Disconnected,
            TransportState::Connected(_) => Phase::Connected,
            TransportState::ChannelReady(..) => Phase::ChannelReady,
            TransportState::ExchangeDeclared(..) => Phase::ExchangeDeclared,
        }
    }

    /// Exchange declared and both handles still open.
    pub fn is_ready(&self) -> bool {
        match self {
            TransportState::ExchangeDeclared(connection, channel) => {
                connection.is_open() && channel.is_open()
            }
            _ => false,
        }
    }

    /// Splits into (connection, channel, exchange declared).
    fn into_parts(self) -> Parts {
        match self {
            TransportState::Disconnected => (None, None, false),
            TransportState::Connected(connection) => (Some(connection), None, false),
            TransportState::ChannelReady(connection, channel) => {
                (Some(connection), Some(channel), false)
            }
            TransportState::ExchangeDeclared(connection, channel) => {
                (Some(connection), Some(channel), true)
            }
        }
    }
}

impl fmt::Debug for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TransportState").field(&self.phase()).finish()
    }
}

/// Owns the broker coordinates and the transport state.
///
/// Not synchronized itself; the [`PublishGate`](super::gate::PublishGate)
/// holds it behind its publish lock.
pub struct StateMachine {
    transport: Arc<dyn Transport>,
    resolver: Option<CoordinateResolver>,
    settings: BrokerSettings,
    coordinates: Option<BrokerCoordinates>,
    state: TransportState,
}

impl StateMachine {
    /// Creates a disconnected state machine. Coordinates are resolved on the
    /// first activation.
    pub fn new(
        transport: Arc<dyn Transport>,
        resolver: Option<CoordinateResolver>,
        settings: BrokerSettings,
    ) -> Self {
        Self {
            transport,
            resolver,
            settings,
            coordinates: None,
            state: TransportState::Disconnected,
        }
    }

    /// Creates a state machine and resolves the coordinates right away.
    pub async fn initialize(
        transport: Arc<dyn Transport>,
        resolver: CoordinateResolver,
        settings: BrokerSettings,
    ) -> Self {
        let coordinates = resolver.resolve().await;
        Self::new(transport, Some(resolver), settings).with_coordinates(coordinates)
    }

    /// Uses already known coordinates instead of asking the resolver.
    pub fn with_coordinates(mut self, coordinates: Option<BrokerCoordinates>) -> Self {
        self.coordinates = coordinates;
        self
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    pub fn coordinates(&self) -> Option<&BrokerCoordinates> {
        self.coordinates.as_ref()
    }

    /// Name of the exchange messages are published to.
    pub fn exchange(&self) -> &str {
        &self.settings.exchange.name
    }

    /// Whether the broker integration is switched on, as far as is known.
    pub fn is_enabled(&self) -> bool {
        self.connection_params().is_ok()
    }

    /// Brings the transport up to [`Phase::ExchangeDeclared`], logging any
    /// failure instead of returning it.
    pub async fn activate(&mut self) {
        match self.try_activate().await {
            Ok(()) => {}
            Err(e) if e.is_disabled() => info!("[mq] {}", e),
            Err(e) => error!("[mq] {}", e),
        }
    }

    /// Brings the transport up to [`Phase::ExchangeDeclared`].
    ///
    /// Steps that are already done (open connection, open channel, exchange
    /// declared on that channel) are skipped. On failure the state keeps the
    /// last step reached and the error names the failed step.
    pub async fn try_activate(&mut self) -> TransportResult<()> {
        if self.state.is_ready() {
            return Ok(());
        }

        if self.coordinates.is_none()
            && let Some(resolver) = &self.resolver
        {
            self.coordinates = resolver.resolve().await;
        }

        let params = match self.connection_params() {
            Ok(params) => params,
            Err(e) => {
                self.reset();
                return Err(e);
            }
        };

        let (connection, channel, declared) = std::mem::take(&mut self.state).into_parts();

        let (connection, connection_reused) = match connection {
            Some(connection) if connection.is_open() => (connection, true),
            _ => {
                let connection = self.transport.connect(&params).await?;
                info!("[mq] connect success via {}", self.transport.name());
                (connection, false)
            }
        };

        let (channel, channel_reused) = match channel {
            Some(channel) if connection_reused && channel.is_open() => (channel, true),
            _ => match connection.open_channel().await {
                Ok(channel) => (channel, false),
                Err(e) => {
                    self.state = TransportState::Connected(connection);
                    return Err(e);
                }
            },
        };

        if !(declared && channel_reused) {
            if let Err(e) = channel.declare_exchange(&self.settings.exchange).await {
                self.state = TransportState::ChannelReady(connection, channel);
                return Err(e);
            }
            info!("[mq] declare exchange '{}' success", self.settings.exchange.name);
        }

        self.state = TransportState::ExchangeDeclared(connection, channel);
        Ok(())
    }

    /// Drops connection and channel. The next activation starts from scratch,
    /// including a fresh exchange declaration.
    pub fn reset(&mut self) {
        if self.state.phase() != Phase::Disconnected {
            debug!("[mq] resetting transport from {}", self.state.phase());
        }
        self.state = TransportState::Disconnected;
    }

    /// Closes the channel, then the connection. Each failure is logged on its
    /// own and does not prevent the other close.
    pub async fn close(&mut self) {
        let (connection, channel, _) = std::mem::take(&mut self.state).into_parts();

        if let Some(channel) = channel
            && channel.is_open()
            && let Err(e) = channel.close().await
        {
            error!("[mq] unable to close channel: {}", e);
        }

        if let Some(connection) = connection
            && connection.is_open()
            && let Err(e) = connection.close().await
        {
            error!("[mq] unable to close connection: {}", e);
        }

        debug!("[mq] cleanup finished");
    }

    /// The channel to publish on, once the exchange is declared.
    pub(crate) fn publish_channel(&self) -> Option<&dyn BrokerChannel> {
        match &self.state {
            TransportState::ExchangeDeclared(_, channel) => Some(channel.as_ref()),
            _ => None,
        }
    }

    fn connection_params(&self) -> TransportResult<ConnectionParams> {
        let Some(coordinates) = &self.coordinates else {
            return Err(TransportError::Disabled(
                "broker coordinates unavailable".to_string(),
            ));
        };

        if !self.settings.enabled_override.unwrap_or(coordinates.enabled) {
            return Err(TransportError::Disabled(
                "switched off by configuration".to_string(),
            ));
        }

        match (&coordinates.host, coordinates.port, &coordinates.user) {
            (Some(host), Some(port), Some(user)) => Ok(ConnectionParams {
                host: host.clone(),
                port,
                user: user.clone(),
                password: self.settings.password.clone(),
                virtual_host: self.settings.virtual_host.clone(),
                heartbeat: self.settings.heartbeat,
            }),
            _ => Err(TransportError::Disabled(format!(
                "broker {} is not configured",
                coordinates.missing().unwrap_or("address")
            ))),
        }
    }
}
