//! AMQP 0-9-1 transport backed by `lapin`.

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ExchangeDeclareOptions};
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::uri::{AMQPAuthority, AMQPQueryString, AMQPUri, AMQPUserInfo};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tracing::debug;

use super::transport::{
    BrokerChannel, BrokerConnection, CONTENT_TYPE_JSON, ConnectionParams, DELIVERY_MODE_TRANSIENT,
    ExchangeDefinition, OutgoingMessage, RECENT_HISTORY_LENGTH_ARG, Transport, TransportError,
    TransportResult,
};

const REPLY_SUCCESS: u16 = 200;

/// Connects to a RabbitMQ-compatible broker.
#[derive(Debug, Clone, Default)]
pub struct AmqpTransport;

impl AmqpTransport {
    pub fn new() -> Self {
        Self
    }
}

/// Builds the connection URI without going through string formatting, so
/// credentials and vhost need no percent-encoding.
fn amqp_uri(params: &ConnectionParams) -> AMQPUri {
    let heartbeat = u16::try_from(params.heartbeat.as_secs()).unwrap_or(u16::MAX);
    AMQPUri {
        authority: AMQPAuthority {
            userinfo: AMQPUserInfo {
                username: params.user.clone(),
                password: params.password.clone(),
            },
            host: params.host.clone(),
            port: params.port,
        },
        vhost: params.virtual_host.clone(),
        query: AMQPQueryString {
            heartbeat: Some(heartbeat),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[async_trait]
impl Transport for AmqpTransport {
    async fn connect(&self, params: &ConnectionParams) -> TransportResult<Box<dyn BrokerConnection>> {
        debug!(
            "Connecting to amqp://{}@{}:{}",
            params.user, params.host, params.port
        );
        let connection = Connection::connect_uri(amqp_uri(params), ConnectionProperties::default())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(Box::new(AmqpConnection { inner: connection }))
    }

    fn name(&self) -> &str {
        "amqp"
    }
}

struct AmqpConnection {
    inner: Connection,
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    fn is_open(&self) -> bool {
        self.inner.status().connected()
    }

    async fn open_channel(&self) -> TransportResult<Box<dyn BrokerChannel>> {
        let channel = self
            .inner
            .create_channel()
            .await
            .map_err(|e| TransportError::ChannelOpen(e.to_string()))?;
        Ok(Box::new(AmqpChannel { inner: channel }))
    }

    async fn close(&self) -> TransportResult<()> {
        self.inner
            .close(REPLY_SUCCESS, "relay shutdown")
            .await
            .map_err(|e| TransportError::Close(e.to_string()))
    }
}

struct AmqpChannel {
    inner: Channel,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    fn is_open(&self) -> bool {
        self.inner.status().connected()
    }

    async fn declare_exchange(&self, definition: &ExchangeDefinition) -> TransportResult<()> {
        let mut arguments = FieldTable::default();
        arguments.insert(
            ShortString::from(RECENT_HISTORY_LENGTH_ARG),
            AMQPValue::LongInt(i32::try_from(definition.history).unwrap_or(i32::MAX)),
        );
        let options = ExchangeDeclareOptions {
            durable: definition.durable,
            auto_delete: definition.auto_delete,
            ..Default::default()
        };
        self.inner
            .exchange_declare(
                &definition.name,
                ExchangeKind::Custom(definition.kind.clone()),
                options,
                arguments,
            )
            .await
            .map_err(|e| TransportError::ExchangeDeclare(e.to_string()))
    }

    async fn publish(&self, message: &OutgoingMessage<'_>) -> TransportResult<()> {
        let properties = BasicProperties::default()
            .with_delivery_mode(DELIVERY_MODE_TRANSIENT)
            .with_correlation_id(ShortString::from(message.correlation_id))
            .with_content_type(ShortString::from(CONTENT_TYPE_JSON));

        self.inner
            .basic_publish(
                message.exchange,
                message.routing_key,
                BasicPublishOptions::default(),
                message.body,
                properties,
            )
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) -> TransportResult<()> {
        self.inner
            .close(REPLY_SUCCESS, "relay shutdown")
            .await
            .map_err(|e| TransportError::Close(e.to_string()))
    }
}
