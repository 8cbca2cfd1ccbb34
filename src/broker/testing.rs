//! In-memory broker used by the state machine and publish gate tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::resolver::BrokerCoordinates;
use super::transport::{
    BrokerChannel, BrokerConnection, ConnectionParams, ExchangeDefinition, OutgoingMessage, Transport,
    TransportError, TransportResult,
};

/// Complete, enabled coordinates.
pub fn coordinates() -> BrokerCoordinates {
    BrokerCoordinates {
        host: Some("mq.local".to_string()),
        port: Some(5672),
        user: Some("qa".to_string()),
        enabled: true,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect,
    OpenChannel,
    DeclareExchange(String),
    Publish {
        exchange: String,
        routing_key: String,
        correlation_id: String,
        body: Vec<u8>,
    },
    CloseChannel,
    CloseConnection,
}

/// Records every transport call and injects failures on demand.
#[derive(Default)]
pub struct MockBroker {
    calls: Mutex<Vec<Call>>,
    generation: AtomicUsize,
    pub refuse_connect: AtomicBool,
    pub fail_channel: AtomicBool,
    pub fail_declare: AtomicBool,
    pub fail_publish: AtomicBool,
    in_flight: AtomicBool,
    overlaps: AtomicUsize,
}

impl MockBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn transport(self: &Arc<Self>) -> Arc<dyn Transport> {
        Arc::new(MockTransport {
            broker: Arc::clone(self),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| predicate(c)).count()
    }

    pub fn published(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Publish { .. }))
            .collect()
    }

    /// Simulates the broker dropping every open connection and channel.
    pub fn drop_connections(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of publishes that started while another was still running.
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn alive(&self, generation: usize) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }
}

struct MockTransport {
    broker: Arc<MockBroker>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, _params: &ConnectionParams) -> TransportResult<Box<dyn BrokerConnection>> {
        self.broker.record(Call::Connect);
        if self.broker.refuse_connect.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("connection refused".to_string()));
        }
        Ok(Box::new(MockConnection {
            broker: Arc::clone(&self.broker),
            generation: self.broker.generation.load(Ordering::SeqCst),
        }))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

struct MockConnection {
    broker: Arc<MockBroker>,
    generation: usize,
}

#[async_trait]
impl BrokerConnection for MockConnection {
    fn is_open(&self) -> bool {
        self.broker.alive(self.generation)
    }

    async fn open_channel(&self) -> TransportResult<Box<dyn BrokerChannel>> {
        self.broker.record(Call::OpenChannel);
        if self.broker.fail_channel.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelOpen("channel error".to_string()));
        }
        Ok(Box::new(MockChannel {
            broker: Arc::clone(&self.broker),
            generation: self.generation,
        }))
    }

    async fn close(&self) -> TransportResult<()> {
        self.broker.record(Call::CloseConnection);
        Ok(())
    }
}

struct MockChannel {
    broker: Arc<MockBroker>,
    generation: usize,
}

#[async_trait]
impl BrokerChannel for MockChannel {
    fn is_open(&self) -> bool {
        self.broker.alive(self.generation)
    }

    async fn declare_exchange(&self, definition: &ExchangeDefinition) -> TransportResult<()> {
        self.broker.record(Call::DeclareExchange(definition.name.clone()));
        if self.broker.fail_declare.load(Ordering::SeqCst) {
            return Err(TransportError::ExchangeDeclare("precondition failed".to_string()));
        }
        Ok(())
    }

    async fn publish(&self, message: &OutgoingMessage<'_>) -> TransportResult<()> {
        if self.broker.in_flight.swap(true, Ordering::SeqCst) {
            self.broker.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        tokio::task::yield_now().await;

        let result = if self.broker.fail_publish.load(Ordering::SeqCst) || !self.is_open() {
            Err(TransportError::Publish("channel closed".to_string()))
        } else {
            self.broker.record(Call::Publish {
                exchange: message.exchange.to_string(),
                routing_key: message.routing_key.to_string(),
                correlation_id: message.correlation_id.to_string(),
                body: message.body.to_vec(),
            });
            Ok(())
        };

        self.broker.in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn close(&self) -> TransportResult<()> {
        self.broker.record(Call::CloseChannel);
        Ok(())
    }
}
