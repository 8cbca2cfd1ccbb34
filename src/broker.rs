//! Broker side of the relay: coordinates, connection lifecycle, publishing.
//!
//! Records reach the broker through a [`PublishGate`], which owns a
//! [`StateMachine`] behind a single lock. The state machine brings the
//! transport up lazily and tears it down on the first failure; the next emit
//! rebuilds it.
//!
//! ```text
//!  emit(record) ──► PublishGate ─── lock ───► StateMachine
//!                       │                          │
//!                       │ format                   │ resolve (reporting service)
//!                       ▼                          ▼
//!                  JSON envelope            CoordinateResolver
//!                       │                          │
//!                       ▼                          ▼
//!               BrokerChannel::publish ◄── Transport::connect
//!                                              open_channel
//!                                              declare_exchange
//! ```
//!
//! # Transports
//!
//! | Transport | Module | Description |
//! |-----------|--------|-------------|
//! | AMQP | [`amqp`] | RabbitMQ via `lapin` |
//!
//! Other transports implement [`Transport`], [`BrokerConnection`] and
//! [`BrokerChannel`].
//!
//! # Error Handling
//!
//! Transport operations return [`TransportResult<T>`]. Nothing in this module
//! propagates an error into a logging call site: the gate resets the state
//! machine and hands the failure to its [`ErrorReporter`].

pub mod amqp;
pub mod gate;
pub mod resolver;
pub mod state;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use amqp::AmqpTransport;
pub use gate::{EmitError, ErrorReporter, PublishGate, TracingErrorReporter};
pub use resolver::{BrokerCoordinates, CoordinateResolver};
pub use state::{BrokerSettings, Phase, StateMachine, TransportState};
pub use transport::{
    BrokerChannel, BrokerConnection, ConnectionParams, ExchangeDefinition, OutgoingMessage, Transport,
    TransportError, TransportResult,
};
