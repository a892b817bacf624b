//! Broadcast Relay
//!
//! Bridges a RabbitMQ fanout exchange to an in-process fan-out service. A
//! single long-lived [`pump::MessagePump`] task owns the broker connection,
//! consumes every broadcast event through an exclusive queue, hands each one
//! to a [`dispatch::MessageHandler`] and acknowledges it. Status events flow
//! the other way through a [`status::StatusPublisher`] on a best-effort basis.
//!
//! # Quick Start
//!
//! ```rust
//! use broadcast_relay::dispatch::{HandlerError, MessageHandler};
//! use broadcast_relay::pump::{MessagePump, PumpSettings, PumpState};
//! use broadcast_relay::status::StatusPublisher;
//! use broadcast_relay::testing::MockBroker;
//! use std::sync::Arc;
//!
//! let handler = |namespace: &str, message: &str| -> Result<(), HandlerError> {
//!     println!("{namespace}: {message}");
//!     Ok(())
//! };
//!
//! let pump = MessagePump::new(
//!     MockBroker::new(),
//!     Arc::new(handler),
//!     StatusPublisher::new("status", false),
//!     PumpSettings::default(),
//! );
//! assert_eq!(pump.state(), PumpState::Disconnected);
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod observability;
pub mod pump;
pub mod status;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, RelayConfig};
pub use dispatch::{BroadcastDispatcher, HandlerError, MessageHandler};
pub use error::RelayError;
pub use pump::{MessagePump, PumpSettings, PumpState};
pub use status::StatusPublisher;
pub use transport::amqp::{AmqpConnector, BrokerEndpoint};
