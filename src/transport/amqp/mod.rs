//! AMQP transport built on lapin
//!
//! # Architecture
//!
//! - [`connection`] - endpoint validation, URI construction and the physical connection
//! - [`consumer`] - fanout subscription with prefetch 1 and explicit acknowledgments
//! - [`publisher`] - dedicated channel for status events
//! - [`session`] - joins the three behind [`crate::transport::BrokerConnector`]
//!
//! # Usage
//!
//! ```rust,no_run
//! use broadcast_relay::config::AmqpSection;
//! use broadcast_relay::transport::amqp::{AmqpConnector, BrokerEndpoint};
//! use broadcast_relay::transport::BrokerConnector;
//!
//! # async fn demo(section: AmqpSection) -> Result<(), Box<dyn std::error::Error>> {
//! let endpoint = BrokerEndpoint::from_config(&section)?;
//! let connector = AmqpConnector::new(endpoint);
//! let _session = connector.connect().await?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod consumer;
pub mod publisher;
pub mod session;

pub use connection::{BrokerEndpoint, ConnectionManager};
pub use consumer::{ConsumerChannel, PREFETCH_COUNT};
pub use publisher::PublisherChannel;
pub use session::{AmqpConnector, AmqpSession};
