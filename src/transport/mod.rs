//! Transport layer between the message pump and the broker
//!
//! The pump only talks to these traits. [`amqp`] provides the lapin-backed
//! implementation; `crate::testing::mocks` provides a scriptable one.

use crate::error::RelayError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub mod amqp;

/// One delivery as received from the consumer channel, still undecoded
#[derive(Debug, Clone, PartialEq)]
pub struct InboundDelivery {
    pub delivery_tag: u64,
    pub routing_key: String,
    pub body: Vec<u8>,
}

/// Opens sessions against the broker
///
/// Each call is a single attempt. Retrying is the pump's job.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    type Session: BrokerSession + 'static;

    /// Connect and set up both the consumer and the publisher channel
    ///
    /// Any failure here is reported as [`RelayError::Connection`].
    async fn connect(&self) -> Result<Self::Session, RelayError>;
}

/// A live connection with its consumer and publisher channels
#[async_trait]
pub trait BrokerSession: Send + Sync {
    /// Wait up to `slice` for the next delivery
    ///
    /// `Ok(None)` means nothing arrived in time. An error means the session is
    /// no longer usable.
    async fn next_delivery(
        &mut self,
        slice: Duration,
    ) -> Result<Option<InboundDelivery>, RelayError>;

    /// Acknowledge a single delivery on the consumer channel
    async fn ack(&self, delivery_tag: u64) -> Result<(), RelayError>;

    /// True until a transport or protocol failure has been observed
    fn is_connected(&self) -> bool;

    /// Handle to the publisher channel on this session
    fn status_channel(&self) -> Arc<dyn StatusChannel>;

    /// Best-effort teardown
    async fn close(&mut self);
}

/// Publish path used for status events
#[async_trait]
pub trait StatusChannel: Send + Sync {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
    ) -> Result<(), RelayError>;

    fn is_open(&self) -> bool;
}
