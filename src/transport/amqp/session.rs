//! Lapin-backed implementation of the transport traits

use super::connection::{BrokerEndpoint, ConnectionManager};
use super::consumer::ConsumerChannel;
use super::publisher::PublisherChannel;
use crate::error::RelayError;
use crate::transport::{BrokerConnector, BrokerSession, InboundDelivery, StatusChannel};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// Opens one [`AmqpSession`] per connect attempt
pub struct AmqpConnector {
    endpoint: BrokerEndpoint,
}

impl AmqpConnector {
    pub fn new(endpoint: BrokerEndpoint) -> Self {
        Self { endpoint }
    }

    async fn open_channels(
        &self,
        connection: &ConnectionManager,
    ) -> Result<(ConsumerChannel, PublisherChannel), RelayError> {
        let publisher = PublisherChannel::open(connection).await?;
        let consumer = ConsumerChannel::setup(connection, &self.endpoint.broadcast_exchange).await?;
        Ok((consumer, publisher))
    }
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    type Session = AmqpSession;

    async fn connect(&self) -> Result<AmqpSession, RelayError> {
        let span = crate::amqp_span!(broker = %self.endpoint.display_uri());
        async {
            let connection = ConnectionManager::connect(&self.endpoint).await?;

            match self.open_channels(&connection).await {
                Ok((consumer, publisher)) => Ok(AmqpSession {
                    connection,
                    consumer,
                    publisher: Arc::new(publisher),
                }),
                Err(error) => {
                    connection.close().await;
                    Err(error)
                }
            }
        }
        .instrument(span)
        .await
    }
}

/// Connection plus consumer and publisher channels, owned by the pump
pub struct AmqpSession {
    connection: ConnectionManager,
    consumer: ConsumerChannel,
    publisher: Arc<PublisherChannel>,
}

impl AmqpSession {
    pub fn queue_name(&self) -> &str {
        self.consumer.queue_name()
    }
}

#[async_trait]
impl BrokerSession for AmqpSession {
    async fn next_delivery(
        &mut self,
        slice: Duration,
    ) -> Result<Option<InboundDelivery>, RelayError> {
        if !self.connection.is_connected() {
            return Err(RelayError::protocol("connection closed"));
        }
        self.consumer.next_delivery(slice).await
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), RelayError> {
        self.consumer.ack(delivery_tag).await
    }

    fn is_connected(&self) -> bool {
        self.connection.is_connected() && self.consumer.is_open()
    }

    fn status_channel(&self) -> Arc<dyn StatusChannel> {
        self.publisher.clone()
    }

    async fn close(&mut self) {
        self.connection.close().await;
    }
}
