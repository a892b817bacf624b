//! Consumer channel: broadcast subscription with bounded in-flight work

use super::connection::ConnectionManager;
use crate::error::RelayError;
use crate::transport::InboundDelivery;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicQosOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Consumer, ExchangeKind};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Maximum unacknowledged deliveries held by the consumer
///
/// The handler runs inline in the pump, so anything above one would only
/// buffer messages in memory.
pub const PREFETCH_COUNT: u16 = 1;

/// Exclusive, auto-deleting, server-named queue bound to the fanout exchange
pub struct ConsumerChannel {
    channel: Channel,
    consumer: Consumer,
    queue: String,
    consumer_tag: String,
}

impl ConsumerChannel {
    /// Declare topology and start consuming with explicit acknowledgments
    pub async fn setup(
        connection: &ConnectionManager,
        broadcast_exchange: &str,
    ) -> Result<Self, RelayError> {
        let channel = connection.create_channel().await?;

        channel
            .exchange_declare(
                broadcast_exchange,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| RelayError::connection(format!("failed to declare exchange: {e}")))?;

        let queue = channel
            .queue_declare("", queue_declare_options(), FieldTable::default())
            .await
            .map_err(|e| RelayError::connection(format!("failed to declare queue: {e}")))?;
        let queue = queue.name().as_str().to_string();

        channel
            .queue_bind(
                &queue,
                broadcast_exchange,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| RelayError::connection(format!("failed to bind queue: {e}")))?;

        channel
            .basic_qos(PREFETCH_COUNT, BasicQosOptions::default())
            .await
            .map_err(|e| RelayError::connection(format!("failed to set prefetch: {e}")))?;

        let consumer_tag = consumer_tag();
        let consumer = channel
            .basic_consume(
                &queue,
                &consumer_tag,
                consume_options(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| RelayError::connection(format!("failed to start consumer: {e}")))?;

        info!(
            exchange = %broadcast_exchange,
            queue = %queue,
            consumer_tag = %consumer_tag,
            "bound broadcast queue"
        );

        Ok(Self {
            channel,
            consumer,
            queue,
            consumer_tag,
        })
    }

    /// Wait at most `slice` for the next delivery
    pub async fn next_delivery(
        &mut self,
        slice: Duration,
    ) -> Result<Option<InboundDelivery>, RelayError> {
        match tokio::time::timeout(slice, self.consumer.next()).await {
            Err(_) => Ok(None),
            Ok(Some(Ok(delivery))) => {
                debug!(
                    delivery_tag = delivery.delivery_tag,
                    routing_key = %delivery.routing_key,
                    "received delivery"
                );
                Ok(Some(InboundDelivery {
                    delivery_tag: delivery.delivery_tag,
                    routing_key: delivery.routing_key.as_str().to_string(),
                    body: delivery.data,
                }))
            }
            Ok(Some(Err(e))) => Err(RelayError::protocol(format!("consumer error: {e}"))),
            Ok(None) => Err(RelayError::protocol("consumer stream ended")),
        }
    }

    pub async fn ack(&self, delivery_tag: u64) -> Result<(), RelayError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| RelayError::protocol(format!("ack failed: {e}")))
    }

    pub fn is_open(&self) -> bool {
        self.channel.status().connected()
    }

    pub fn queue_name(&self) -> &str {
        &self.queue
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }
}

fn queue_declare_options() -> QueueDeclareOptions {
    QueueDeclareOptions {
        exclusive: true,
        auto_delete: true,
        ..Default::default()
    }
}

fn consume_options() -> BasicConsumeOptions {
    BasicConsumeOptions {
        no_ack: false,
        ..Default::default()
    }
}

fn consumer_tag() -> String {
    format!("broadcast-relay-{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefetch_is_one() {
        assert_eq!(PREFETCH_COUNT, 1);
    }

    #[test]
    fn test_queue_is_exclusive_and_auto_deleted() {
        let options = queue_declare_options();
        assert!(options.exclusive);
        assert!(options.auto_delete);
        assert!(!options.durable);
        assert!(!options.passive);
    }

    #[test]
    fn test_consume_requires_explicit_ack() {
        let options = consume_options();
        assert!(!options.no_ack);
        assert!(!options.exclusive);
    }

    #[test]
    fn test_consumer_tags_are_unique() {
        let first = consumer_tag();
        let second = consumer_tag();
        assert!(first.starts_with("broadcast-relay-"));
        assert_ne!(first, second);
    }
}
