//! Publisher channel for status events

use super::connection::ConnectionManager;
use crate::error::RelayError;
use crate::transport::StatusChannel;
use async_trait::async_trait;
use lapin::options::BasicPublishOptions;
use lapin::{BasicProperties, Channel};
use tracing::debug;

/// Dedicated channel so publish failures cannot close the consumer channel
pub struct PublisherChannel {
    channel: Channel,
}

impl PublisherChannel {
    pub async fn open(connection: &ConnectionManager) -> Result<Self, RelayError> {
        let channel = connection.create_channel().await?;
        Ok(Self { channel })
    }
}

#[async_trait]
impl StatusChannel for PublisherChannel {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
    ) -> Result<(), RelayError> {
        // Confirms are not enabled on this channel; the returned confirm is
        // resolved immediately and carries nothing.
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                status_properties(),
            )
            .await
            .map_err(|e| RelayError::publish(e.to_string()))?;

        debug!(exchange = %exchange, routing_key = %routing_key, "published status message");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.channel.status().connected()
    }
}

fn status_properties() -> BasicProperties {
    BasicProperties::default()
        .with_content_type("application/json".into())
        .with_content_encoding("utf-8".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_properties_are_json() {
        let properties = status_properties();
        assert_eq!(
            properties.content_type().as_ref().map(|s| s.as_str()),
            Some("application/json")
        );
        assert_eq!(
            properties.content_encoding().as_ref().map(|s| s.as_str()),
            Some("utf-8")
        );
    }
}
