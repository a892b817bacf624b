//! Fire-and-forget status publishing
//!
//! [`StatusPublisher`] is a cheap cloneable handle that any task may hold. The
//! message pump installs the live publisher channel after each successful
//! connect and removes it when the connection drops, so sends made while
//! disconnected become no-ops instead of errors.

use crate::observability::metrics::metrics;
use crate::transport::amqp::BrokerEndpoint;
use crate::transport::StatusChannel;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error};

#[derive(Clone)]
pub struct StatusPublisher {
    inner: Arc<PublisherInner>,
}

struct PublisherInner {
    enabled: bool,
    exchange: String,
    channel: RwLock<Option<Arc<dyn StatusChannel>>>,
}

impl StatusPublisher {
    pub fn new(exchange: impl Into<String>, enabled: bool) -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                enabled,
                exchange: exchange.into(),
                channel: RwLock::new(None),
            }),
        }
    }

    pub fn from_endpoint(endpoint: &BrokerEndpoint) -> Self {
        Self::new(
            endpoint.status_exchange.clone(),
            endpoint.send_status_messages,
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    pub fn exchange(&self) -> &str {
        &self.inner.exchange
    }

    /// Whether a publisher channel is currently installed and open
    pub async fn is_live(&self) -> bool {
        self.current_channel().await.is_some()
    }

    pub(crate) async fn attach(&self, channel: Arc<dyn StatusChannel>) {
        *self.inner.channel.write().await = Some(channel);
    }

    pub(crate) async fn detach(&self) {
        *self.inner.channel.write().await = None;
    }

    async fn current_channel(&self) -> Option<Arc<dyn StatusChannel>> {
        let guard = self.inner.channel.read().await;
        guard.as_ref().filter(|channel| channel.is_open()).cloned()
    }

    /// Publish `payload` as JSON to the status exchange under `routing_key`
    ///
    /// Never fails from the caller's point of view. Nothing is sent when status
    /// messages are disabled or no connection is up; serialization and
    /// transport errors are logged and dropped.
    pub async fn send_message<P>(&self, routing_key: &str, payload: &P)
    where
        P: Serialize + ?Sized,
    {
        if !self.inner.enabled {
            metrics().status_skipped();
            return;
        }

        let Some(channel) = self.current_channel().await else {
            metrics().status_skipped();
            debug!(routing_key = %routing_key, "no live publisher channel, status message dropped");
            return;
        };

        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(e) => {
                metrics().status_publish_failed();
                error!(routing_key = %routing_key, error = %e, "failed to publish message");
                return;
            }
        };

        match channel
            .publish(&self.inner.exchange, routing_key, &body)
            .await
        {
            Ok(()) => metrics().status_published(),
            Err(e) => {
                metrics().status_publish_failed();
                error!(
                    exchange = %self.inner.exchange,
                    routing_key = %routing_key,
                    error = %e.sanitized(),
                    "failed to publish message"
                );
            }
        }
    }
}

impl std::fmt::Debug for StatusPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusPublisher")
            .field("enabled", &self.inner.enabled)
            .field("exchange", &self.inner.exchange)
            .finish()
    }
}
