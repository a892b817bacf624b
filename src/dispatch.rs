//! Hand-off point between the pump and the fan-out service
//!
//! The pump only knows [`MessageHandler`]. [`BroadcastDispatcher`] is the
//! in-process implementation used by the binary: it republishes every message
//! on a tokio broadcast channel that the websocket layer subscribes to.

use crate::observability::metrics::metrics;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

/// Errors a handler may report; they are logged and never stop the pump
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Dispatch failed: {0}")]
    Dispatch(String),
    #[error("Rejected message in namespace '{namespace}': {reason}")]
    Rejected { namespace: String, reason: String },
}

/// Receives each decoded broadcast message
///
/// Runs inline on the pump task before the next delivery is read, so it must
/// return quickly.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, namespace: &str, message: &str) -> Result<(), HandlerError>;
}

impl<F> MessageHandler for F
where
    F: Fn(&str, &str) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, namespace: &str, message: &str) -> Result<(), HandlerError> {
        self(namespace, message)
    }
}

/// A broadcast message as seen by fan-out subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchedMessage {
    pub namespace: String,
    pub message: String,
}

/// Fans messages out to every current subscriber
#[derive(Debug, Clone)]
pub struct BroadcastDispatcher {
    sender: broadcast::Sender<DispatchedMessage>,
}

impl BroadcastDispatcher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchedMessage> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl MessageHandler for BroadcastDispatcher {
    fn handle(&self, namespace: &str, message: &str) -> Result<(), HandlerError> {
        let dispatched = DispatchedMessage {
            namespace: namespace.to_string(),
            message: message.to_string(),
        };

        match self.sender.send(dispatched) {
            Ok(receivers) => {
                debug!(namespace = %namespace, receivers, "dispatched message");
            }
            Err(_) => {
                // Nobody listening is normal between client connections.
                metrics().message_unrouted();
                debug!(namespace = %namespace, "no subscribers, message dropped");
            }
        }
        Ok(())
    }
}
