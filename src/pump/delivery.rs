//! Per-delivery processing: decode, dispatch, acknowledge
//!
//! Whatever happens to a delivery, it is acknowledged exactly once. A
//! malformed body or a failing handler must never leave a message unacked,
//! since with a prefetch of one that would stall the queue.

use crate::dispatch::MessageHandler;
use crate::error::RelayError;
use crate::observability::metrics::metrics;
use crate::transport::{BrokerSession, InboundDelivery};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;
use tracing::{debug, error, warn};

/// A decoded broadcast event
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Routing key of the delivery
    pub namespace: String,
    pub message: String,
    pub delivery_tag: u64,
}

/// What happened to one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Dispatched,
    HandlerFailed,
    DecodeFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivery_tag: u64,
    pub outcome: DeliveryOutcome,
    pub acked: bool,
}

/// Decode the body as UTF-8 text (pure function)
pub fn decode_delivery(delivery: InboundDelivery) -> Result<InboundMessage, RelayError> {
    let message = String::from_utf8(delivery.body)?;
    Ok(InboundMessage {
        namespace: delivery.routing_key,
        message,
        delivery_tag: delivery.delivery_tag,
    })
}

/// Run the handler, turning both errors and panics into `Err`
fn invoke_handler(handler: &dyn MessageHandler, message: &InboundMessage) -> Result<(), String> {
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        handler.handle(&message.namespace, &message.message)
    }));

    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!("handler panicked: {}", panic_message(&payload))),
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Decode, hand to the handler, then acknowledge
pub async fn process_delivery<S>(
    session: &S,
    handler: &dyn MessageHandler,
    delivery: InboundDelivery,
) -> DeliveryReport
where
    S: BrokerSession + ?Sized,
{
    let delivery_tag = delivery.delivery_tag;
    metrics().message_received();

    let outcome = match decode_delivery(delivery) {
        Ok(message) => {
            let started = Instant::now();
            let result = invoke_handler(handler, &message);
            metrics().handler_time(started.elapsed());

            match result {
                Ok(()) => {
                    metrics().message_dispatched();
                    debug!(namespace = %message.namespace, delivery_tag, "message dispatched");
                    DeliveryOutcome::Dispatched
                }
                Err(reason) => {
                    metrics().handler_failed();
                    error!(
                        namespace = %message.namespace,
                        delivery_tag,
                        error = %reason,
                        "message handler failed"
                    );
                    DeliveryOutcome::HandlerFailed
                }
            }
        }
        Err(e) => {
            metrics().decode_failed();
            warn!(delivery_tag, error = %e, "dropping undecodable message");
            DeliveryOutcome::DecodeFailed
        }
    };

    let acked = match session.ack(delivery_tag).await {
        Ok(()) => {
            metrics().message_acked();
            true
        }
        Err(e) => {
            metrics().ack_failed();
            error!(delivery_tag, error = %e.sanitized(), "failed to ack message");
            false
        }
    };

    DeliveryReport {
        delivery_tag,
        outcome,
        acked,
    }
}
