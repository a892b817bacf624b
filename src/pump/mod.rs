//! Message pump: keeps a broker session alive and feeds deliveries to the handler
//!
//! ```text
//! DISCONNECTED --connect--> CONNECTING --ok--> CONNECTED
//!      ^                        |                  |
//!      |<------ fail, backoff --+                  |
//!      |<------------ session lost, no delay ------+
//! ```
//!
//! The loop never gives up. Failed or timed-out connects wait for the
//! configured backoff; a session that dies mid-stream is reconnected
//! straight away.

pub mod delivery;
pub mod state;

pub use delivery::{decode_delivery, process_delivery, DeliveryOutcome, DeliveryReport, InboundMessage};
pub use state::{next_state, retry_delay, PumpEvent, PumpSettings, PumpState};

use crate::dispatch::MessageHandler;
use crate::error::RelayError;
use crate::observability::metrics::metrics;
use crate::status::StatusPublisher;
use crate::transport::{BrokerConnector, BrokerSession};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct MessagePump<C: BrokerConnector> {
    connector: C,
    handler: Arc<dyn MessageHandler>,
    publisher: StatusPublisher,
    settings: PumpSettings,
    state_tx: watch::Sender<PumpState>,
}

impl<C: BrokerConnector> MessagePump<C> {
    pub fn new(
        connector: C,
        handler: Arc<dyn MessageHandler>,
        publisher: StatusPublisher,
        settings: PumpSettings,
    ) -> Self {
        let (state_tx, _) = watch::channel(PumpState::Disconnected);
        Self {
            connector,
            handler,
            publisher,
            settings,
            state_tx,
        }
    }

    /// Receiver that tracks every state change
    pub fn state_watcher(&self) -> watch::Receiver<PumpState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> PumpState {
        *self.state_tx.borrow()
    }

    fn apply(&self, event: PumpEvent) {
        let next = next_state(self.state(), event);
        metrics().set_pump_state(&next.to_string());
        self.state_tx.send_replace(next);
    }

    /// Run forever
    ///
    /// Only returns if the task is cancelled; stop it by aborting its
    /// `JoinHandle` or dropping the future.
    pub async fn run(self) {
        info!(
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            connect_backoff_ms = self.settings.connect_backoff.as_millis() as u64,
            connect_timeout_ms = self.settings.connect_timeout.as_millis() as u64,
            "starting message pump"
        );

        loop {
            self.apply(PumpEvent::ConnectRequested);
            metrics().connection_attempt();

            let event = match self.connect_with_timeout().await {
                Ok(mut session) => {
                    // Attach first so observers of Connected can publish at once.
                    self.publisher.attach(session.status_channel()).await;
                    metrics().connection_established();
                    self.apply(PumpEvent::ConnectSucceeded);
                    info!("connected");

                    let error = self.pump_session(&mut session).await;
                    self.publisher.detach().await;

                    metrics().connection_lost();
                    warn!(error = %error.sanitized(), "lost connection");
                    session.close().await;
                    PumpEvent::SessionLost
                }
                Err(error) => {
                    metrics().connection_failed();
                    warn!("connection failed: {}", error.sanitized());
                    PumpEvent::ConnectFailed
                }
            };

            self.apply(event);

            match retry_delay(event, &self.settings) {
                Some(delay) => {
                    debug!(delay_ms = delay.as_millis() as u64, "backing off before reconnect");
                    tokio::time::sleep(delay).await;
                }
                None => tokio::task::yield_now().await,
            }
        }
    }

    /// One connect attempt, abandoned once `connect_timeout` elapses
    async fn connect_with_timeout(&self) -> Result<C::Session, RelayError> {
        let timeout = self.settings.connect_timeout;
        match tokio::time::timeout(timeout, self.connector.connect()).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::connection(format!(
                "connect attempt timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    /// Pump deliveries until the session fails; returns the failure
    async fn pump_session(&self, session: &mut C::Session) -> RelayError {
        loop {
            if !session.is_connected() {
                return RelayError::protocol("connection no longer open");
            }

            match session.next_delivery(self.settings.poll_interval).await {
                Ok(Some(delivery)) => {
                    process_delivery(&*session, self.handler.as_ref(), delivery).await;
                }
                Ok(None) => {}
                Err(error) => {
                    metrics().protocol_error();
                    return error;
                }
            }

            tokio::task::yield_now().await;
        }
    }
}
