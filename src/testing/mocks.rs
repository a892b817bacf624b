//! Mock implementations for testing
//!
//! [`MockBroker`] stands in for the AMQP broker behind the transport traits so
//! the pump can be driven through connect failures, deliveries and protocol
//! errors without a real server. [`RecordingHandler`] captures what reaches
//! the handler.

use crate::dispatch::{HandlerError, MessageHandler};
use crate::error::RelayError;
use crate::transport::{BrokerConnector, BrokerSession, InboundDelivery, StatusChannel};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// A status message as seen by the mock broker
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedStatus {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
}

impl PublishedStatus {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug)]
enum ScriptedEvent {
    Delivery { routing_key: String, body: Vec<u8> },
    ProtocolError,
}

#[derive(Default)]
struct BrokerState {
    connect_failures_remaining: usize,
    connect_hangs_remaining: usize,
    connect_attempts: Vec<Instant>,
    sessions_opened: usize,
    sessions_closed: usize,
    pending: VecDeque<ScriptedEvent>,
    next_tag: u64,
    delivered: Vec<u64>,
    ack_attempts: Vec<u64>,
    acked: Vec<u64>,
    in_flight: usize,
    max_in_flight: usize,
    fail_acks: bool,
    fail_publishes: bool,
    publish_calls: usize,
    published: Vec<PublishedStatus>,
    current_session: Option<Arc<AtomicBool>>,
}

/// Scriptable in-memory broker
#[derive(Clone, Default)]
pub struct MockBroker {
    state: Arc<Mutex<BrokerState>>,
    wakeup: Arc<Notify>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next `count` connect attempts fail
    pub fn fail_next_connects(&self, count: usize) {
        self.state().connect_failures_remaining = count;
    }

    /// Make the next `count` connect attempts never complete
    pub fn hang_next_connects(&self, count: usize) {
        self.state().connect_hangs_remaining = count;
    }

    /// Queue a delivery on the broadcast queue
    pub fn deliver(&self, routing_key: &str, body: impl Into<Vec<u8>>) {
        self.state().pending.push_back(ScriptedEvent::Delivery {
            routing_key: routing_key.to_string(),
            body: body.into(),
        });
        self.wakeup.notify_one();
    }

    /// Queue a protocol error; the session fails when it reaches it
    pub fn inject_protocol_error(&self) {
        self.state().pending.push_back(ScriptedEvent::ProtocolError);
        self.wakeup.notify_one();
    }

    /// Drop the current session's connection immediately
    pub fn inject_disconnect(&self) {
        if let Some(alive) = self.state().current_session.take() {
            alive.store(false, Ordering::SeqCst);
        }
        self.wakeup.notify_one();
    }

    pub fn set_fail_acks(&self, fail: bool) {
        self.state().fail_acks = fail;
    }

    pub fn set_fail_publishes(&self, fail: bool) {
        self.state().fail_publishes = fail;
    }

    pub fn connect_attempts(&self) -> Vec<Instant> {
        self.state().connect_attempts.clone()
    }

    pub fn sessions_opened(&self) -> usize {
        self.state().sessions_opened
    }

    pub fn sessions_closed(&self) -> usize {
        self.state().sessions_closed
    }

    pub fn is_session_open(&self) -> bool {
        self.state()
            .current_session
            .as_ref()
            .map(|alive| alive.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn delivered(&self) -> Vec<u64> {
        self.state().delivered.clone()
    }

    pub fn ack_attempts(&self) -> Vec<u64> {
        self.state().ack_attempts.clone()
    }

    pub fn acked(&self) -> Vec<u64> {
        self.state().acked.clone()
    }

    /// Largest number of delivered-but-unacknowledged messages seen at once
    pub fn max_in_flight(&self) -> usize {
        self.state().max_in_flight
    }

    pub fn publish_calls(&self) -> usize {
        self.state().publish_calls
    }

    pub fn published(&self) -> Vec<PublishedStatus> {
        self.state().published.clone()
    }
}

#[async_trait]
impl BrokerConnector for MockBroker {
    type Session = MockSession;

    async fn connect(&self) -> Result<MockSession, RelayError> {
        let hang = {
            let mut state = self.state();
            state.connect_attempts.push(Instant::now());
            let hang = state.connect_hangs_remaining > 0;
            if hang {
                state.connect_hangs_remaining -= 1;
            }
            hang
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let mut state = self.state();

        if state.connect_failures_remaining > 0 {
            state.connect_failures_remaining -= 1;
            return Err(RelayError::connection("Connection refused (os error 111)"));
        }

        state.sessions_opened += 1;
        let alive = Arc::new(AtomicBool::new(true));
        state.current_session = Some(alive.clone());
        drop(state);

        Ok(MockSession {
            broker: self.clone(),
            alive,
        })
    }
}

pub struct MockSession {
    broker: MockBroker,
    alive: Arc<AtomicBool>,
}

impl MockSession {
    fn take_event(&self) -> Option<ScriptedEvent> {
        self.broker.state().pending.pop_front()
    }
}

#[async_trait]
impl BrokerSession for MockSession {
    async fn next_delivery(
        &mut self,
        slice: Duration,
    ) -> Result<Option<InboundDelivery>, RelayError> {
        let deadline = Instant::now() + slice;

        loop {
            if !self.alive.load(Ordering::SeqCst) {
                return Err(RelayError::protocol("connection reset by peer"));
            }

            match self.take_event() {
                Some(ScriptedEvent::Delivery { routing_key, body }) => {
                    let mut state = self.broker.state();
                    state.next_tag += 1;
                    let delivery_tag = state.next_tag;
                    state.delivered.push(delivery_tag);
                    state.in_flight += 1;
                    state.max_in_flight = state.max_in_flight.max(state.in_flight);

                    return Ok(Some(InboundDelivery {
                        delivery_tag,
                        routing_key,
                        body,
                    }));
                }
                Some(ScriptedEvent::ProtocolError) => {
                    self.alive.store(false, Ordering::SeqCst);
                    return Err(RelayError::protocol("CHANNEL_ERROR - unexpected frame"));
                }
                None => {
                    let notified = self.broker.wakeup.notified();
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(None);
                    }
                }
            }
        }
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), RelayError> {
        let mut state = self.broker.state();
        state.ack_attempts.push(delivery_tag);
        state.in_flight = state.in_flight.saturating_sub(1);

        if !self.alive.load(Ordering::SeqCst) {
            return Err(RelayError::protocol("channel closed"));
        }
        if state.fail_acks {
            return Err(RelayError::protocol("PRECONDITION_FAILED - unknown delivery tag"));
        }

        state.acked.push(delivery_tag);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn status_channel(&self) -> Arc<dyn StatusChannel> {
        Arc::new(MockStatusChannel {
            broker: self.broker.clone(),
            alive: self.alive.clone(),
        })
    }

    async fn close(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        self.broker.state().sessions_closed += 1;
    }
}

pub struct MockStatusChannel {
    broker: MockBroker,
    alive: Arc<AtomicBool>,
}

#[async_trait]
impl StatusChannel for MockStatusChannel {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
    ) -> Result<(), RelayError> {
        let mut state = self.broker.state();
        state.publish_calls += 1;

        if state.fail_publishes {
            return Err(RelayError::publish("channel closed by broker"));
        }

        state.published.push(PublishedStatus {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body: body.to_vec(),
        });
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

/// Handler that records every call and can be told to fail or panic
#[derive(Clone, Default)]
pub struct RecordingHandler {
    received: Arc<Mutex<Vec<(String, String)>>>,
    fail_namespaces: Arc<Mutex<HashSet<String>>>,
    panic_namespaces: Arc<Mutex<HashSet<String>>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, namespace: &str) {
        if let Ok(mut namespaces) = self.fail_namespaces.lock() {
            namespaces.insert(namespace.to_string());
        }
    }

    pub fn panic_on(&self, namespace: &str) {
        if let Ok(mut namespaces) = self.panic_namespaces.lock() {
            namespaces.insert(namespace.to_string());
        }
    }

    pub fn received(&self) -> Vec<(String, String)> {
        self.received
            .lock()
            .map(|received| received.clone())
            .unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.received.lock().map(|r| r.len()).unwrap_or(0)
    }
}

impl MessageHandler for RecordingHandler {
    fn handle(&self, namespace: &str, message: &str) -> Result<(), HandlerError> {
        if let Ok(mut received) = self.received.lock() {
            received.push((namespace.to_string(), message.to_string()));
        }

        let should_panic = self
            .panic_namespaces
            .lock()
            .map(|namespaces| namespaces.contains(namespace))
            .unwrap_or(false);
        if should_panic {
            panic!("handler panic for namespace {namespace}");
        }

        let should_fail = self
            .fail_namespaces
            .lock()
            .map(|namespaces| namespaces.contains(namespace))
            .unwrap_or(false);
        if should_fail {
            return Err(HandlerError::Rejected {
                namespace: namespace.to_string(),
                reason: "scripted failure".to_string(),
            });
        }

        Ok(())
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until<F>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
