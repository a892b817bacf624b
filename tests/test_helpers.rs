//! Test helpers and utilities for integration tests

use broadcast_relay::pump::{MessagePump, PumpSettings, PumpState};
use broadcast_relay::status::StatusPublisher;
use broadcast_relay::testing::{MockBroker, RecordingHandler};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A pump running against a [`MockBroker`]; aborted on drop
pub struct PumpHarness {
    pub broker: MockBroker,
    pub handler: RecordingHandler,
    pub publisher: StatusPublisher,
    pub states: watch::Receiver<PumpState>,
    task: JoinHandle<()>,
}

impl PumpHarness {
    pub fn start(settings: PumpSettings, send_status_messages: bool) -> Self {
        Self::start_with_broker(MockBroker::new(), settings, send_status_messages)
    }

    pub fn start_with_broker(
        broker: MockBroker,
        settings: PumpSettings,
        send_status_messages: bool,
    ) -> Self {
        let handler = RecordingHandler::new();
        let publisher = StatusPublisher::new("status", send_status_messages);
        let pump = MessagePump::new(
            broker.clone(),
            Arc::new(handler.clone()),
            publisher.clone(),
            settings,
        );
        let states = pump.state_watcher();
        let task = tokio::spawn(pump.run());

        Self {
            broker,
            handler,
            publisher,
            states,
            task,
        }
    }

    /// Wait for the pump to report `Connected`
    pub async fn wait_connected(&mut self) {
        self.states
            .wait_for(|state| *state == PumpState::Connected)
            .await
            .expect("pump task ended");
    }
}

impl Drop for PumpHarness {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Short intervals for tests on the real clock
#[allow(dead_code)]
pub fn fast_settings() -> PumpSettings {
    PumpSettings {
        poll_interval: Duration::from_millis(20),
        connect_backoff: Duration::from_millis(50),
        connect_timeout: Duration::from_secs(5),
    }
}
