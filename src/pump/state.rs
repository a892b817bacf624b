//! Pump state machine and retry policy
//!
//! Pure functions only; the loop in [`super::MessagePump`] applies them.

use crate::config::AmqpSection;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Connection state of the pump
///
/// There is no terminal state: the pump cycles until the process exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for PumpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PumpState::Disconnected => "disconnected",
            PumpState::Connecting => "connecting",
            PumpState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Events that move the pump between states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpEvent {
    /// Loop entry or the start of a retry
    ConnectRequested,
    /// Connection and both channels are ready
    ConnectSucceeded,
    /// The connect attempt itself failed
    ConnectFailed,
    /// Protocol error or failed liveness check on an established session
    SessionLost,
}

/// Timing knobs for the pump loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpSettings {
    /// Upper bound on one wait for broker events before yielding
    pub poll_interval: Duration,
    /// Fixed delay after a failed connect attempt
    pub connect_backoff: Duration,
    /// Longest a single connect attempt may take before it counts as failed
    pub connect_timeout: Duration,
}

impl Default for PumpSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            connect_backoff: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl PumpSettings {
    pub fn from_config(section: &AmqpSection) -> Self {
        Self {
            poll_interval: section.poll_interval(),
            connect_backoff: section.connect_backoff(),
            connect_timeout: section.connect_timeout(),
        }
    }
}

/// Determine next state after an event (pure function)
pub fn next_state(current: PumpState, event: PumpEvent) -> PumpState {
    let next = match event {
        PumpEvent::ConnectRequested => PumpState::Connecting,
        PumpEvent::ConnectSucceeded => PumpState::Connected,
        PumpEvent::ConnectFailed | PumpEvent::SessionLost => PumpState::Disconnected,
    };

    match (current, next) {
        (PumpState::Connecting, PumpState::Connected) => info!("pump connected"),
        (PumpState::Connected, PumpState::Disconnected) => warn!("pump disconnected"),
        _ => debug!(from = %current, to = %next, "pump state change"),
    }

    next
}

/// How long to wait before the next connect attempt (pure function)
///
/// A failed connect backs off so an unreachable broker is not hammered. A
/// session lost mid-stream is treated as a one-off and retried at once.
pub fn retry_delay(event: PumpEvent, settings: &PumpSettings) -> Option<Duration> {
    match event {
        PumpEvent::ConnectFailed => Some(settings.connect_backoff),
        PumpEvent::SessionLost => None,
        PumpEvent::ConnectRequested | PumpEvent::ConnectSucceeded => None,
    }
}
