//! Thread-safe metrics collection
//!
//! Atomic counters for the broker connection, the delivery path and status
//! publishing, plus a bounded window of handler latencies.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

const MAX_HANDLER_SAMPLES: usize = 1000;

pub struct MetricsCollector {
    // Connection
    connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    connections_lost: AtomicU64,
    protocol_errors: AtomicU64,
    connection_start_time: AtomicU64,

    // Delivery path
    messages_received: AtomicU64,
    messages_acked: AtomicU64,
    messages_dispatched: AtomicU64,
    messages_unrouted: AtomicU64,
    decode_failures: AtomicU64,
    handler_failures: AtomicU64,
    ack_failures: AtomicU64,
    handler_times: Mutex<Vec<u64>>, // microseconds

    // Status publishing
    status_published: AtomicU64,
    status_publish_failures: AtomicU64,
    status_skipped: AtomicU64,

    // Lifecycle
    pump_state: Mutex<String>,
    state_transitions: AtomicU64,
    uptime_start: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            connections_lost: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            connection_start_time: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_acked: AtomicU64::new(0),
            messages_dispatched: AtomicU64::new(0),
            messages_unrouted: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
            ack_failures: AtomicU64::new(0),
            handler_times: Mutex::new(Vec::new()),
            status_published: AtomicU64::new(0),
            status_publish_failures: AtomicU64::new(0),
            status_skipped: AtomicU64::new(0),
            pump_state: Mutex::new("disconnected".to_string()),
            state_transitions: AtomicU64::new(0),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Connection metrics
    pub fn connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.connected.store(true, Ordering::Relaxed);
        self.connection_start_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn connection_lost(&self) {
        self.connections_lost.fetch_add(1, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    // Delivery metrics
    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_acked(&self) {
        self.messages_acked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_dispatched(&self) {
        self.messages_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_unrouted(&self) {
        self.messages_unrouted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_failed(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handler_failed(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ack_failed(&self) {
        self.ack_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handler_time(&self, duration: Duration) {
        if let Ok(mut times) = self.handler_times.lock() {
            times.push(duration.as_micros() as u64);
            if times.len() > MAX_HANDLER_SAMPLES {
                let excess = times.len() - MAX_HANDLER_SAMPLES;
                times.drain(..excess);
            }
        }
    }

    // Status metrics
    pub fn status_published(&self) {
        self.status_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn status_publish_failed(&self) {
        self.status_publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn status_skipped(&self) {
        self.status_skipped.fetch_add(1, Ordering::Relaxed);
    }

    // Lifecycle metrics
    pub fn set_pump_state(&self, state: &str) {
        if let Ok(mut current) = self.pump_state.lock() {
            if *current != state {
                self.state_transitions.fetch_add(1, Ordering::Relaxed);
                *current = state.to_string();
            }
        }
    }

    // Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.connection_attempts,
            &self.connections_established,
            &self.connection_failures,
            &self.connections_lost,
            &self.protocol_errors,
            &self.connection_start_time,
            &self.messages_received,
            &self.messages_acked,
            &self.messages_dispatched,
            &self.messages_unrouted,
            &self.decode_failures,
            &self.handler_failures,
            &self.ack_failures,
            &self.status_published,
            &self.status_publish_failures,
            &self.status_skipped,
            &self.state_transitions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.connected.store(false, Ordering::Relaxed);
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
        if let Ok(mut times) = self.handler_times.lock() {
            times.clear();
        }
        if let Ok(mut state) = self.pump_state.lock() {
            *state = "disconnected".to_string();
        }
    }

    /// Average and percentiles of handler latency in milliseconds (pure function)
    fn handler_time_statistics(&self) -> (f64, f64, f64) {
        let Ok(times) = self.handler_times.lock() else {
            return (0.0, 0.0, 0.0);
        };
        if times.is_empty() {
            return (0.0, 0.0, 0.0);
        }

        let mut sorted = times.clone();
        sorted.sort_unstable();
        let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;

        (
            avg / 1000.0,
            percentile(&sorted, 50.0) / 1000.0,
            percentile(&sorted, 99.0) / 1000.0,
        )
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let started = self.connection_start_time.load(Ordering::Relaxed);
        let connection_duration_seconds = if started > 0 {
            now.saturating_sub(started)
        } else {
            0
        };
        let (avg_handler_ms, handler_p50_ms, handler_p99_ms) = self.handler_time_statistics();
        let current_state = self
            .pump_state
            .lock()
            .map(|state| state.clone())
            .unwrap_or_else(|_| "unknown".to_string());

        MetricsSnapshot {
            connection: ConnectionMetrics {
                connected: self.connected.load(Ordering::Relaxed),
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                connections_lost: self.connections_lost.load(Ordering::Relaxed),
                protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
                connection_duration_seconds,
            },
            messages: MessageMetrics {
                received: self.messages_received.load(Ordering::Relaxed),
                acked: self.messages_acked.load(Ordering::Relaxed),
                dispatched: self.messages_dispatched.load(Ordering::Relaxed),
                unrouted: self.messages_unrouted.load(Ordering::Relaxed),
                decode_failures: self.decode_failures.load(Ordering::Relaxed),
                handler_failures: self.handler_failures.load(Ordering::Relaxed),
                ack_failures: self.ack_failures.load(Ordering::Relaxed),
                avg_handler_time_ms: avg_handler_ms,
                handler_time_p50_ms: handler_p50_ms,
                handler_time_p99_ms: handler_p99_ms,
            },
            status: StatusMetrics {
                published: self.status_published.load(Ordering::Relaxed),
                publish_failures: self.status_publish_failures.load(Ordering::Relaxed),
                skipped: self.status_skipped.load(Ordering::Relaxed),
            },
            lifecycle: LifecycleMetrics {
                current_state,
                state_transitions: self.state_transitions.load(Ordering::Relaxed),
                uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            },
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub connection: ConnectionMetrics,
    pub messages: MessageMetrics,
    pub status: StatusMetrics,
    pub lifecycle: LifecycleMetrics,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct ConnectionMetrics {
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub connections_lost: u64,
    pub protocol_errors: u64,
    pub connection_duration_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct MessageMetrics {
    pub received: u64,
    pub acked: u64,
    pub dispatched: u64,
    pub unrouted: u64,
    pub decode_failures: u64,
    pub handler_failures: u64,
    pub ack_failures: u64,
    pub avg_handler_time_ms: f64,
    pub handler_time_p50_ms: f64,
    pub handler_time_p99_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct StatusMetrics {
    pub published: u64,
    pub publish_failures: u64,
    pub skipped: u64,
}

#[derive(Debug, Serialize)]
pub struct LifecycleMetrics {
    pub current_state: String,
    pub state_transitions: u64,
    pub uptime_seconds: u64,
}

// Helper functions
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let index = (percentile / 100.0) * (sorted_data.len() - 1) as f64;
    let lower = sorted_data[index.floor() as usize] as f64;
    let upper = sorted_data[index.ceil() as usize] as f64;

    lower + (upper - lower) * index.fract()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_connection_metrics() {
        let collector = MetricsCollector::new();

        collector.connection_attempt();
        collector.connection_failed();
        collector.connection_attempt();
        collector.connection_established();

        let snapshot = collector.get_metrics();
        assert_eq!(snapshot.connection.connection_attempts, 2);
        assert_eq!(snapshot.connection.connection_failures, 1);
        assert_eq!(snapshot.connection.connections_established, 1);
        assert!(snapshot.connection.connected);

        collector.protocol_error();
        collector.connection_lost();
        let snapshot = collector.get_metrics();
        assert!(!snapshot.connection.connected);
        assert_eq!(snapshot.connection.connections_lost, 1);
        assert_eq!(snapshot.connection.protocol_errors, 1);
        assert_eq!(snapshot.connection.connection_duration_seconds, 0);
    }

    #[test]
    fn test_message_and_status_metrics() {
        let collector = MetricsCollector::new();

        collector.message_received();
        collector.message_received();
        collector.decode_failed();
        collector.message_dispatched();
        collector.message_acked();
        collector.message_acked();
        collector.status_published();
        collector.status_skipped();
        collector.status_publish_failed();

        let snapshot = collector.get_metrics();
        assert_eq!(snapshot.messages.received, 2);
        assert_eq!(snapshot.messages.acked, 2);
        assert_eq!(snapshot.messages.decode_failures, 1);
        assert_eq!(snapshot.messages.dispatched, 1);
        assert_eq!(snapshot.status.published, 1);
        assert_eq!(snapshot.status.skipped, 1);
        assert_eq!(snapshot.status.publish_failures, 1);
    }

    #[test]
    fn test_handler_time_window_is_bounded() {
        let collector = MetricsCollector::new();
        for i in 0..1500 {
            collector.handler_time(Duration::from_micros(i));
        }

        assert_eq!(collector.handler_times.lock().unwrap().len(), MAX_HANDLER_SAMPLES);
        let snapshot = collector.get_metrics();
        assert!(snapshot.messages.avg_handler_time_ms > 0.0);
        assert!(snapshot.messages.handler_time_p99_ms >= snapshot.messages.handler_time_p50_ms);
    }

    #[test]
    fn test_pump_state_transitions_counted_once_per_change() {
        let collector = MetricsCollector::new();
        collector.set_pump_state("connecting");
        collector.set_pump_state("connecting");
        collector.set_pump_state("connected");

        let snapshot = collector.get_metrics();
        assert_eq!(snapshot.lifecycle.current_state, "connected");
        assert_eq!(snapshot.lifecycle.state_transitions, 2);
    }

    #[test]
    fn test_thread_safety() {
        let collector = Arc::new(MetricsCollector::new());

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let collector = Arc::clone(&collector);
                thread::spawn(move || {
                    for _ in 0..100 {
                        collector.message_received();
                        collector.message_acked();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = collector.get_metrics();
        assert_eq!(snapshot.messages.received, 1000);
        assert_eq!(snapshot.messages.acked, 1000);
    }

    #[test]
    fn test_percentile_calculation() {
        let data = vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10];

        assert!((percentile(&data, 50.0) - 5.5).abs() < 0.1);
        assert!((percentile(&data, 0.0) - 1.0).abs() < 0.1);
        assert!((percentile(&data, 100.0) - 10.0).abs() < 0.1);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_reset_functionality() {
        let collector = MetricsCollector::new();
        collector.message_received();
        collector.connection_established();
        collector.set_pump_state("connected");

        collector.reset();

        let snapshot = collector.get_metrics();
        assert_eq!(snapshot.messages.received, 0);
        assert!(!snapshot.connection.connected);
        assert_eq!(snapshot.lifecycle.current_state, "disconnected");
    }
}
