//! Health check HTTP server for container orchestration
//!
//! Mirrors the pump's connection state onto `/health` and `/ready`, and
//! exports the global metrics on `/metrics`.

use crate::error::RelayError;
use crate::observability::metrics::metrics;
use crate::pump::PumpState;
use crate::status::StatusPublisher;
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use warp::http::StatusCode;
use warp::Filter;

/// HTTP health check server
pub struct HealthServer {
    service: String,
    port: u16,
    broker_connected: Arc<AtomicBool>,
    status_publisher: Option<StatusPublisher>,
}

impl HealthServer {
    pub fn new(service: impl Into<String>, port: u16) -> Self {
        Self {
            service: service.into(),
            port,
            broker_connected: Arc::new(AtomicBool::new(false)),
            status_publisher: None,
        }
    }

    /// Report on the status publisher as part of `/health`
    pub fn with_status_publisher(mut self, publisher: StatusPublisher) -> Self {
        self.status_publisher = Some(publisher);
        self
    }

    pub fn set_broker_connected(&self, connected: bool) {
        self.broker_connected.store(connected, Ordering::Relaxed);
    }

    /// Track pump state changes until the pump goes away
    pub fn follow_pump(&self, mut states: watch::Receiver<PumpState>) -> JoinHandle<()> {
        let connected = self.broker_connected.clone();
        tokio::spawn(async move {
            loop {
                let state = *states.borrow_and_update();
                connected.store(state == PumpState::Connected, Ordering::Relaxed);
                if states.changed().await.is_err() {
                    connected.store(false, Ordering::Relaxed);
                    break;
                }
            }
        })
    }

    /// All routes, without binding a socket
    pub fn routes(
        self: Arc<Self>,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
        let health_server = self.clone();
        let ready_server = self.clone();

        // GET /health - detailed health status
        let health_route = warp::path("health").and(warp::get()).and_then(move || {
            let server = health_server.clone();
            async move {
                let status = server.get_health_status().await;
                let code = if status.status == "healthy" {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                Ok::<_, Infallible>(warp::reply::with_status(warp::reply::json(&status), code))
            }
        });

        // GET /metrics - complete metrics export
        let metrics_route = warp::path("metrics")
            .and(warp::get())
            .map(|| warp::reply::json(&metrics().get_metrics()));

        // GET /ready - readiness probe, true while connected to the broker
        let ready_route = warp::path("ready").and(warp::get()).map(move || {
            let ready = ready_server.broker_connected.load(Ordering::Relaxed);
            let response = ReadinessResponse {
                ready,
                timestamp: current_timestamp(),
            };
            let code = if ready {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            warp::reply::with_status(warp::reply::json(&response), code)
        });

        // GET /live - liveness probe
        let live_route = warp::path("live").and(warp::get()).map(|| {
            warp::reply::json(&LivenessResponse {
                alive: true,
                timestamp: current_timestamp(),
            })
        });

        // GET / - endpoint index
        let root_route = warp::path::end().and(warp::get()).map(|| {
            let endpoints: HashMap<&'static str, &'static str> = [
                ("/health", "Overall health status with detailed checks"),
                ("/metrics", "Connection, delivery and status counters"),
                ("/ready", "Readiness probe, ready while connected to the broker"),
                ("/live", "Liveness probe"),
            ]
            .into_iter()
            .collect();
            warp::reply::json(&ApiDocumentationResponse { endpoints })
        });

        health_route
            .or(metrics_route)
            .or(ready_route)
            .or(live_route)
            .or(root_route)
            .with(warp::cors().allow_any_origin())
    }

    /// Bind and serve until the task is dropped
    pub async fn start(self: Arc<Self>) -> Result<(), RelayError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let (bound, server) = warp::serve(self.clone().routes())
            .try_bind_ephemeral(addr)
            .map_err(|e| {
                RelayError::configuration(format!("health server failed to bind {addr}: {e}"))
            })?;

        tracing::info!(address = %bound, "health server listening");
        server.await;
        Ok(())
    }

    async fn get_health_status(&self) -> HealthStatus {
        let mut checks = HashMap::new();
        checks.insert("broker".to_string(), self.check_broker());
        if let Some(publisher) = &self.status_publisher {
            checks.insert(
                "status_publisher".to_string(),
                check_status_publisher(publisher).await,
            );
        }

        let healthy = checks
            .values()
            .all(|check| check.status == "healthy" || check.status == "disabled");

        HealthStatus {
            status: if healthy { "healthy" } else { "degraded" }.to_string(),
            timestamp: current_timestamp(),
            service: self.service.clone(),
            uptime_seconds: metrics().get_metrics().lifecycle.uptime_seconds,
            checks,
        }
    }

    fn check_broker(&self) -> HealthCheck {
        if self.broker_connected.load(Ordering::Relaxed) {
            HealthCheck::new("healthy", "Connected to AMQP broker")
        } else {
            HealthCheck::new("unhealthy", "Not connected to AMQP broker")
        }
    }
}

async fn check_status_publisher(publisher: &StatusPublisher) -> HealthCheck {
    if !publisher.is_enabled() {
        HealthCheck::new("disabled", "Status messages are turned off")
    } else if publisher.is_live().await {
        HealthCheck::new("healthy", "Publisher channel open")
    } else {
        HealthCheck::new("unhealthy", "No open publisher channel")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub status: String,
    pub message: Option<String>,
    pub last_check: u64,
}

impl HealthCheck {
    fn new(status: &str, message: &str) -> Self {
        Self {
            status: status.to_string(),
            message: Some(message.to_string()),
            last_check: current_timestamp(),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: String,
    timestamp: u64,
    service: String,
    uptime_seconds: u64,
    checks: HashMap<String, HealthCheck>,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct ApiDocumentationResponse {
    endpoints: HashMap<&'static str, &'static str>,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ready_follows_connection_state() {
        let server = Arc::new(HealthServer::new("broadcast-relay", 8080));
        let routes = server.clone().routes();

        let response = warp::test::request().path("/ready").reply(&routes).await;
        assert_eq!(response.status(), 503);

        server.set_broker_connected(true);
        let response = warp::test::request().path("/ready").reply(&routes).await;
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_health_reports_broker_check() {
        let server = Arc::new(HealthServer::new("broadcast-relay", 8080));
        let routes = server.clone().routes();

        let response = warp::test::request().path("/health").reply(&routes).await;
        assert_eq!(response.status(), 503);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["service"], "broadcast-relay");
        assert_eq!(body["checks"]["broker"]["status"], "unhealthy");

        server.set_broker_connected(true);
        let response = warp::test::request().path("/health").reply(&routes).await;
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_disabled_status_publisher_does_not_degrade_health() {
        let server = Arc::new(
            HealthServer::new("broadcast-relay", 8080)
                .with_status_publisher(StatusPublisher::new("status", false)),
        );
        server.set_broker_connected(true);

        let status = server.get_health_status().await;
        assert_eq!(status.status, "healthy");
        assert_eq!(status.checks["status_publisher"].status, "disabled");
    }

    #[tokio::test]
    async fn test_enabled_publisher_without_channel_is_unhealthy() {
        let server = Arc::new(
            HealthServer::new("broadcast-relay", 8080)
                .with_status_publisher(StatusPublisher::new("status", true)),
        );
        server.set_broker_connected(true);

        let status = server.get_health_status().await;
        assert_eq!(status.status, "degraded");
        assert_eq!(status.checks["status_publisher"].status, "unhealthy");
    }

    #[tokio::test]
    async fn test_live_metrics_and_index_routes() {
        let server = Arc::new(HealthServer::new("broadcast-relay", 8080));
        let routes = server.routes();

        let live = warp::test::request().path("/live").reply(&routes).await;
        assert_eq!(live.status(), 200);

        let metrics = warp::test::request().path("/metrics").reply(&routes).await;
        assert_eq!(metrics.status(), 200);
        let body: serde_json::Value = serde_json::from_slice(metrics.body()).unwrap();
        assert!(body.get("connection").is_some());
        assert!(body.get("messages").is_some());

        let index = warp::test::request().path("/").reply(&routes).await;
        let body: serde_json::Value = serde_json::from_slice(index.body()).unwrap();
        assert!(body["endpoints"].get("/ready").is_some());
    }

    #[tokio::test]
    async fn test_follow_pump_tracks_state() {
        let server = HealthServer::new("broadcast-relay", 8080);
        let (tx, rx) = watch::channel(PumpState::Disconnected);
        let follower = server.follow_pump(rx);

        tx.send_replace(PumpState::Connected);
        for _ in 0..100 {
            if server.broker_connected.load(Ordering::Relaxed) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(server.broker_connected.load(Ordering::Relaxed));

        drop(tx);
        follower.await.unwrap();
        assert!(!server.broker_connected.load(Ordering::Relaxed));
    }
}
