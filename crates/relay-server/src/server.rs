//! `RelayServer` — Axum HTTP + WebSocket relay server.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::relay::BroadcastRelay;
use crate::websocket::session;

/// Errors surfaced while starting the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listen socket could not be bound.
    #[error("failed to bind listener: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Broadcast relay (owns the registry).
    pub relay: Arc<BroadcastRelay>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Metrics handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The relay server.
pub struct RelayServer {
    config: Arc<ServerConfig>,
    registry: Arc<ConnectionRegistry>,
    relay: Arc<BroadcastRelay>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl RelayServer {
    /// Create a new server from configuration.
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let relay = Arc::new(BroadcastRelay::new(
            Arc::clone(&registry),
            config.exclude_sender,
        ));
        Self {
            config: Arc::new(config),
            registry,
            relay,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Attach an installed Prometheus recorder handle for `/metrics`.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    ///
    /// Anything that is not `/ws`, `/health`, or `/metrics` falls back
    /// to static asset serving from the configured public directory.
    pub fn router(&self) -> Router {
        let state = AppState {
            relay: Arc::clone(&self.relay),
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::clone(&self.config),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .fallback_service(ServeDir::new(&self.config.public_dir))
            .with_state(state)
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the listener and start serving. Returns a handle that keeps
    /// the server task alive and can stop it gracefully.
    pub async fn start(self) -> Result<ServerHandle, ServerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;

        info!(port = local_addr.port(), public_dir = %self.config.public_dir.display(), "relay server listening");

        let router = self.router();
        let token = self.shutdown.token();
        let server = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
                .ok();
        });

        Ok(ServerHandle {
            port: local_addr.port(),
            registry: self.registry,
            relay: self.relay,
            shutdown: self.shutdown,
            server,
        })
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Get the broadcast relay.
    pub fn relay(&self) -> &Arc<BroadcastRelay> {
        &self.relay
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Handle returned by `start()` — keeps the server task alive.
pub struct ServerHandle {
    /// Bound port (useful with `port: 0`).
    pub port: u16,
    registry: Arc<ConnectionRegistry>,
    relay: Arc<BroadcastRelay>,
    shutdown: Arc<ShutdownCoordinator>,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Get the connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Get the broadcast relay.
    pub fn relay(&self) -> &Arc<BroadcastRelay> {
        &self.relay
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Stop the server: close all transports, clear the registry, and
    /// wait for the accept loop to drain.
    pub async fn stop(self) {
        self.shutdown
            .graceful_shutdown(&self.registry, vec![self.server], None)
            .await;
    }
}

/// GET /ws — upgrade into a relay session.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let relay = Arc::clone(&state.relay);
    let config = Arc::clone(&state.config);
    let cancel = state.shutdown.token();
    ws.max_message_size(config.max_message_size)
        .on_upgrade(move |socket| session::run_session(socket, relay, config, cancel))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.relay.registry().count().await;
    Json(health::health_check(state.start_time, connections))
}

/// GET /metrics — Prometheus text format (empty without a recorder).
async fn metrics_handler(State(state): State<AppState>) -> String {
    state
        .metrics
        .as_ref()
        .map(crate::metrics::render)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn make_server() -> RelayServer {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..ServerConfig::default()
        };
        RelayServer::new(config)
    }

    #[tokio::test]
    async fn server_with_default_relay_policy() {
        let server = make_server();
        assert!(!server.relay().excludes_sender());
        assert_eq!(server.registry().count().await, 0);
    }

    #[test]
    fn shutdown_coordinator_accessible() {
        let server = make_server();
        assert!(!server.shutdown().is_shutting_down());
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let server = make_server();
        let app = server.router();

        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
    }

    #[tokio::test]
    async fn metrics_endpoint_empty_without_recorder() {
        let server = make_server();
        let app = server.router();

        let req = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ws_route_rejects_plain_get() {
        let server = make_server();
        let app = server.router();

        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();

        // No upgrade headers — the extractor rejects the request.
        let resp = app.oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn missing_asset_returns_404() {
        let public = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            public_dir: public.path().to_path_buf(),
            ..ServerConfig::default()
        };
        let app = RelayServer::new(config).router();

        let req = Request::builder()
            .uri("/nonexistent.html")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn static_asset_served_from_public_dir() {
        let public = tempfile::tempdir().unwrap();
        std::fs::write(public.path().join("index.html"), "<h1>relay</h1>").unwrap();
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            public_dir: public.path().to_path_buf(),
            ..ServerConfig::default()
        };
        let app = RelayServer::new(config).router();

        let req = Request::builder()
            .uri("/index.html")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        assert_eq!(&body[..], b"<h1>relay</h1>");
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let server = make_server();
        let handle = server.start().await.unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");

        handle.stop().await;
    }

    #[tokio::test]
    async fn stop_is_clean_with_no_clients() {
        let server = make_server();
        let handle = server.start().await.unwrap();
        handle.stop().await;
    }
}
