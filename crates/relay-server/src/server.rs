//! `RelayServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::hub::{Hub, HubConfig};
use crate::origin::OriginPolicy;
use crate::protocol::EventRegistry;
use crate::routes;
use crate::shutdown::ShutdownCoordinator;
use crate::token_store::TokenStore;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connection hub (owns the token store).
    pub hub: Arc<Hub>,
    /// Runtime configuration.
    pub config: Arc<ServerConfig>,
    /// Upgrade origin allow-list.
    pub origins: Arc<OriginPolicy>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`.
    pub metrics: PrometheusHandle,
}

/// The relay server.
pub struct RelayServer {
    config: Arc<ServerConfig>,
    hub: Arc<Hub>,
    origins: Arc<OriginPolicy>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: PrometheusHandle,
}

impl RelayServer {
    /// Create a server from its configuration and event handlers.
    pub fn new(config: ServerConfig, registry: EventRegistry, metrics: PrometheusHandle) -> Self {
        let tokens = Arc::new(TokenStore::new(config.token_ttl()));
        let hub = Arc::new(Hub::new(registry, tokens, HubConfig::from_config(&config)));
        let origins = Arc::new(OriginPolicy::new(&config.allowed_origins));
        Self {
            config: Arc::new(config),
            hub,
            origins,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: Arc::clone(&self.hub),
            config: Arc::clone(&self.config),
            origins: Arc::clone(&self.origins),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        let mut router = Router::new()
            .route("/login", post(routes::auth::login))
            .route("/ws", get(routes::ws::ws_upgrade))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler));

        if let Some(dir) = &self.config.static_dir {
            router = router.fallback_service(ServeDir::new(dir));
        }

        router.layer(TraceLayer::new_for_http()).with_state(state)
    }

    /// Bind the configured address and serve until shutdown is signalled.
    ///
    /// Returns the bound address and a handle that resolves once the
    /// listener and the token sweeper have stopped. On shutdown every open
    /// connection is closed.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local = listener.local_addr()?;

        let sweeper = self
            .hub
            .tokens()
            .spawn_sweeper(self.config.token_sweep_interval(), self.shutdown.token());

        let app = self.router();
        let token = self.shutdown.token();
        let hub = Arc::clone(&self.hub);
        let signal = async move {
            token.cancelled().await;
            hub.close_all().await;
        };

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(signal)
                .await
            {
                error!(error = %e, "server error");
            }
            let _ = sweeper.await;
            info!("relay server stopped");
        });

        info!(addr = %local, "relay server listening");
        Ok((local, handle))
    }

    /// The connection hub.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.hub.connection_count().await;
    let pending = state.hub.tokens().len();
    Json(health::health_check(state.start_time, connections, pending))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    crate::metrics::render(&state.metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::default_registry;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use tower::ServiceExt;

    fn make_server() -> RelayServer {
        RelayServer::new(
            ServerConfig::default(),
            default_registry(),
            crate::metrics::detached_handle(),
        )
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn login_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap()
    }

    fn ws_request(uri: &str, origin: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(origin) = origin {
            builder = builder.header(header::ORIGIN, origin);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_reports_counters() {
        let server = make_server();
        let _ = server.hub().tokens().issue();

        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let parsed = body_json(resp).await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["pending_tokens"], 1);
    }

    #[tokio::test]
    async fn login_with_valid_credentials_returns_otp() {
        let server = make_server();
        let resp = server
            .router()
            .oneshot(login_request(r#"{"username":"ben","password":"123"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let parsed = body_json(resp).await;
        let otp = parsed["otp"].as_str().unwrap();
        assert!(!otp.is_empty());
        assert_eq!(server.hub().tokens().len(), 1);
    }

    #[tokio::test]
    async fn login_with_wrong_password_is_unauthorized() {
        let server = make_server();
        let resp = server
            .router()
            .oneshot(login_request(r#"{"username":"ben","password":"nope"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(resp).await["error"], "invalid credentials");
        assert!(server.hub().tokens().is_empty());
    }

    #[tokio::test]
    async fn login_with_malformed_body_is_bad_request() {
        let server = make_server();
        let resp = server
            .router()
            .oneshot(login_request("{not json"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"], "invalid request payload");
    }

    #[tokio::test]
    async fn ws_without_allowed_origin_is_forbidden() {
        let server = make_server();
        let token = server.hub().tokens().issue();
        let uri = format!("/ws?otp={}", token.key);

        let resp = server
            .router()
            .oneshot(ws_request(&uri, Some("https://evil.example")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = server.router().oneshot(ws_request(&uri, None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        // refused origin must not consume the token
        assert_eq!(server.hub().tokens().len(), 1);
    }

    #[tokio::test]
    async fn ws_without_otp_is_unauthorized() {
        let server = make_server();
        for uri in ["/ws", "/ws?otp="] {
            let resp = server
                .router()
                .oneshot(ws_request(uri, Some("https://localhost:8080")))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "uri {uri}");
        }
    }

    #[tokio::test]
    async fn ws_with_unknown_otp_is_unauthorized() {
        let server = make_server();
        let resp = server
            .router()
            .oneshot(ws_request("/ws?otp=bogus", Some("https://localhost:9000")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(resp).await["code"], crate::errors::INVALID_TOKEN);
    }

    #[tokio::test]
    async fn ws_with_unreadable_query_is_unauthorized() {
        let server = make_server();
        let token = server.hub().tokens().issue();
        let uri = format!("/ws?otp={}&otp=other", token.key);

        let resp = server
            .router()
            .oneshot(ws_request(&uri, Some("https://localhost:8080")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(server.hub().tokens().len(), 1);
    }

    #[tokio::test]
    async fn ws_valid_otp_without_handshake_consumes_token() {
        let server = make_server();
        let token = server.hub().tokens().issue();
        let uri = format!("/ws?otp={}", token.key);

        let resp = server
            .router()
            .oneshot(ws_request(&uri, Some("https://localhost:8080")))
            .await
            .unwrap();
        assert!(resp.status().is_client_error());
        assert_ne!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(server.hub().tokens().is_empty());
    }

    #[tokio::test]
    async fn metrics_endpoint_ok() {
        let server = make_server();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let req = Request::builder()
            .uri("/nonexistent")
            .body(Body::empty())
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn static_dir_served_as_fallback() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>relay</h1>").unwrap();

        let config = ServerConfig {
            static_dir: Some(dir.path().to_string_lossy().into_owned()),
            ..ServerConfig::default()
        };
        let server = RelayServer::new(config, default_registry(), crate::metrics::detached_handle());

        let req = Request::builder()
            .uri("/index.html")
            .body(Body::empty())
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        assert_eq!(&body[..], b"<h1>relay</h1>");
    }

    #[tokio::test]
    async fn listen_binds_and_stops_on_shutdown() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);

        server.shutdown().shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("server did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn listen_reports_bind_failure() {
        let first = make_server();
        let (addr, _handle) = first.listen().await.unwrap();

        let config = ServerConfig {
            port: addr.port(),
            ..ServerConfig::default()
        };
        let second = RelayServer::new(config, default_registry(), crate::metrics::detached_handle());
        let err = second.listen().await.unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));
        first.shutdown().shutdown();
    }
}
