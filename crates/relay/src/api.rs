//! HTTP routes using axum.
//!
//! Routes:
//! - GET|HEAD / - Usage text
//! - GET|HEAD /cache-healthcheck - Liveness probe, always "ok"
//! - GET /stats - Uptime, open sockets, stored message count
//! - POST /broadcast - Store and fan out a form-encoded message
//! - GET /_ws/*, /socket.io/* - WebSocket upgrade
//!
//! Everything else is a 404. Upgrade requests outside the socket paths are
//! refused before routing.

use crate::connection::ConnectionManager;
use crate::error::RelayError;
use crate::ws_server::ws_handler;
use axum::{
    extract::{ConnectInfo, FromRequest, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use common::Message;
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

/// Liveness probe path. Answered before any other routing.
pub const HEALTHCHECK_PATH: &str = "/cache-healthcheck";

/// Path prefixes that accept WebSocket upgrades.
pub const SOCKET_PATH_PREFIXES: [&str; 2] = ["/socket.io/", "/_ws/"];

/// Body served at `/`.
pub const INDEX_BODY: &str = "\
Channel relay

Open a websocket:
  websocat \"ws://localhost:3000/_ws/\"

Subscribe to a channel:
  { \"event\": \"subscribe\", \"domain\": \"http://blah.com\", \"channel\": \"test\" }

Broadcast to a channel:
  { \"event\": \"broadcast\", \"domain\": \"http://blah.com\", \"channel\": \"test\", \"message\": \"Hello\" }

Catch up on history:
  { \"event\": \"get\", \"domain\": \"http://blah.com\", \"channel\": \"test\" }
  { \"event\": \"get_since_id\", \"domain\": \"http://blah.com\", \"channel\": \"test\", \"since_id\": \"<id>\" }

Broadcast over HTTP:
  curl -X POST -d \"domain=http://blah.com&channel=test&message=Hello\" \"http://localhost:3000/broadcast\"

Unsubscribe:
  { \"event\": \"unsubscribe\", \"domain\": \"http://blah.com\", \"channel\": \"test\" }
";

/// Application state shared across handlers.
pub struct AppState {
    pub manager: Arc<ConnectionManager>,
    pub started_at: Instant,
    pub ping_interval: Duration,
}

impl AppState {
    pub fn new(manager: Arc<ConnectionManager>, ping_interval: Duration) -> Self {
        Self {
            manager,
            started_at: Instant::now(),
            ping_interval,
        }
    }
}

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route(HEALTHCHECK_PATH, get(healthcheck_handler))
        .route("/stats", get(stats_handler))
        .route("/broadcast", post(broadcast_handler))
        // Socket paths
        .route("/_ws/", get(ws_handler))
        .route("/_ws/{*rest}", get(ws_handler))
        .route("/socket.io/", get(ws_handler))
        .route("/socket.io/{*rest}", get(ws_handler))
        .fallback(not_found_handler)
        .layer(middleware::map_response(method_not_allowed_as_not_found))
        .layer(middleware::from_fn(guard_upgrades))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the router until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = create_router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Best-effort client address: first `X-Forwarded-For` entry, then the
/// peer address.
pub fn client_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "anonymous".to_string())
}

fn is_socket_path(path: &str) -> bool {
    SOCKET_PATH_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

pub(crate) fn is_upgrade_request(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

// ============================================================================
// Middleware
// ============================================================================

/// Refuse WebSocket upgrades outside the socket paths.
async fn guard_upgrades(request: Request, next: Next) -> Response {
    let path = request.uri().path();
    let stray_upgrade =
        path != HEALTHCHECK_PATH && !is_socket_path(path) && is_upgrade_request(request.headers());

    if stray_upgrade {
        warn!("Refusing WebSocket upgrade on {}", path);
        return (
            StatusCode::BAD_REQUEST,
            [(header::CONNECTION, "close")],
            "WebSocket connections are not supported on this path",
        )
            .into_response();
    }

    next.run(request).await
}

/// Known paths answer unsupported methods with 404, like unknown paths.
async fn method_not_allowed_as_not_found(response: Response) -> Response {
    if response.status() == StatusCode::METHOD_NOT_ALLOWED {
        return ApiError::NotFound.into_response();
    }
    response
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /
async fn index_handler() -> &'static str {
    INDEX_BODY
}

/// GET /cache-healthcheck
async fn healthcheck_handler() -> &'static str {
    "ok"
}

/// Fallback for unknown routes.
async fn not_found_handler() -> ApiError {
    ApiError::NotFound
}

#[derive(Serialize)]
struct StatsResponse {
    status: &'static str,
    time_running: u64,
    sockets_open: usize,
    message_count: usize,
}

/// GET /stats
async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let elapsed = state.started_at.elapsed();
    let time_running = elapsed.as_secs() + u64::from(elapsed.subsec_nanos() > 0);

    Json(StatsResponse {
        status: "ok",
        time_running,
        sockets_open: state.manager.connection_count(),
        message_count: state.manager.store().message_count(),
    })
}

/// Form body for POST /broadcast.
#[derive(Debug, Deserialize)]
pub struct BroadcastForm {
    pub domain: Option<String>,
    pub channel: Option<String>,
    pub message: Option<String>,
    pub uid: Option<String>,
}

#[derive(Serialize)]
struct BroadcastResponse {
    event: &'static str,
    data: Message,
    domain: String,
    channel: String,
    status: &'static str,
}

/// POST /broadcast
///
/// The body is read as urlencoded whatever content type the client declares.
async fn broadcast_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    mut request: Request,
) -> Result<impl IntoResponse, ApiError> {
    let address = client_address(request.headers(), Some(peer));
    request.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/x-www-form-urlencoded"),
    );
    let Form(form) = Form::<BroadcastForm>::from_request(request, &state)
        .await
        .map_err(|e| ApiError::Internal(e.body_text()))?;

    let domain = required(form.domain, "domain")?;
    let channel = required(form.channel, "channel")?;
    let message = required(form.message, "message")?;
    let sender = form
        .uid
        .filter(|uid| !uid.is_empty())
        .unwrap_or(address);

    info!("Broadcasting to {}/{} over HTTP from {}", domain, channel, sender);
    let data = state
        .manager
        .publish(&domain, &channel, Value::String(message), &sender);
    counter!("relay_http_broadcasts_total").increment(1);

    Ok(Json(BroadcastResponse {
        event: "broadcast",
        data,
        domain,
        channel,
        status: "ok",
    }))
}

fn required(value: Option<String>, field: &'static str) -> Result<String, RelayError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(RelayError::MissingField(field))
}

// ============================================================================
// Error Handling
// ============================================================================

/// API error types.
#[derive(Debug)]
pub enum ApiError {
    NotFound,
    Internal(String),
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, "Not found").into_response(),
            ApiError::Internal(msg) => {
                warn!("HTTP request failed: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::Request as HttpRequest;
    use message_store::MessageStore;
    use tower::ServiceExt;

    fn app() -> (Router, Arc<AppState>) {
        let manager = Arc::new(ConnectionManager::new(MessageStore::new()));
        let state = Arc::new(AppState::new(manager, Duration::from_secs(30)));
        let router = create_router(state.clone())
            .layer(MockConnectInfo(SocketAddr::from(([10, 0, 0, 7], 4000))));
        (router, state)
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        serde_json::from_str(&body_string(response).await).unwrap()
    }

    fn get(uri: &str) -> HttpRequest<Body> {
        HttpRequest::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_form(uri: &str, body: &str) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_healthcheck_with_trailing_question_mark() {
        let (app, _) = app();
        for uri in ["/cache-healthcheck?", "/cache-healthcheck"] {
            let resp = app.clone().oneshot(get(uri)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(body_string(resp).await, "ok");
        }
    }

    #[tokio::test]
    async fn test_healthcheck_head() {
        let (app, _) = app();
        let req = HttpRequest::builder()
            .method("HEAD")
            .uri("/cache-healthcheck?")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_index() {
        let (app, _) = app();
        let resp = app.oneshot(get("/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_string(resp).await.contains("subscribe"));
    }

    #[tokio::test]
    async fn test_unknown_path_and_method_are_404() {
        let (app, _) = app();
        let resp = app.clone().oneshot(get("/nope")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(resp).await, "Not found");

        let resp = app.clone().oneshot(get("/broadcast")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = app.oneshot(post_form("/stats", "")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stats() {
        let (app, state) = app();
        state.manager.publish("d", "c", Value::from("x"), "someone");
        let (_id, _rx) = state.manager.register();

        let resp = app.oneshot(get("/stats")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["sockets_open"], 1);
        assert_eq!(json["message_count"], 1);
        assert!(json["time_running"].is_u64());
    }

    #[tokio::test]
    async fn test_broadcast_over_http() {
        let (app, state) = app();
        let resp = app
            .oneshot(post_form(
                "/broadcast",
                "domain=http%3A%2F%2Fblah.com&channel=test&message=Hello&uid=abc",
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["event"], "broadcast");
        assert_eq!(json["status"], "ok");
        assert_eq!(json["domain"], "http://blah.com");
        assert_eq!(json["channel"], "test");
        assert_eq!(json["data"]["data"], "Hello");
        assert_eq!(json["data"]["sender"], "abc");

        let latest = state.manager.store().get_latest("http://blah.com", "test").unwrap();
        assert_eq!(json["data"]["id"], latest.id.as_str());
    }

    #[tokio::test]
    async fn test_broadcast_sender_falls_back_to_address() {
        let (app, _) = app();
        let resp = app
            .clone()
            .oneshot(post_form("/broadcast", "domain=d&channel=c&message=m"))
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["data"]["sender"], "10.0.0.7");

        let req = HttpRequest::builder()
            .method("POST")
            .uri("/broadcast")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(Body::from("domain=d&channel=c&message=m"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(body_json(resp).await["data"]["sender"], "203.0.113.9");
    }

    #[tokio::test]
    async fn test_broadcast_reaches_websocket_subscribers() {
        let (app, state) = app();
        let (id, mut rx) = state.manager.register();
        rx.try_recv().unwrap();
        state
            .manager
            .subscribe(&id, common::Topic::new("d", "c").unwrap())
            .unwrap();

        let resp = app
            .oneshot(post_form("/broadcast", "domain=d&channel=c&message=hi"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["event"], "broadcast");
        assert_eq!(frame["data"], "hi");
    }

    #[tokio::test]
    async fn test_broadcast_missing_channel_is_500_and_stores_nothing() {
        let (app, _) = app();
        let resp = app
            .clone()
            .oneshot(post_form("/broadcast", "domain=d&message=m"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_string(resp).await.contains("channel"));

        let resp = app.oneshot(get("/stats")).await.unwrap();
        assert_eq!(body_json(resp).await["message_count"], 0);
    }

    #[tokio::test]
    async fn test_broadcast_without_content_type() {
        let (app, state) = app();
        let req = HttpRequest::builder()
            .method("POST")
            .uri("/broadcast")
            .body(Body::from("domain=d&channel=c&message=m"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["data"]["data"], "m");
        assert_eq!(state.manager.store().message_count(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_json_body_is_500() {
        let (app, state) = app();
        let req = HttpRequest::builder()
            .method("POST")
            .uri("/broadcast")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"domain":"d"}"#))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(state.manager.store().message_count(), 0);
    }

    #[tokio::test]
    async fn test_plain_get_on_socket_paths_is_404() {
        let (app, state) = app();
        for uri in ["/_ws/", "/_ws/extra", "/socket.io/", "/socket.io/?EIO=4&transport=websocket"] {
            let resp = app.clone().oneshot(get(uri)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{uri}");
            assert_eq!(body_string(resp).await, "Not found");
        }
        assert_eq!(state.manager.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_incomplete_upgrade_on_socket_path_is_rejected() {
        let (app, _) = app();
        let req = HttpRequest::builder()
            .uri("/_ws/")
            .header(header::CONNECTION, "upgrade")
            .header(header::UPGRADE, "websocket")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stray_upgrade_is_refused() {
        let (app, _) = app();
        let req = HttpRequest::builder()
            .uri("/stats")
            .header(header::CONNECTION, "upgrade")
            .header(header::UPGRADE, "websocket")
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = HttpRequest::builder()
            .uri("/cache-healthcheck?")
            .header(header::CONNECTION, "upgrade")
            .header(header::UPGRADE, "websocket")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn test_client_address() {
        let mut headers = HeaderMap::new();
        let peer = Some(SocketAddr::from(([127, 0, 0, 1], 1234)));
        assert_eq!(client_address(&headers, peer), "127.0.0.1");
        assert_eq!(client_address(&headers, None), "anonymous");

        headers.insert("x-forwarded-for", "198.51.100.1".parse().unwrap());
        assert_eq!(client_address(&headers, peer), "198.51.100.1");
    }

    #[test]
    fn test_socket_paths() {
        assert!(is_socket_path("/_ws/"));
        assert!(is_socket_path("/socket.io/?EIO=4"));
        assert!(is_socket_path("/socket.io/abc"));
        assert!(!is_socket_path("/_ws"));
        assert!(!is_socket_path("/ws/"));
    }
}
