//! HTTP Server for the Agent
//!
//! Exposes the agent as an HTTP forward proxy using axum. Requests to
//! the control path are answered by the agent itself; everything else is
//! turned into an [`InterceptedRequest`] and routed.

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use detour_common::protocol::error::{DetourError, Result};
use detour_common::{ControlMessage, ControlReply, InterceptedRequest, RequestKind};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use url::Url;

use crate::agent::Agent;
use crate::router::HOP_HEADER;

/// Path of the control endpoint.
pub const CONTROL_PATH: &str = "/__detour/control";

/// Response header naming the version that controls the session.
pub const CONTROLLER_HEADER: &str = "x-detour-controller";

const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// HTTP server for the agent.
///
/// This server:
/// - Accepts control messages as JSON POSTs at `/__detour/control`
/// - Provides a health check endpoint at `/__health`
/// - Proxies every other request through the agent's router
pub struct HttpServer {
    agent: Arc<Agent>,
}

impl HttpServer {
    /// Creates a new HTTP server.
    ///
    /// # Arguments
    /// * `agent` - Arc-wrapped agent shared by every request handler
    pub fn new(agent: Arc<Agent>) -> Self {
        Self { agent }
    }

    /// Builds the axum application.
    pub fn router(&self) -> axum::Router {
        axum::Router::new()
            .route(CONTROL_PATH, axum::routing::post(handle_control))
            .route("/__health", axum::routing::get(health_check))
            .fallback(handle_proxy)
            .layer(CorsLayer::permissive())
            .with_state(Arc::clone(&self.agent))
    }

    /// Runs the HTTP server.
    ///
    /// # Arguments
    /// * `addr` - Socket address to bind to (e.g., "127.0.0.1:8080")
    ///
    /// # Returns
    /// - `Ok(())` - Server ran and shut down cleanly
    /// - `Err(DetourError::Transport)` - Binding or serving failed
    ///
    /// # Behavior
    /// - Binds to the specified address
    /// - Logs the listening address
    /// - Runs until the process is stopped
    pub async fn run(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| DetourError::Transport(format!("Failed to bind to {}: {}", addr, e)))?;
        self.serve(listener).await
    }

    /// Serves on an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let app = self.router();

        info!(
            "Detour agent listening on {}",
            listener
                .local_addr()
                .map_err(|e| DetourError::Transport(format!("Failed to get local addr: {}", e)))?
        );

        axum::serve(listener, app)
            .await
            .map_err(|e| DetourError::Transport(format!("Server error: {}", e)))?;

        Ok(())
    }
}

async fn handle_control(State(agent): State<Arc<Agent>>, body: Bytes) -> Response {
    let message: ControlMessage = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ControlReply::error(format!("invalid control message: {}", e))),
            )
                .into_response()
        }
    };

    match agent.control(message).await {
        Ok(Some(reply)) => (StatusCode::OK, Json(reply)).into_response(),
        Ok(None) => StatusCode::ACCEPTED.into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ControlReply::error(e.to_string())),
        )
            .into_response(),
    }
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn handle_proxy(State(agent): State<Arc<Agent>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    // The agent's own fetch reached the agent again, e.g. a request sent
    // to the agent's address instead of through it.
    if parts.headers.contains_key(HOP_HEADER) {
        warn!("Refusing looped request {} {}", parts.method, parts.uri);
        return (StatusCode::LOOP_DETECTED, "request looped back to the agent").into_response();
    }

    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => return (StatusCode::PAYLOAD_TOO_LARGE, e.to_string()).into_response(),
    };

    let intercepted = match intercepted_request(&parts, body) {
        Ok(intercepted) => intercepted,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    match agent.route(&intercepted).await {
        Ok(response) => {
            let mut response = response.map(Body::from);
            if let Some(version) = agent.lifecycle().sessions().controller() {
                if let Ok(value) = HeaderValue::from_str(&version) {
                    response.headers_mut().insert(CONTROLLER_HEADER, value);
                }
            }
            response
        }
        Err(e) => {
            warn!("Proxying {} {} failed: {}", intercepted.method, intercepted.url, e);
            (error_status(&e), e.to_string()).into_response()
        }
    }
}

fn error_status(error: &DetourError) -> StatusCode {
    match error {
        e if e.is_network() => StatusCode::BAD_GATEWAY,
        DetourError::InvalidUrl(_) | DetourError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Reconstructs the absolute URL and kind of a proxied request.
///
/// Absolute-form URIs are used as-is; origin-form requests are resolved
/// against `Host` and `X-Forwarded-Proto` (default `http`).
fn intercepted_request(parts: &Parts, body: Bytes) -> Result<InterceptedRequest> {
    let url = if parts.uri.scheme().is_some() {
        Url::parse(&parts.uri.to_string())?
    } else {
        let host = parts
            .headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| DetourError::InvalidRequest("missing Host header".to_string()))?;
        let scheme = parts
            .headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("http");
        let path = parts
            .uri
            .path_and_query()
            .map(|p| p.as_str())
            .unwrap_or("/");
        Url::parse(&format!("{}://{}{}", scheme, host, path))?
    };

    let kind = if is_document(&parts.headers) {
        RequestKind::Document
    } else {
        RequestKind::Resource
    };
    debug!("Intercepted {:?} {} {}", kind, parts.method, url);

    Ok(InterceptedRequest::new(parts.method.clone(), url, kind)
        .with_headers(parts.headers.clone())
        .with_body(body))
}

/// Whether the headers describe a top-level page navigation.
fn is_document(headers: &HeaderMap) -> bool {
    fn value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
        headers.get(name).and_then(|v| v.to_str().ok())
    }

    if value(headers, "sec-fetch-dest").is_some_and(|d| d.eq_ignore_ascii_case("document"))
        || value(headers, "sec-fetch-mode").is_some_and(|m| m.eq_ignore_ascii_case("navigate"))
    {
        return true;
    }

    // Browsers list text/html first when navigating.
    value(headers, header::ACCEPT.as_str())
        .and_then(|accept| accept.split(',').next())
        .is_some_and(|first| first.trim().starts_with("text/html"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Components;
    use crate::clock::ManualClock;
    use crate::config::AgentConfig;
    use crate::resolver::BypassPredicate;
    use crate::store::MemoryCacheStore;
    use crate::test_support::{origin, ProbeBehavior, ScriptedFetcher, ScriptedProbe};
    use axum::http::Method;
    use detour_common::Origin;

    fn candidate_origins() -> Vec<Origin> {
        vec![origin("https://a.example"), origin("https://b.example")]
    }

    async fn agent(probe: Arc<ScriptedProbe>, fetcher: Arc<ScriptedFetcher>) -> Arc<Agent> {
        let config = AgentConfig::new(candidate_origins())
            .with_version("v3");
        let components = Components {
            probe,
            fetcher,
            store: Arc::new(MemoryCacheStore::new()),
            clock: Arc::new(ManualClock::new()),
            bypass: BypassPredicate::never(),
        };
        Arc::new(Agent::with_components(config, components).await.unwrap())
    }

    fn parts(uri: &str, headers: &[(&str, &str)]) -> Parts {
        let mut builder = axum::http::Request::builder().method(Method::GET).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_intercepted_request_absolute_form() {
        let parts = parts("http://a.example:8080/app.js?v=1", &[]);
        let request = intercepted_request(&parts, Bytes::new()).unwrap();
        assert_eq!(request.url.as_str(), "http://a.example:8080/app.js?v=1");
        assert_eq!(request.kind, RequestKind::Resource);
    }

    #[test]
    fn test_intercepted_request_origin_form() {
        let parts = parts(
            "/dashboard?tab=2",
            &[("host", "a.example"), ("x-forwarded-proto", "https")],
        );
        let request = intercepted_request(&parts, Bytes::new()).unwrap();
        assert_eq!(request.url.as_str(), "https://a.example/dashboard?tab=2");
    }

    #[test]
    fn test_intercepted_request_requires_host() {
        let parts = parts("/dashboard", &[]);
        assert!(matches!(
            intercepted_request(&parts, Bytes::new()),
            Err(DetourError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_document_detection() {
        let headers = |pairs: &[(&str, &str)]| parts("http://a.example/", pairs).headers;

        assert!(is_document(&headers(&[("sec-fetch-dest", "document")])));
        assert!(is_document(&headers(&[("sec-fetch-mode", "navigate")])));
        assert!(is_document(&headers(&[(
            "accept",
            "text/html,application/xhtml+xml,*/*;q=0.8"
        )])));
        assert!(!is_document(&headers(&[("accept", "application/json, text/html")])));
        assert!(!is_document(&headers(&[("sec-fetch-dest", "script")])));
        assert!(!is_document(&headers(&[])));
    }

    #[test]
    fn test_error_status() {
        assert_eq!(
            error_status(&DetourError::Transport("refused".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(error_status(&DetourError::Timeout(5000)), StatusCode::BAD_GATEWAY);
        assert_eq!(
            error_status(&DetourError::InvalidUrl("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_status(&DetourError::Storage("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = health_check().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "OK");
    }

    #[tokio::test]
    async fn test_control_version_query() {
        let agent = agent(Arc::new(ScriptedProbe::new()), Arc::new(ScriptedFetcher::new())).await;

        let response =
            handle_control(State(agent), Bytes::from_static(br#"{"type":"VERSION_QUERY"}"#)).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, r#"{"version":"v3"}"#);
    }

    #[tokio::test]
    async fn test_control_force_activate_is_accepted() {
        let agent = agent(Arc::new(ScriptedProbe::new()), Arc::new(ScriptedFetcher::new())).await;

        let response = handle_control(
            State(agent),
            Bytes::from_static(br#"{"type":"FORCE_ACTIVATE"}"#),
        )
        .await;

        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_control_rejects_unknown_message() {
        let agent = agent(Arc::new(ScriptedProbe::new()), Arc::new(ScriptedFetcher::new())).await;

        let response =
            handle_control(State(agent), Bytes::from_static(br#"{"type":"REBOOT"}"#)).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_string(response).await.starts_with(r#"{"error":"#));
    }

    #[tokio::test]
    async fn test_proxy_fallback_carries_controller() {
        let probe = Arc::new(ScriptedProbe::new());
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.down("https://a.example");
        let agent = agent(probe, fetcher.clone()).await;
        agent.start().await.unwrap();

        let request = axum::http::Request::builder()
            .uri("https://a.example/api/items")
            .body(Body::empty())
            .unwrap();
        let response = handle_proxy(State(agent), request).await;

        // The primary is never probed, so its failed fetch ends in the
        // empty sub-resource fallback.
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get(CONTROLLER_HEADER).unwrap(), "v3");
        assert_eq!(fetcher.fetched(), vec!["https://a.example/api/items"]);
    }

    #[tokio::test]
    async fn test_proxy_rewrites_to_backup() {
        let probe = Arc::new(ScriptedProbe::new());
        let fetcher = Arc::new(ScriptedFetcher::new());
        let agent = agent(probe.clone(), fetcher.clone()).await;
        probe.set("https://a.example", ProbeBehavior::Fail);

        let request = axum::http::Request::builder()
            .uri("https://b.example/api/items")
            .body(Body::empty())
            .unwrap();
        let response = handle_proxy(State(agent), request).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(CONTROLLER_HEADER).is_none());
        assert_eq!(body_string(response).await, "https://b.example");
    }

    #[tokio::test]
    async fn test_proxy_refuses_looped_request() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let agent = agent(Arc::new(ScriptedProbe::new()), fetcher.clone()).await;

        let request = axum::http::Request::builder()
            .uri("https://a.example/index.html")
            .header(HOP_HEADER, "1")
            .body(Body::empty())
            .unwrap();
        let response = handle_proxy(State(agent), request).await;

        assert_eq!(response.status(), StatusCode::LOOP_DETECTED);
        assert!(fetcher.fetched().is_empty());
    }

    #[tokio::test]
    async fn test_proxy_excluded_failure_is_bad_gateway() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.down("https://a.example");
        let agent = agent(Arc::new(ScriptedProbe::new()), fetcher).await;

        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("https://a.example/api/items")
            .body(Body::from("{}"))
            .unwrap();
        let response = handle_proxy(State(agent), request).await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
