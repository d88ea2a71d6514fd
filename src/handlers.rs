//! HTTP route handlers for the relay service

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header::COOKIE, HeaderMap},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    diagnostics::{HostLookup, ProbeSequencer, SystemLookup},
    error::ProxyError,
    models::{DiagnosticsReport, DiagnosticsRequest, HealthResponse},
    relay::relay_handler,
    resolver::RELAY_PREFIX,
    transport::ReqwestTransport,
    validation::{sanitize_url_for_logging, BackendTarget},
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Upstream client for the relay; never follows redirects
    pub client: reqwest::Client,
    pub lookup: Arc<dyn HostLookup>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            config,
            client,
            lookup: Arc::new(SystemLookup),
        })
    }

    pub fn with_lookup(mut self, lookup: Arc<dyn HostLookup>) -> Self {
        self.lookup = lookup;
        self
    }
}

/// Build the router with every route and layer
pub fn create_router(state: AppState) -> Router {
    let body_limit = state.config.max_request_body_size;
    let relay_path = format!("{}/{{*path}}", RELAY_PREFIX);

    Router::new()
        .route("/health", get(health_handler))
        .route("/diagnostics/auth", post(diagnostics_handler))
        .route(
            RELAY_PREFIX,
            get(relay_handler)
                .post(relay_handler)
                .put(relay_handler)
                .patch(relay_handler)
                .delete(relay_handler)
                .options(relay_handler)
                .head(relay_handler),
        )
        .route(
            &relay_path,
            get(relay_handler)
                .post(relay_handler)
                .put(relay_handler)
                .patch(relay_handler)
                .delete(relay_handler)
                .options(relay_handler)
                .head(relay_handler),
        )
        .fallback(not_found_handler)
        .with_state(state)
        // Bounds extracted bodies (diagnostics); relayed bodies are streamed
        .layer(DefaultBodyLimit::max(body_limit))
        // Request tracing
        .layer(TraceLayer::new_for_http())
}

/// GET /health - Health check endpoint
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::new(state.config.relay_base().is_some()))
}

/// POST /diagnostics/auth - Run the auth-flow probe chain against the backend
pub async fn diagnostics_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<DiagnosticsReport>, ProxyError> {
    let request: DiagnosticsRequest = serde_json::from_slice(&body).map_err(|e| {
        debug!(error = %e, "Rejected diagnostics payload");
        ProxyError::invalid_request("Invalid JSON payload")
    })?;

    let base = request
        .base_url
        .as_deref()
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .or_else(|| state.config.diagnostics_base())
        .ok_or_else(|| ProxyError::misconfigured("API base URL is not configured"))?;
    let target = BackendTarget::parse(base)?;

    info!(
        url = %sanitize_url_for_logging(target.as_str()),
        register = request.register.is_some(),
        login = request.login.is_some(),
        verification = request.verification.is_some(),
        "Running auth diagnostics"
    );

    let transport = ReqwestTransport::new(None).map_err(|e| {
        warn!(error = %e, "Failed to build diagnostics client");
        ProxyError::unknown(e.message)
    })?;

    let mut sequencer = ProbeSequencer::new(target, &transport).with_lookup(state.lookup.as_ref());
    if let Some(cookie) = headers.get(COOKIE).and_then(|v| v.to_str().ok()) {
        sequencer = sequencer.with_cookies(cookie);
    }
    let report = sequencer.run(&request).await;

    Ok(Json(report))
}

/// Fallback for unknown routes
pub async fn not_found_handler() -> ProxyError {
    ProxyError::not_found("Not found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProbeId, ProbeStatus};
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use httpmock::prelude::*;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct NoLookup;

    #[async_trait]
    impl HostLookup for NoLookup {
        async fn lookup(&self, _host: &str) -> Option<String> {
            None
        }
    }

    fn app(config: Config) -> Router {
        create_router(AppState::new(config).unwrap().with_lookup(Arc::new(NoLookup)))
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_diagnostics(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/diagnostics/auth")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_relay_configuration() {
        let config = Config {
            api_base_url: Some("http://localhost:8000/api".into()),
            ..Config::default()
        };
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send(app(config), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["relayConfigured"], true);
    }

    #[tokio::test]
    async fn diagnostics_rejects_unparsable_json() {
        let (status, body) = send(app(Config::default()), post_diagnostics("{not json")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid JSON payload");
    }

    #[tokio::test]
    async fn diagnostics_without_any_base_is_misconfigured() {
        let (status, body) = send(app(Config::default()), post_diagnostics("{}")).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "API base URL is not configured");
    }

    #[tokio::test]
    async fn diagnostics_rejects_relative_override() {
        let payload = json!({"baseUrl": "/api"}).to_string();
        let (status, body) = send(app(Config::default()), post_diagnostics(&payload)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body["message"],
            "API base URL must be an absolute URL, including protocol"
        );
    }

    #[tokio::test]
    async fn diagnostics_runs_against_override_with_caller_cookies() {
        let server = MockServer::start_async().await;
        let login = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/auth/login")
                    .header("cookie", "XSRF-TOKEN=abc");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!({"token": "t-1", "message": "Welcome"}));
            })
            .await;

        let payload = json!({
            "baseUrl": server.url("/api"),
            "login": {"email": "ops@example.com", "password": "pw"}
        })
        .to_string();
        let mut request = post_diagnostics(&payload);
        request
            .headers_mut()
            .insert("cookie", "XSRF-TOKEN=abc".parse().unwrap());

        let (status, body) = send(app(Config::default()), request).await;

        login.assert_async().await;
        assert_eq!(status, StatusCode::OK);
        let report: DiagnosticsReport = serde_json::from_value(body.clone()).unwrap();
        assert_eq!(report.result(ProbeId::Login).unwrap().status, ProbeStatus::Success);
        assert_eq!(report.result(ProbeId::Token).unwrap().status, ProbeStatus::Success);
        assert_eq!(report.result(ProbeId::Register).unwrap().status, ProbeStatus::Skipped);
        assert_eq!(body["context"]["loginToken"], "t-1");
        assert_eq!(body["context"]["loginEmail"], "ops@example.com");
        assert!(body["results"][1]["durationMs"].is_u64());
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let request = Request::builder().uri("/nope").body(Body::empty()).unwrap();
        let (status, body) = send(app(Config::default()), request).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Not found");
    }
}
