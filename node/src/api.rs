//! # Lifecycle API
//!
//! The axum router in front of the [`LifecycleCoordinator`].
//!
//! ## Endpoints
//!
//! | Method | Path         | Description                                  |
//! |--------|--------------|----------------------------------------------|
//! | GET    | `/health`    | Liveness probe                               |
//! | GET    | `/config`    | Effective lifecycle configuration            |
//! | POST   | `/lifecycle` | Run one lifecycle, stream events as NDJSON   |
//!
//! `POST /lifecycle` answers `200` as soon as the run starts and then
//! writes one [`LifecycleEvent`] per line. The last line is always the
//! terminal event. If the client disconnects the stream is dropped, which
//! stops the run; a ledger write already accepted still lands.

use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use nova_lifecycle::{
    Cancellation, LifecycleCoordinator, LifecycleEvent, Operation, VerificationRequest,
};

use crate::metrics::{LifecycleTracker, SharedMetrics};

/// Content type of the lifecycle stream.
pub const NDJSON: &str = "application/x-ndjson";

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone; the coordinator only holds `Arc`s.
#[derive(Clone)]
pub struct AppState {
    /// Reported version string.
    pub version: String,
    pub coordinator: LifecycleCoordinator,
    pub metrics: SharedMetrics,
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

/// Body of `POST /lifecycle`.
#[derive(Debug, Deserialize)]
pub struct LifecycleRequest {
    /// The ledger calls to make.
    pub operation: Operation,
    /// Secret authorizing the operation. Omit when the ledger needs no
    /// challenge.
    #[serde(default)]
    pub verification: Option<VerificationRequest>,
    /// Indexing deadline override, in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Error body for requests rejected before a lifecycle starts.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the API [`Router`] with CORS and request tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/config", get(config_handler))
        .route("/lifecycle", post(lifecycle_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health` — 200 while the process is up.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "status": "ok", "version": state.version })),
    )
}

/// `GET /config` — the lifecycle configuration in effect.
async fn config_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.coordinator.config().clone())
}

/// `POST /lifecycle` — run the operation and stream its events.
async fn lifecycle_handler(
    State(state): State<AppState>,
    Json(req): Json<LifecycleRequest>,
) -> Response {
    let timeout = match req.timeout_ms {
        Some(0) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "timeout_ms must be greater than zero".into(),
                }),
            )
                .into_response();
        }
        Some(ms) => Duration::from_millis(ms),
        None => state.coordinator.config().indexing_timeout(),
    };

    tracing::info!(
        kind = %req.operation.kind,
        steps = req.operation.steps.len(),
        verified = req.verification.is_some(),
        timeout_ms = timeout.as_millis() as u64,
        "lifecycle requested"
    );

    let events = state.coordinator.run_lifecycle(
        req.operation,
        req.verification,
        timeout,
        Cancellation::never(),
    );

    let mut tracker = LifecycleTracker::start(state.metrics.clone());
    let body = events.map(move |event| {
        tracker.observe(&event);
        encode_line(&event)
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, NDJSON)
        .body(Body::from_stream(body))
        .unwrap_or_else(|e| {
            tracing::error!("failed to build lifecycle response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}

/// One NDJSON line.
pub fn encode_line(event: &LifecycleEvent) -> Result<Vec<u8>, serde_json::Error> {
    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use nova_lifecycle::sim::{Devnet, DevnetConfig};
    use nova_lifecycle::LifecycleConfig;
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::metrics::GatewayMetrics;

    fn test_app_state() -> (AppState, Devnet) {
        let devnet = Devnet::new(DevnetConfig::default());
        let config = LifecycleConfig::default()
            .with_poll_interval(Duration::from_millis(100))
            .with_poll_jitter(Duration::ZERO)
            .with_indexing_timeout(Duration::from_secs(5));
        let state = AppState {
            version: "0.1.0-test".into(),
            coordinator: devnet.coordinator(config),
            metrics: Arc::new(GatewayMetrics::new()),
        };
        (state, devnet)
    }

    /// Sends a POST with a JSON body and returns (status, content type, body).
    async fn post_json(
        router: &Router,
        path: &str,
        body: serde_json::Value,
    ) -> (StatusCode, Option<String>, Vec<u8>) {
        let req = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let content_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        (status, content_type, body)
    }

    fn parse_lines(body: &[u8]) -> Vec<LifecycleEvent> {
        std::str::from_utf8(body)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn transfer(pin: &str) -> serde_json::Value {
        serde_json::json!({
            "operation": {
                "kind": "transfer",
                "steps": [{ "label": "transfer", "payload": { "to": "bob", "amount": 5 } }]
            },
            "verification": { "secret": pin, "kind": "pin" }
        })
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (state, _) = test_app_state();
        let router = create_router(state);
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["version"], "0.1.0-test");
    }

    #[tokio::test(start_paused = true)]
    async fn lifecycle_streams_ndjson_ending_in_success() {
        let (state, devnet) = test_app_state();
        let metrics = state.metrics.clone();
        let router = create_router(state);

        let (status, content_type, body) = post_json(&router, "/lifecycle", transfer("123456")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some(NDJSON));
        let events = parse_lines(&body);
        assert!(events.len() >= 4);
        assert!(matches!(events.last(), Some(LifecycleEvent::Success { .. })));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert_eq!(devnet.ledger.submit_count(), 1);

        assert_eq!(metrics.transactions_confirmed_total.get(), 1);
        assert_eq!(
            metrics
                .lifecycle_outcomes_total
                .with_label_values(&["success"])
                .get(),
            1
        );
        assert_eq!(metrics.lifecycles_in_flight.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_pin_streams_a_single_failed_line() {
        let (state, devnet) = test_app_state();
        let router = create_router(state);

        let (status, _, body) = post_json(&router, "/lifecycle", transfer("999999")).await;

        assert_eq!(status, StatusCode::OK);
        let events = parse_lines(&body);
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].terminal_error().map(|e| e.code()),
            Some("invalid_secret")
        );
        assert_eq!(devnet.ledger.submit_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_override_yields_partially_indexed() {
        let (state, devnet) = test_app_state();
        devnet.index.hide("0xaa");
        devnet.ledger.set_script(
            "transfer",
            nova_lifecycle::sim::StepScript::default().with_hash("0xaa"),
        );
        let router = create_router(state);

        let mut request = transfer("123456");
        request["timeout_ms"] = serde_json::json!(1000);
        let started = tokio::time::Instant::now();
        let (_, _, body) = post_json(&router, "/lifecycle", request).await;

        let events = parse_lines(&body);
        assert!(matches!(
            events.last(),
            Some(LifecycleEvent::PartiallyIndexed { .. })
        ));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn zero_timeout_is_rejected_up_front() {
        let (state, devnet) = test_app_state();
        let router = create_router(state);

        let mut request = transfer("123456");
        request["timeout_ms"] = serde_json::json!(0);
        let (status, _, body) = post_json(&router, "/lifecycle", request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert!(err.error.contains("timeout_ms"));
        assert_eq!(devnet.verifier.call_count(), 0);
    }

    #[tokio::test]
    async fn malformed_body_is_a_client_error() {
        let (state, _) = test_app_state();
        let router = create_router(state);

        let (status, _, _) =
            post_json(&router, "/lifecycle", serde_json::json!({ "steps": [] })).await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn config_endpoint_reports_effective_values() {
        let (state, _) = test_app_state();
        let router = create_router(state);
        let req = Request::builder()
            .uri("/config")
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let config: LifecycleConfig = serde_json::from_slice(&body).unwrap();
        assert_eq!(config.poll_interval_ms, 100);
        assert_eq!(config.indexing_timeout_ms, 5000);
    }
}
