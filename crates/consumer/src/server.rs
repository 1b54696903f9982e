//! Health, readiness and Prometheus endpoints for a running session
use std::net::SocketAddr;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;

use crate::metrics::{encode_metrics, SessionMetrics};
use crate::session::SessionState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub subscribed: bool,
}

/// Shared state for the endpoints. Reads the session through its metrics.
#[derive(Clone)]
pub struct ServerState {
    pub service: String,
    metrics: SessionMetrics,
}

impl ServerState {
    pub fn new(service: impl Into<String>) -> Self {
        let service = service.into();
        Self {
            metrics: SessionMetrics::new(service.as_str()),
            service,
        }
    }

    fn subscribed(&self) -> bool {
        self.metrics.get_state() == SessionState::Subscribed.ordinal()
    }
}

async fn health(State(state): State<ServerState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: state.service.clone(),
        subscribed: state.subscribed(),
    })
}

/// 200 only while the item subscription is live
async fn ready(State(state): State<ServerState>) -> (StatusCode, Json<HealthResponse>) {
    let subscribed = state.subscribed();
    let status_code = if subscribed {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status_code,
        Json(HealthResponse {
            status: if subscribed { "ready" } else { "not_ready" }.to_string(),
            service: state.service.clone(),
            subscribed,
        }),
    )
}

/// Prometheus text format
async fn metrics() -> impl IntoResponse {
    match encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {}", e),
        ),
    }
}

pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .with_state(state)
}

pub async fn run_server(addr: SocketAddr, state: ServerState) -> std::io::Result<()> {
    let app = create_router(state);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_returns_ok() {
        let app = create_router(ServerState::new("server_test_health"));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_follows_session_state() {
        let service = "server_test_ready";
        let session_metrics = SessionMetrics::new(service);

        session_metrics.set_state(SessionState::LoadingDictionaries.ordinal());
        let response = create_router(ServerState::new(service))
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        session_metrics.set_state(SessionState::Subscribed.ordinal());
        let response = create_router(ServerState::new(service))
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_exports_session_counters() {
        let service = "server_test_metrics";
        SessionMetrics::new(service).inc_received("login", "refresh");

        let response = create_router(ServerState::new(service))
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("eta_consumer_messages_received_total"));
        assert!(text.contains(service));
    }
}
