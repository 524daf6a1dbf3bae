//! API route definitions
//!
//! The operator surface at a glance:
//! - `/health`, `/status`, `/tiles`, `/metrics`: observability
//! - `/actions`, `/anomalies`, `/telemetry/history`: ledger reads
//! - `/discover/*`, `/devices/*`, `/templates`: discovery & registry
//! - `/mode`, `/actions/approve`: operator control
//! - `/ws`: 1 Hz push of the dashboard snapshot

use axum::{
    routing::{delete, get, post},
    Router,
};

use super::handlers::{self, ApiContext};
use super::ws;

/// Create all routes.
pub fn api_routes(state: ApiContext) -> Router {
    Router::new()
        .route("/health", get(handlers::get_health))
        .route("/tiles", get(handlers::get_tiles))
        .route("/status", get(handlers::get_status))
        .route("/actions", get(handlers::get_actions))
        .route("/actions/approve", post(handlers::approve_action))
        .route("/anomalies", get(handlers::get_anomalies))
        .route("/telemetry/history", get(handlers::get_telemetry_history))
        // Discovery
        .route("/discover/start", post(handlers::discover_start))
        .route("/discover", get(handlers::get_discover))
        .route("/discover/approve", post(handlers::approve_device))
        // Device registry
        .route("/devices", get(handlers::get_devices))
        .route("/devices/summary", get(handlers::get_devices_summary))
        .route("/devices/validate", post(handlers::validate_device))
        .route("/devices/:id", delete(handlers::delete_device))
        .route("/templates", get(handlers::get_templates))
        // Mode control
        .route("/mode", get(handlers::get_mode).post(handlers::set_mode))
        // Simulator proxy
        .route(
            "/simulator/scenarios",
            get(handlers::simulator_scenarios).post(handlers::simulator_set_scenario),
        )
        // Prometheus exposition
        .route("/metrics", get(handlers::get_metrics))
        // Dashboard push feed
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::api::handlers::test_support::test_context;

    #[tokio::test]
    async fn health_endpoint_responds() {
        let (_dirs, state) = test_context().await;
        let app = api_routes(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_endpoint_responds() {
        let (_dirs, state) = test_context().await;
        let app = api_routes(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_endpoint_is_text() {
        let (_dirs, state) = test_context().await;
        let app = api_routes(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .unwrap();
        assert!(content_type.to_str().unwrap().starts_with("text/plain"));
    }

    #[tokio::test]
    async fn unknown_action_approval_is_404() {
        let (_dirs, state) = test_context().await;
        let app = api_routes(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/actions/approve")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"id": 424242}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_mode_is_400() {
        let (_dirs, state) = test_context().await;
        let app = api_routes(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/mode")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"mode": "yolo"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
