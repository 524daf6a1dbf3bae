//! REST API module using Axum
//!
//! HTTP and WebSocket surface for operators:
//! - live rack tiles, engine status, and the action/anomaly ledgers
//! - discovery control and device-registry management
//! - mode switching and manual action approval
//! - Prometheus metrics exposition

pub mod handlers;
mod routes;
mod ws;

pub use handlers::ApiContext;

use axum::Router;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

/// Create the complete application router.
pub fn create_app(state: ApiContext) -> Router {
    // CORS is permissive: the operator UI is served from elsewhere.
    let cors = CorsLayer::permissive();

    routes::api_routes(state)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
}

/// API error type for consistent error responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: axum::http::StatusCode,
    pub message: String,
    pub code: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: axum::http::StatusCode::BAD_REQUEST,
            message: message.into(),
            code: "BAD_REQUEST".to_string(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: axum::http::StatusCode::NOT_FOUND,
            message: message.into(),
            code: "NOT_FOUND".to_string(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: axum::http::StatusCode::SERVICE_UNAVAILABLE,
            message: message.into(),
            code: "UNAVAILABLE".to_string(),
        }
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({
            "error": {
                "code": self.code,
                "message": self.message,
            }
        });

        (self.status, axum::Json(body)).into_response()
    }
}
