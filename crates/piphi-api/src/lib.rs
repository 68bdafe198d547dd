//! piphi-api - HTTP API for the PiPhi I2C telemetry engine
//!
//! A thin axum layer over [`piphi_engine::TelemetryEngine`].
//!
//! # Usage
//!
//! ```ignore
//! use piphi_api::{create_router, AppState};
//!
//! let state = AppState::new(engine).with_manifest("manifest.json");
//! let router = create_router(state);
//! ```

pub mod error;
pub mod handlers;
pub mod state;

pub use error::ApiError;
pub use state::AppState;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the API router with the given application state
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/discovery", get(handlers::discovery::discover))
        .route(
            "/config",
            get(handlers::config::get_config).post(handlers::config::apply_config),
        )
        .route("/ui", get(handlers::ui::ui_schema))
        .route("/manifest.json", get(handlers::manifest::manifest))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use piphi_bridge::mock::demo_bridges;
    use piphi_bridge::BoschDriverFactory;
    use piphi_engine::{EngineConfig, RecordingPublisher, TelemetryEngine};
    use serde_json::Value;
    use tower::ServiceExt;

    fn router() -> Router {
        let (enumerator, opener) = demo_bridges();
        let engine = TelemetryEngine::new(
            EngineConfig::default(),
            Arc::new(enumerator),
            Arc::new(opener),
            Arc::new(BoschDriverFactory),
            Arc::new(RecordingPublisher::new()),
        );
        create_router(AppState::new(Arc::new(engine)))
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get_json(router(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_ui_schema_lists_sensor_models() {
        let (status, body) = get_json(router(), "/ui").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["schema"]["required"], serde_json::json!(["sensor"]));
        assert_eq!(
            body["schema"]["properties"]["sensor"]["enum"],
            serde_json::json!(["BME680", "BME688", "AHT20", "BME280", "PMSA003I"])
        );
    }

    #[tokio::test]
    async fn test_config_before_apply_is_not_found() {
        let (status, body) = get_json(router(), "/config").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn test_manifest_without_path_is_not_found() {
        let (status, _) = get_json(router(), "/manifest.json").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
