//! Device configuration handlers

use axum::extract::State;
use axum::Json;
use piphi_core::AppliedConfig;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

/// POST /config
///
/// Starts (or replaces) the poller for the configured device. Unknown
/// fields are accepted and become part of the signed configuration.
pub async fn apply_config(
    State(state): State<AppState>,
    Json(config): Json<AppliedConfig>,
) -> Result<Json<Value>, ApiError> {
    state.engine().apply(config).await?;
    Ok(Json(json!({})))
}

/// GET /config
///
/// The last applied configuration, with its secret masked.
pub async fn get_config(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let config = state
        .engine()
        .applied_config()
        .ok_or_else(|| ApiError::NotFound("No configuration applied".to_string()))?;
    Ok(Json(config.redacted()))
}
