//! Manifest handler

use axum::extract::State;
use axum::Json;
use serde_json::Value;

use crate::error::ApiError;
use crate::state::AppState;

/// GET /manifest.json
pub async fn manifest(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let path = state
        .manifest_path()
        .ok_or_else(|| ApiError::NotFound("No manifest configured".to_string()))?;

    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound(format!(
                "Manifest not found: {}",
                path.display()
            )));
        }
        Err(e) => {
            return Err(ApiError::Internal(format!(
                "Failed to read manifest {}: {e}",
                path.display()
            )));
        }
    };

    serde_json::from_str(&text)
        .map(Json)
        .map_err(|e| ApiError::Internal(format!("Invalid manifest {}: {e}", path.display())))
}
