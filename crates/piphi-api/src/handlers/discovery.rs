//! Discovery API handler
//!
//! Each request enumerates the host again and rebuilds the device registry.

use axum::extract::State;
use axum::Json;
use piphi_core::DiscoveredDevice;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

/// Discovery response
#[derive(Debug, Serialize)]
pub struct DiscoveryResponse {
    pub devices: Vec<DiscoveredDevice>,
}

/// GET /discovery
pub async fn discover(State(state): State<AppState>) -> Result<Json<DiscoveryResponse>, ApiError> {
    let devices = state.engine().discover().await?;
    Ok(Json(DiscoveryResponse { devices }))
}
