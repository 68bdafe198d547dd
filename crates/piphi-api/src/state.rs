//! Application state for the PiPhi API

use std::path::{Path, PathBuf};
use std::sync::Arc;

use piphi_engine::TelemetryEngine;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    engine: Arc<TelemetryEngine>,
    /// File served by `GET /manifest.json`
    manifest_path: Option<Arc<PathBuf>>,
}

impl AppState {
    pub fn new(engine: Arc<TelemetryEngine>) -> Self {
        Self {
            engine,
            manifest_path: None,
        }
    }

    pub fn with_manifest(mut self, path: impl Into<PathBuf>) -> Self {
        self.manifest_path = Some(Arc::new(path.into()));
        self
    }

    pub fn engine(&self) -> &TelemetryEngine {
        &self.engine
    }

    pub fn manifest_path(&self) -> Option<&Path> {
        self.manifest_path.as_deref().map(PathBuf::as_path)
    }
}
