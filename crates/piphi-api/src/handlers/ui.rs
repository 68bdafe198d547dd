//! Configuration form schema

use axum::Json;
use serde_json::{json, Value};

/// Sensor models offered by the configuration form
pub const SENSOR_MODELS: [&str; 5] = ["BME680", "BME688", "AHT20", "BME280", "PMSA003I"];

/// GET /ui
pub async fn ui_schema() -> Json<Value> {
    Json(json!({
        "schema": {
            "title": "Official I2C Library Configuration",
            "description": "Configuration for PiPhi Network Official I2C Library.",
            "type": "object",
            "required": ["sensor"],
            "properties": {
                "sensor": {
                    "type": "string",
                    "title": "Sensor Type",
                    "description": "Select a sensor type",
                    "enum": SENSOR_MODELS,
                    "errorMessage": "Please select a device before continuing"
                }
            }
        }
    }))
}
