//! Device configuration models

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{EngineError, EngineResult};

/// Configuration pushed for one device
///
/// The object is kept exactly as received: that document is what gets
/// signed and what `GET /config` reports. The typed fields are read out of
/// it for routing and are never written back.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct AppliedConfig {
    id: String,
    secret: String,
    container_id: Option<String>,
    bus_path: String,
    document: Map<String, Value>,
}

impl AppliedConfig {
    pub fn new(
        id: impl Into<String>,
        secret: impl Into<String>,
        bus_path: impl Into<String>,
    ) -> Self {
        let (id, secret, bus_path) = (id.into(), secret.into(), bus_path.into());
        let mut document = Map::new();
        document.insert("id".into(), Value::String(id.clone()));
        document.insert("secret".into(), Value::String(secret.clone()));
        document.insert("bus_path".into(), Value::String(bus_path.clone()));
        Self {
            id,
            secret,
            container_id: None,
            bus_path,
            document,
        }
    }

    pub fn with_container_id(mut self, container_id: impl Into<String>) -> Self {
        let container_id = container_id.into();
        self.document
            .insert("container_id".into(), Value::String(container_id.clone()));
        self.container_id = Some(container_id);
        self
    }

    /// Add a field that is not interpreted; the typed fields cannot be replaced this way
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        if !ROUTING_KEYS.contains(&key.as_str()) {
            self.document.insert(key, value);
        }
        self
    }

    /// Device identifier; pollers are keyed by it
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Shared secret used to sign the configuration
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Container the telemetry is attributed to
    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    /// Bus path of the bridge to poll, from `bus_path` or the legacy `usbpath`
    pub fn bus_path(&self) -> &str {
        &self.bus_path
    }

    /// The configuration object as received
    pub fn document(&self) -> &Map<String, Value> {
        &self.document
    }

    /// Reject configurations that cannot be bound to a poller
    pub fn validate(&self) -> EngineResult<()> {
        if self.id.trim().is_empty() {
            return Err(EngineError::InvalidConfig("id must not be empty".into()));
        }
        if self.bus_path.trim().is_empty() {
            return Err(EngineError::InvalidConfig(
                "bus_path must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// The configuration as a JSON object, the input of the signer
    pub fn to_value(&self) -> Value {
        Value::Object(self.document.clone())
    }

    /// JSON view with the secret masked
    pub fn redacted(&self) -> Value {
        let mut document = self.document.clone();
        document.insert("secret".into(), Value::String("***".into()));
        Value::Object(document)
    }
}

const ROUTING_KEYS: [&str; 5] = ["id", "secret", "container_id", "bus_path", "usbpath"];

impl Serialize for AppliedConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.document.serialize(serializer)
    }
}

impl TryFrom<Map<String, Value>> for AppliedConfig {
    type Error = String;

    fn try_from(document: Map<String, Value>) -> Result<Self, Self::Error> {
        let id = required_str(&document, "id")?;
        let secret = required_str(&document, "secret")?;
        let bus_path = match document.get("bus_path") {
            Some(_) => required_str(&document, "bus_path")?,
            None => required_str(&document, "usbpath")
                .map_err(|_| "missing field `bus_path` (or `usbpath`)".to_string())?,
        };
        let container_id = match document.get("container_id") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => return Err(format!("`container_id` must be a string, got {other}")),
        };

        Ok(Self {
            id,
            secret,
            container_id,
            bus_path,
            document,
        })
    }
}

fn required_str(document: &Map<String, Value>, key: &str) -> Result<String, String> {
    match document.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(format!("`{key}` must be a string, got {other}")),
        None => Err(format!("missing field `{key}`")),
    }
}
