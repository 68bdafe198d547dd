//! Daemon configuration file

use std::path::{Path, PathBuf};

use anyhow::Context;
use piphi_engine::EngineConfig;
use serde::Deserialize;

/// Contents of the daemon's TOML file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(flatten)]
    pub engine: EngineConfig,
}

impl DaemonConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_manifest_path")]
    pub manifest_path: PathBuf,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3669
}

fn default_manifest_path() -> PathBuf {
    PathBuf::from("manifest.json")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            manifest_path: default_manifest_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_full_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("piphid.toml");
        std::fs::write(
            &path,
            r#"
[server]
port = 8080
manifest_path = "/etc/piphi/manifest.json"

[mqtt]
host = "broker"

[discovery]
report_all_kinds = true
vendor_id = 0x04D8

[polling]
particulate_interval_secs = 30
"#,
        )
        .unwrap();

        let config = DaemonConfig::load(&path).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(
            config.server.manifest_path,
            PathBuf::from("/etc/piphi/manifest.json")
        );
        assert_eq!(config.engine.mqtt.host, "broker");
        assert_eq!(config.engine.mqtt.port, 1883);
        assert!(config.engine.discovery.report_all_kinds);
        assert_eq!(config.engine.discovery.bridge.vendor_id, 0x04D8);
        assert_eq!(config.engine.polling.particulate_interval_secs, 30);
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config: DaemonConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 3669);
        assert_eq!(config.engine, EngineConfig::default());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = DaemonConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }
}
