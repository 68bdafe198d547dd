//! piphid - PiPhi I2C telemetry daemon
//!
//! Discovers MCP2221 bridge adapters, classifies the sensor behind each one
//! and serves the discovery/configuration API. Configured devices are polled
//! and their readings published over MQTT.
//!
//! Usage:
//!   piphid [OPTIONS] [config.toml]
//!
//! If no config file is provided, built-in defaults are used.

mod config;

use std::sync::Arc;

use piphi_api::{create_router, AppState};
use piphi_bridge::mock::demo_bridges;
use piphi_bridge::{create_opener, BoschDriverFactory, SysfsEnumerator};
use piphi_engine::{LogPublisher, MqttPublisher, TelemetryEngine};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::DaemonConfig;

/// Parsed command-line arguments
#[derive(Debug, Default, PartialEq)]
struct Args {
    /// Daemon config file (TOML)
    config_path: Option<String>,
    /// Overrides `server.port`
    port: Option<u16>,
    /// Use the mock bridge stack and log payloads instead of publishing
    mock: bool,
    /// JSON log lines
    log_json: bool,
}

fn parse_args_from(args: &[String]) -> Args {
    let mut result = Args::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                match args.get(i + 1).map(|p| p.parse::<u16>()) {
                    Some(Ok(port)) => result.port = Some(port),
                    Some(Err(_)) => eprintln!("warning: invalid port: {}", args[i + 1]),
                    None => eprintln!("warning: missing argument for --port"),
                }
                i += 2;
            }
            "--mock" => {
                result.mock = true;
                i += 1;
            }
            "--log-json" => {
                result.log_json = true;
                i += 1;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            arg if !arg.starts_with('-') => {
                // Positional argument = config file
                result.config_path = Some(arg.to_string());
                i += 1;
            }
            _ => {
                eprintln!("warning: unknown argument: {}", args[i]);
                i += 1;
            }
        }
    }

    result
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().skip(1).collect();
    parse_args_from(&args)
}

fn print_help() {
    eprintln!(
        r#"piphid - PiPhi I2C telemetry daemon

Usage: piphid [OPTIONS] [config.toml]

Options:
  -p, --port <port>  Listen on this port (overrides server.port)
      --mock         Use simulated bridges and log telemetry instead of MQTT
      --log-json     Emit logs as JSON lines
  -h, --help         Print this help message

Examples:
  # Run against real hardware with defaults
  piphid

  # Run with config file
  piphid /etc/piphi/piphid.toml

  # Demo mode on another port
  piphid --mock -p 8080
"#
    );
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "piphid=info,piphi_engine=info,piphi_bridge=info,piphi_api=info".into()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

fn build_engine(config: &DaemonConfig, mock: bool) -> anyhow::Result<TelemetryEngine> {
    let engine_config = config.engine.clone();

    if mock {
        tracing::info!("Using mock bridges, telemetry is logged only");
        let (enumerator, opener) = demo_bridges();
        return Ok(TelemetryEngine::new(
            engine_config,
            Arc::new(enumerator),
            Arc::new(opener),
            Arc::new(BoschDriverFactory),
            Arc::new(LogPublisher),
        ));
    }

    let bridge = &engine_config.discovery.bridge;
    tracing::info!(hardware_id = %bridge.hardware_id(), "Using MCP2221 bridges");
    let enumerator = SysfsEnumerator::new(bridge);
    let opener = create_opener(bridge)?;
    let publisher = MqttPublisher::connect(&engine_config.mqtt);

    Ok(TelemetryEngine::new(
        engine_config,
        Arc::new(enumerator),
        opener,
        Arc::new(BoschDriverFactory),
        Arc::new(publisher),
    ))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args();
    init_logging(args.log_json);

    tracing::info!("Starting piphid (PiPhi I2C telemetry daemon)");

    let mut config = if let Some(ref path) = args.config_path {
        tracing::info!("Loading config from: {}", path);
        DaemonConfig::load(path)?
    } else {
        tracing::info!("No config file provided, using defaults");
        DaemonConfig::default()
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let engine = Arc::new(build_engine(&config, args.mock)?);

    if config.engine.discovery.discover_on_startup {
        match engine.discover().await {
            Ok(devices) => tracing::info!(count = devices.len(), "Startup discovery complete"),
            Err(e) => tracing::warn!(error = %e, "Startup discovery failed"),
        }
    }

    let state = AppState::new(engine.clone()).with_manifest(config.server.manifest_path.clone());
    let app = create_router(state);

    let listener =
        tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port)).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.shutdown().await;
    tracing::info!("piphid stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        let parsed = parse_args_from(&args(&["--mock", "-p", "8080", "--log-json", "piphid.toml"]));
        assert_eq!(
            parsed,
            Args {
                config_path: Some("piphid.toml".into()),
                port: Some(8080),
                mock: true,
                log_json: true,
            }
        );
    }

    #[test]
    fn test_bad_port_is_ignored() {
        let parsed = parse_args_from(&args(&["--port", "http", "--bogus"]));
        assert_eq!(parsed, Args::default());
    }

    #[test]
    fn test_missing_port_keeps_earlier_flags() {
        let parsed = parse_args_from(&args(&["--log-json", "--port"]));
        assert_eq!(parsed.port, None);
        assert!(parsed.log_json);
    }

    #[tokio::test]
    async fn test_mock_engine_discovers_demo_bridges() {
        let engine = build_engine(&DaemonConfig::default(), true).unwrap();
        let devices = engine.discover().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(engine.registry().len(), 4);
    }
}
