//! HTTP tests against a live server on an ephemeral port

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use piphi_api::{create_router, AppState};
use piphi_bridge::mock::demo_bridges;
use piphi_bridge::BoschDriverFactory;
use piphi_engine::{EngineConfig, RecordingPublisher, TelemetryEngine};
use pretty_assertions::assert_eq;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::net::TcpListener;

struct TestServer {
    addr: SocketAddr,
    engine: Arc<TelemetryEngine>,
    publisher: Arc<RecordingPublisher>,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn start(manifest: Option<&std::path::Path>) -> Self {
        let (enumerator, opener) = demo_bridges();
        let publisher = Arc::new(RecordingPublisher::new());
        let engine = Arc::new(TelemetryEngine::new(
            EngineConfig::default(),
            Arc::new(enumerator),
            Arc::new(opener),
            Arc::new(BoschDriverFactory),
            publisher.clone(),
        ));

        let mut state = AppState::new(engine.clone());
        if let Some(path) = manifest {
            state = state.with_manifest(path);
        }

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = create_router(state);
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();

        Self {
            addr,
            engine,
            publisher,
            client,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let response = self.client.get(self.url(path)).send().await.unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }

    async fn post_config(&self, body: Value) -> reqwest::Response {
        self.client
            .post(self.url("/config"))
            .json(&body)
            .send()
            .await
            .unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[tokio::test]
async fn test_health() {
    let server = TestServer::start(None).await;
    let (status, body) = server.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn test_discovery_lists_particulate_sensor() {
    let server = TestServer::start(None).await;
    let (status, body) = server.get("/discovery").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "devices": [{
                "bus_path": "/dev/ttyACM0",
                "serial": "DEMO0000",
                "name": "MCP2221 USB-I2C/UART Combo",
                "sensor_kind": "PMSA003I",
                "bridge_serial": "MOCK0000"
            }]
        })
    );
}

#[tokio::test]
async fn test_apply_config_starts_polling() {
    let server = TestServer::start(None).await;
    server.get("/discovery").await;

    let response = server
        .post_config(json!({
            "usbpath": "/dev/ttyACM0",
            "id": "d1",
            "secret": "s3cret",
            "container_id": "c1",
            "sensor": "PMSA003I"
        }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.json::<Value>().await.unwrap(), json!({}));

    server.publisher.wait_for(1).await;
    let payload = &server.publisher.payloads()[0];
    assert_eq!(payload.device_id, "d1");
    assert_eq!(payload.container_id.as_deref(), Some("c1"));
    assert!(server.engine.is_running("d1").await);

    let (status, config) = server.get("/config").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        config,
        json!({
            "id": "d1",
            "secret": "***",
            "container_id": "c1",
            "usbpath": "/dev/ttyACM0",
            "sensor": "PMSA003I"
        })
    );

    server.engine.shutdown().await;
}

#[tokio::test]
async fn test_telemetry_signature_covers_posted_body() {
    let server = TestServer::start(None).await;
    server.get("/discovery").await;

    let response = server
        .post_config(json!({
            "container_id": null,
            "id": "d1",
            "secret": "s",
            "usbpath": "/dev/ttyACM0"
        }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    server.publisher.wait_for(1).await;
    let payload = &server.publisher.payloads()[0];
    assert_eq!(payload.container_id, None);
    assert_eq!(
        payload.signature,
        "96f62fb256ba6086699c89e921c1c7999c4cc697e9f4d60ab23484fd8b120cdb"
    );

    server.engine.shutdown().await;
}

#[tokio::test]
async fn test_unknown_bus_path_is_not_supported() {
    let server = TestServer::start(None).await;
    server.get("/discovery").await;

    let response = server
        .post_config(json!({"bus_path": "/dev/ttyUSB7", "id": "d1", "secret": "s"}))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        response.json::<Value>().await.unwrap(),
        json!({
            "error": "not_found",
            "message": "Sensor not supported: /dev/ttyUSB7"
        })
    );
}

#[tokio::test]
async fn test_malformed_config_is_rejected() {
    let server = TestServer::start(None).await;

    let response = server.post_config(json!({"id": "d1"})).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = server
        .post_config(json!({"bus_path": "/dev/ttyACM0", "id": "", "secret": "s"}))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_manifest_is_served() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("manifest.json");
    std::fs::write(&path, r#"{"name": "piphi-i2c", "version": "0.1.0"}"#).unwrap();

    let server = TestServer::start(Some(&path)).await;
    let (status, body) = server.get("/manifest.json").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"name": "piphi-i2c", "version": "0.1.0"}));
}

#[tokio::test]
async fn test_broken_manifest_is_server_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("manifest.json");
    std::fs::write(&path, "{not json").unwrap();

    let server = TestServer::start(Some(&path)).await;
    let (status, body) = server.get("/manifest.json").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "internal_error");

    let missing = TestServer::start(Some(&dir.path().join("absent.json"))).await;
    let (status, _) = missing.get("/manifest.json").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
