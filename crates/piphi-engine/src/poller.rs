//! Telemetry poller
//!
//! One poller runs per configured device: read → decode → assemble payload
//! → publish → sleep, until cancelled or a bus transfer fails. Cancellation
//! is observed at the publish and at the sleeps. Bus transfers block, so each
//! one runs on the blocking pool and the async workers stay free.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use piphi_bridge::{EnvironmentalDriver, EnvironmentalReading, I2cBus, SensorSettings, TransportError};
use piphi_conv::{aht20, dew_point, pmsa003i, DecodeError, ParticulateReading};
use piphi_core::{units, MetricValue, SensorKind, TelemetryPayload};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::activator::{ActiveSensor, SensorHandle};
use crate::config::PollingConfig;
use crate::probe::{AHT20_ADDRESS, PMSA003I_ADDRESS};
use crate::publish::{QoS, TelemetryPublisher};

/// AHT20 "trigger measurement" command
const AHT20_TRIGGER: [u8; 3] = [0xAC, 0x33, 0x00];
const PMSA003I_REG_DATA: u8 = 0x00;

/// Why a poller stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerExit {
    Cancelled,
    Failed(TransportError),
}

/// Everything a poller needs besides its sensor
#[derive(Clone)]
pub struct PollerContext {
    pub device_id: String,
    pub container_id: Option<String>,
    /// Signature of the configuration that started the poller
    pub signature: String,
    pub topic: String,
    pub polling: PollingConfig,
    pub publisher: Arc<dyn TelemetryPublisher>,
    pub cancel: CancellationToken,
}

/// Polling loop bound to one activated sensor
pub struct TelemetryPoller {
    sensor: ActiveSensor,
    ctx: PollerContext,
}

/// Outcome of one suspension point
enum Step {
    Continue,
    Cancelled,
}

impl TelemetryPoller {
    pub fn new(sensor: ActiveSensor, ctx: PollerContext) -> Self {
        Self { sensor, ctx }
    }

    /// Run until cancelled or a transfer fails; the sensor claim is released on return
    pub async fn run(self) -> PollerExit {
        let TelemetryPoller { sensor, ctx } = self;
        let bus_path = sensor.bus_path().to_string();
        let kind = sensor.handle.kind();
        info!(device_id = %ctx.device_id, bus_path = %bus_path, kind = %kind, "Poller started");

        let (handle, claim) = sensor.into_parts();
        let result = match handle {
            SensorHandle::Environmental(driver) => {
                ctx.poll_environmental(Arc::new(Mutex::new(driver))).await
            }
            SensorHandle::Aht20(bus) => ctx.poll_aht20(bus).await,
            SensorHandle::Pmsa003i(bus) => ctx.poll_pmsa003i(bus).await,
        };

        let exit = match result {
            Ok(()) => {
                info!(device_id = %ctx.device_id, bus_path = %bus_path, "Poller cancelled");
                PollerExit::Cancelled
            }
            Err(e) => {
                error!(
                    device_id = %ctx.device_id,
                    bus_path = %bus_path,
                    error = %e,
                    "Poller stopped on transport error"
                );
                PollerExit::Failed(e)
            }
        };
        drop(claim);
        exit
    }
}

/// Run one blocking bus step on the blocking pool
async fn bus_step<T, F>(step: F) -> Result<T, TransportError>
where
    F: FnOnce() -> Result<T, TransportError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(step)
        .await
        .map_err(|e| TransportError::Io(format!("bus task failed: {e}")))?
}

impl PollerContext {
    fn payload(&self) -> TelemetryPayload {
        TelemetryPayload::new(
            self.device_id.clone(),
            self.container_id.clone(),
            self.signature.clone(),
            Utc::now(),
        )
    }

    /// Sleep unless cancelled first
    async fn sleep(&self, duration: Duration) -> Step {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Step::Cancelled,
            _ = tokio::time::sleep(duration) => Step::Continue,
        }
    }

    /// Publish unless cancelled first; publish failures do not stop the poller
    async fn publish(&self, payload: &TelemetryPayload) -> Step {
        let bytes = match payload.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(device_id = %self.device_id, error = %e, "Failed to serialize payload");
                return Step::Continue;
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Step::Cancelled,
            result = self.publisher.publish(&self.topic, bytes, QoS::AtLeastOnce, true) => {
                match result {
                    Ok(()) => debug!(device_id = %self.device_id, metrics = ?payload.metrics, "Telemetry published"),
                    Err(e) => warn!(device_id = %self.device_id, error = %e, "Publish failed"),
                }
                Step::Continue
            }
        }
    }

    async fn poll_environmental(
        &self,
        driver: Arc<Mutex<Box<dyn EnvironmentalDriver>>>,
    ) -> Result<(), TransportError> {
        let kind = driver.lock().kind();
        let configured = driver.clone();
        bus_step(move || configured.lock().configure(&SensorSettings::default())).await?;

        loop {
            let sampled = driver.clone();
            let reading = bus_step(move || sampled.lock().read()).await?;
            let payload = match kind {
                SensorKind::Bme68x => self.bme68x_payload(&reading),
                _ => self.bme280_payload(&reading),
            };

            if let Step::Cancelled = self.publish(&payload).await {
                return Ok(());
            }
            if let Step::Cancelled = self.sleep(self.polling.environmental_interval()).await {
                return Ok(());
            }
        }
    }

    fn bme68x_payload(&self, reading: &EnvironmentalReading) -> TelemetryPayload {
        let mut payload = self.payload();
        payload.push_metric("temperature", MetricValue::rounded(reading.temperature), units::CELSIUS);
        payload.push_metric("pressure", MetricValue::rounded(reading.pressure), units::HECTOPASCAL);
        payload.push_metric("humidity", MetricValue::rounded(reading.humidity), units::PERCENT);
        if let Some(gas) = reading.gas_resistance {
            payload.push_metric("gas", MetricValue::rounded(gas), units::OHM);
        }
        match dew_point(reading.temperature, reading.humidity / 100.0) {
            Ok(dew) => payload.push_metric("dew_pt", MetricValue::rounded(dew), units::CELSIUS),
            Err(e) => warn!(device_id = %self.device_id, error = %e, "Dew point omitted"),
        }
        payload
    }

    fn bme280_payload(&self, reading: &EnvironmentalReading) -> TelemetryPayload {
        self.payload()
            .with_metric("temperature", reading.temperature, units::CELSIUS)
            .with_metric("pressure", reading.pressure, units::HECTOPASCAL)
            .with_metric("humidity", reading.humidity, units::PERCENT)
    }

    async fn poll_aht20(&self, bus: Arc<dyn I2cBus>) -> Result<(), TransportError> {
        loop {
            let trigger = bus.clone();
            bus_step(move || trigger.write(AHT20_ADDRESS, &AHT20_TRIGGER)).await?;
            if let Step::Cancelled = self.sleep(self.polling.aht20_measurement_delay()).await {
                return Ok(());
            }

            let reader = bus.clone();
            let data = bus_step(move || reader.read(AHT20_ADDRESS, aht20::MEASUREMENT_LEN)).await?;
            match aht20::decode(&data) {
                Ok(reading) => {
                    let payload = self
                        .payload()
                        .with_metric("temperature", MetricValue::rounded(reading.temperature), units::CELSIUS)
                        .with_metric("humidity", MetricValue::rounded(reading.humidity), units::PERCENT);
                    if let Step::Cancelled = self.publish(&payload).await {
                        return Ok(());
                    }
                }
                Err(DecodeError::NotReady { status }) => {
                    debug!(device_id = %self.device_id, status = format!("0x{:02X}", status), "AHT20 busy, skipping cycle");
                }
                Err(e) => warn!(device_id = %self.device_id, error = %e, "AHT20 sample discarded"),
            }

            if let Step::Cancelled = self.sleep(self.polling.environmental_interval()).await {
                return Ok(());
            }
        }
    }

    fn particulate_payload(&self, reading: &ParticulateReading) -> TelemetryPayload {
        let mut payload = self.payload();
        for (name, value) in reading.concentrations() {
            payload.push_metric(name, value, units::MICROGRAMS_PER_M3);
        }
        for (name, value) in reading.particle_counts() {
            payload.push_metric(name, value, units::PARTICLES_PER_DECILITRE);
        }
        payload
    }

    async fn poll_pmsa003i(&self, bus: Arc<dyn I2cBus>) -> Result<(), TransportError> {
        loop {
            let reader = bus.clone();
            let block = bus_step(move || {
                reader.read_block_data(PMSA003I_ADDRESS, PMSA003I_REG_DATA, pmsa003i::FRAME_LEN)
            })
            .await?;
            match pmsa003i::inspect(&block) {
                Ok(inspection) => {
                    if let Some(issue) = &inspection.issue {
                        warn!(device_id = %self.device_id, error = %issue, "Invalid PMSA003I frame");
                    }
                    debug!(device_id = %self.device_id, reading = ?inspection.reading, "PMSA003I reading");

                    if inspection.is_valid() || self.polling.publish_invalid_frames {
                        let payload = self.particulate_payload(&inspection.reading);
                        if let Step::Cancelled = self.publish(&payload).await {
                            return Ok(());
                        }
                    }
                }
                Err(e) => warn!(device_id = %self.device_id, error = %e, "PMSA003I block discarded"),
            }

            if let Step::Cancelled = self.sleep(self.polling.particulate_interval()).await {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activator::SensorActivator;
    use crate::publish::RecordingPublisher;
    use crate::registry::{tests::entry, DeviceRegistry};
    use piphi_bridge::mock::{pmsa003i_frame, MockBus, AHT20_SAMPLE};
    use piphi_bridge::BoschDriverFactory;
    use pretty_assertions::assert_eq;

    struct Harness {
        registry: Arc<DeviceRegistry>,
        publisher: Arc<RecordingPublisher>,
        cancel: CancellationToken,
        poller: TelemetryPoller,
    }

    fn harness(kind: SensorKind, bus: Arc<MockBus>, polling: PollingConfig) -> Harness {
        let registry = Arc::new(DeviceRegistry::new());
        let mut e = entry("/dev/ttyACM0", kind, 0);
        e.bus = bus;
        registry.put(e);

        let sensor = SensorActivator::new(registry.clone(), Arc::new(BoschDriverFactory))
            .activate("/dev/ttyACM0")
            .unwrap();
        let publisher = Arc::new(RecordingPublisher::new());
        let cancel = CancellationToken::new();
        let ctx = PollerContext {
            device_id: "d1".into(),
            container_id: Some("c1".into()),
            signature: "sig".into(),
            topic: "piphi/telemetry".into(),
            polling,
            publisher: publisher.clone(),
            cancel: cancel.clone(),
        };

        Harness {
            registry,
            publisher,
            cancel,
            poller: TelemetryPoller::new(sensor, ctx),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pmsa003i_publishes_particulates() {
        let frame = pmsa003i_frame([1, 300, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        let bus = Arc::new(MockBus::new().with_pmsa003i(&frame));
        let h = harness(SensorKind::Pmsa003i, bus, PollingConfig::default());

        let task = tokio::spawn(h.poller.run());
        h.publisher.wait_for(1).await;
        h.cancel.cancel();
        assert_eq!(task.await.unwrap(), PollerExit::Cancelled);

        let messages = h.publisher.messages();
        assert_eq!(messages[0].topic, "piphi/telemetry");
        assert_eq!(messages[0].qos, QoS::AtLeastOnce);
        assert!(messages[0].retain);

        let payload = &h.publisher.payloads()[0];
        assert_eq!(payload.device_id, "d1");
        assert_eq!(payload.container_id.as_deref(), Some("c1"));
        assert_eq!(payload.signature, "sig");
        assert_eq!(payload.metrics.len(), 12);
        assert_eq!(payload.metric("pm25_standard"), Some(MetricValue::Integer(300)));
        assert_eq!(payload.units["pm25_standard"], "µg/m³");
        assert_eq!(payload.units["particles_100um"], "#/0.1L");
        assert!(!h.registry.is_claimed("/dev/ttyACM0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pmsa003i_cadence() {
        let bus = Arc::new(MockBus::new().with_pmsa003i(&pmsa003i_frame([2; 12])));
        let h = harness(SensorKind::Pmsa003i, bus, PollingConfig::default());

        let task = tokio::spawn(h.poller.run());
        h.publisher.wait_for(1).await;
        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(h.publisher.len(), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.publisher.len(), 2);

        h.cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_frame_is_discarded_by_default() {
        let mut frame = pmsa003i_frame([3; 12]);
        frame[6] ^= 0xFF;
        let bus = Arc::new(MockBus::new().with_pmsa003i(&frame));
        let h = harness(SensorKind::Pmsa003i, bus, PollingConfig::default());

        let task = tokio::spawn(h.poller.run());
        tokio::time::sleep(Duration::from_secs(150)).await;
        assert!(h.publisher.is_empty());

        h.cancel.cancel();
        assert_eq!(task.await.unwrap(), PollerExit::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_frame_published_when_enabled() {
        let mut frame = pmsa003i_frame([3; 12]);
        frame[31] ^= 0x01;
        let bus = Arc::new(MockBus::new().with_pmsa003i(&frame));
        let polling = PollingConfig {
            publish_invalid_frames: true,
            ..PollingConfig::default()
        };
        let h = harness(SensorKind::Pmsa003i, bus, polling);

        let task = tokio::spawn(h.poller.run());
        h.publisher.wait_for(1).await;
        h.cancel.cancel();
        task.await.unwrap();

        assert_eq!(h.publisher.payloads()[0].metric("pm10_env"), Some(MetricValue::Integer(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_aht20_cycle() {
        let bus = Arc::new(MockBus::new().with_aht20());
        let h = harness(SensorKind::Aht20, bus.clone(), PollingConfig::default());

        let task = tokio::spawn(h.poller.run());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(h.publisher.is_empty(), "published before the measurement delay");

        h.publisher.wait_for(1).await;
        h.cancel.cancel();
        task.await.unwrap();

        assert_eq!(bus.writes_to(AHT20_ADDRESS)[0], AHT20_TRIGGER.to_vec());
        let payload = &h.publisher.payloads()[0];
        assert_eq!(payload.metric("temperature"), Some(MetricValue::Integer(23)));
        assert_eq!(payload.metric("humidity"), Some(MetricValue::Integer(45)));
        assert_eq!(payload.units["temperature"], "°C");
        assert_eq!(payload.units["humidity"], "%");
    }

    #[tokio::test(start_paused = true)]
    async fn test_aht20_busy_cycle_is_skipped() {
        // with_aht20 queues one good sample, served first
        let bus = Arc::new(MockBus::new().with_aht20());
        let mut busy = AHT20_SAMPLE.to_vec();
        busy[0] |= 0x80;
        bus.queue_read(AHT20_ADDRESS, busy);
        bus.queue_read(AHT20_ADDRESS, AHT20_SAMPLE.to_vec());
        let h = harness(SensorKind::Aht20, bus, PollingConfig::default());

        let task = tokio::spawn(h.poller.run());
        h.publisher.wait_for(1).await;
        // second cycle reads the busy block: trigger at 20 s, read at 30 s
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(h.publisher.len(), 1);

        h.publisher.wait_for(2).await;
        h.cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_bme680_rounded_metrics() {
        let bus = Arc::new(MockBus::new().with_bme680(0x76));
        let h = harness(SensorKind::Bme68x, bus, PollingConfig::default());

        let task = tokio::spawn(h.poller.run());
        h.publisher.wait_for(1).await;
        h.cancel.cancel();
        task.await.unwrap();

        let payload = &h.publisher.payloads()[0];
        assert_eq!(payload.metric("temperature"), Some(MetricValue::Integer(26)));
        assert_eq!(payload.metric("pressure"), Some(MetricValue::Integer(1009)));
        assert_eq!(payload.metric("humidity"), Some(MetricValue::Integer(53)));
        assert_eq!(payload.metric("gas"), Some(MetricValue::Integer(271155)));
        assert!(payload.metric("dew_pt").is_some());
        assert_eq!(payload.units["gas"], "ohm");
        assert_eq!(payload.units["dew_pt"], "°C");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dry_air_omits_dew_point_only() {
        let bus = Arc::new(MockBus::new().with_bme680(0x76));
        // humidity ADC of zero clamps to 0 %
        bus.set_registers(0x76, 0x1D + 8, &[0x00, 0x00]);
        let h = harness(SensorKind::Bme68x, bus, PollingConfig::default());

        let task = tokio::spawn(h.poller.run());
        h.publisher.wait_for(2).await;
        h.cancel.cancel();
        task.await.unwrap();

        for payload in &h.publisher.payloads()[..2] {
            assert_eq!(payload.metric("humidity"), Some(MetricValue::Integer(0)));
            assert!(payload.metric("temperature").is_some());
            assert!(payload.metric("pressure").is_some());
            assert!(payload.metric("gas").is_some());
            assert!(payload.metric("dew_pt").is_none());
            assert!(!payload.units.contains_key("dew_pt"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bme280_values_are_not_rounded() {
        let bus = Arc::new(MockBus::new().with_bme280(0x77));
        let h = harness(SensorKind::Bme280, bus, PollingConfig::default());

        let task = tokio::spawn(h.poller.run());
        h.publisher.wait_for(1).await;
        h.cancel.cancel();
        task.await.unwrap();

        let payload = &h.publisher.payloads()[0];
        let temperature = payload.metric("temperature").unwrap().as_f64();
        assert!((temperature - 25.08).abs() < 0.01);
        assert!(payload.metric("gas").is_none());
        assert_eq!(payload.metrics.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_is_fatal_and_releases_claim() {
        let bus = Arc::new(MockBus::new().with_pmsa003i(&pmsa003i_frame([1; 12])));
        let h = harness(SensorKind::Pmsa003i, bus.clone(), PollingConfig::default());

        let task = tokio::spawn(h.poller.run());
        h.publisher.wait_for(1).await;
        bus.fail_with(Some(TransportError::Io("unplugged".into())));

        let exit = task.await.unwrap();
        assert_eq!(exit, PollerExit::Failed(TransportError::Io("unplugged".into())));
        assert!(!h.registry.is_claimed("/dev/ttyACM0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_failure_does_not_stop_poller() {
        let bus = Arc::new(MockBus::new().with_pmsa003i(&pmsa003i_frame([1; 12])));
        let h = harness(SensorKind::Pmsa003i, bus, PollingConfig::default());
        h.publisher.set_failing(true);

        let task = tokio::spawn(h.poller.run());
        tokio::time::sleep(Duration::from_secs(30)).await;
        h.publisher.set_failing(false);

        h.publisher.wait_for(1).await;
        h.cancel.cancel();
        assert_eq!(task.await.unwrap(), PollerExit::Cancelled);
    }
}
