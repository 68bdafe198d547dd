//! Task supervisor
//!
//! Owns the polling tasks, keyed by device id. Applying a configuration for
//! a device cancels that device's poller and waits for it to finish before
//! the replacement is started, so a device never has two live pollers.

use std::collections::HashMap;
use std::sync::Arc;

use piphi_core::{AppliedConfig, EngineError, EngineResult};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::activator::SensorActivator;
use crate::config::PollingConfig;
use crate::poller::{PollerContext, PollerExit, TelemetryPoller};
use crate::publish::TelemetryPublisher;
use crate::signer;

/// A running poller
struct PollingTask {
    bus_path: String,
    cancel: CancellationToken,
    handle: JoinHandle<PollerExit>,
}

impl PollingTask {
    async fn stop(self, device_id: &str) {
        self.cancel.cancel();
        match self.handle.await {
            Ok(exit) => debug!(device_id = %device_id, bus_path = %self.bus_path, ?exit, "Poller stopped"),
            Err(e) => warn!(device_id = %device_id, error = %e, "Poller task did not finish cleanly"),
        }
    }
}

/// Starts, replaces and stops pollers
pub struct TaskSupervisor {
    activator: Arc<SensorActivator>,
    publisher: Arc<dyn TelemetryPublisher>,
    topic: String,
    polling: PollingConfig,
    tasks: Mutex<HashMap<String, PollingTask>>,
}

impl TaskSupervisor {
    pub fn new(
        activator: SensorActivator,
        publisher: Arc<dyn TelemetryPublisher>,
        topic: impl Into<String>,
        polling: PollingConfig,
    ) -> Self {
        Self {
            activator: Arc::new(activator),
            publisher,
            topic: topic.into(),
            polling,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Start polling for `config`, replacing the device's current poller
    ///
    /// On failure no poller is left running for the device.
    pub async fn apply(&self, config: &AppliedConfig) -> EngineResult<()> {
        config.validate()?;

        let mut tasks = self.tasks.lock().await;
        if let Some(previous) = tasks.remove(config.id()) {
            info!(device_id = %config.id(), "Replacing running poller");
            previous.stop(config.id()).await;
        }

        let signature = signer::sign_config(config)?;
        // driver construction talks to the bus
        let activator = self.activator.clone();
        let bus_path = config.bus_path().to_string();
        let sensor = tokio::task::spawn_blocking(move || activator.activate(&bus_path))
            .await
            .map_err(|e| EngineError::Internal(format!("activation task failed: {e}")))??;

        let cancel = CancellationToken::new();
        let ctx = PollerContext {
            device_id: config.id().to_string(),
            container_id: config.container_id().map(str::to_string),
            signature,
            topic: self.topic.clone(),
            polling: self.polling.clone(),
            publisher: self.publisher.clone(),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(TelemetryPoller::new(sensor, ctx).run());

        tasks.insert(
            config.id().to_string(),
            PollingTask {
                bus_path: config.bus_path().to_string(),
                cancel,
                handle,
            },
        );
        info!(device_id = %config.id(), bus_path = %config.bus_path(), "Poller scheduled");
        Ok(())
    }

    /// Whether a non-terminated poller exists for `device_id`
    pub async fn is_running(&self, device_id: &str) -> bool {
        self.tasks
            .lock()
            .await
            .get(device_id)
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Device ids with a live poller, sorted
    pub async fn running_devices(&self) -> Vec<String> {
        let tasks = self.tasks.lock().await;
        let mut ids: Vec<String> = tasks
            .iter()
            .filter(|(_, task)| !task.handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Cancel every poller and wait for all of them
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        let count = tasks.len();
        for (device_id, task) in tasks.drain() {
            task.stop(&device_id).await;
        }
        info!(count, "All pollers stopped");
    }
}

impl Drop for TaskSupervisor {
    fn drop(&mut self) {
        for (_, task) in self.tasks.get_mut().drain() {
            task.cancel.cancel();
            task.handle.abort();
        }
    }
}
