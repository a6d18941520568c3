/// The node's cycle: provision, sense, upload, idle
use log::{error, info, warn};
use time::OffsetDateTime;
use tokio::time::{sleep, Instant};

use crate::config::{DeviceConfiguration, NodeSettings};
use crate::models::{DeliveryOutcome, SensorReading, WakeReason};
use crate::network::{
    ConnectOutcome, NetworkLink, ProvisioningManager, ProvisioningPortal, TelemetryUploader,
    Transport,
};
use crate::power::{IntervalGate, Platform, PowerMode};
use crate::sensor::{SensorGateway, WeatherSensor};
use crate::store::ConfigStore;
use crate::utils::format_duration;

/// Collaborators a node is booted with
pub struct NodeParts<S, L, P, T> {
    pub sensor: S,
    pub link: L,
    pub portal: P,
    pub transport: T,
}

/// How a single cycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A valid reading went out; one delivery attempt was made
    Uploaded(DeliveryOutcome),
    /// Sensor returned the all-zero fault reading
    SkippedInvalid,
    /// No network this cycle
    Degraded,
    /// Sensor did not initialize under the fail-fast policy
    SensorUnavailable,
    /// Provisioning timed out and the node must restart
    Restart,
}

pub struct Node<S, L, P, T> {
    settings: NodeSettings,
    device: DeviceConfiguration,
    store: Option<ConfigStore>,
    sensor: SensorGateway<S>,
    sensor_ready: bool,
    provisioning: ProvisioningManager<L, P>,
    provisioned: bool,
    uploader: TelemetryUploader<T>,
}

impl<S, L, P, T> Node<S, L, P, T>
where
    S: WeatherSensor,
    L: NetworkLink,
    P: ProvisioningPortal,
    T: Transport,
{
    /// Boot: nothing carries over from a previous boot except the config store
    pub async fn boot(
        settings: NodeSettings,
        parts: NodeParts<S, L, P, T>,
        wake: WakeReason,
    ) -> Self {
        match wake {
            WakeReason::FreshBoot => info!("Booting"),
            WakeReason::TimerWake => info!("Woke up from timer"),
            WakeReason::Other => info!("Woke up, cause other than timer"),
        }

        let store = settings.config_store_path.clone().map(ConfigStore::new);
        let device = match &store {
            Some(store) => {
                info!("Configuration store: {}", store.path().display());
                store.load_or(&settings.device).await
            }
            None => settings.device.clone(),
        };

        let mut sensor = SensorGateway::new(parts.sensor, settings.sensor_init_policy);
        if settings.sensor_sync_time {
            sensor.sync_clock(OffsetDateTime::now_utc());
        }

        let provisioning = ProvisioningManager::new(
            parts.link,
            parts.portal,
            settings.ap_name.clone(),
            settings.connect_grace,
        );

        let node = Node {
            device,
            store,
            sensor,
            sensor_ready: false,
            provisioning,
            provisioned: false,
            uploader: TelemetryUploader::new(parts.transport),
            settings,
        };
        info!(
            "Collector {}:{}, device id {}",
            node.device().collector_address(),
            node.device().collector_port(),
            node.device().device_id()
        );
        node
    }

    pub fn device(&self) -> &DeviceConfiguration {
        &self.device
    }

    /// Run one cycle up to, but not including, idling
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        // Free-run connects once per boot, the other modes every cycle
        let free_run = matches!(self.settings.power_mode, PowerMode::FreeRun { .. });
        if !(free_run && self.provisioned) {
            let before = self.device.clone();
            let outcome = self
                .provisioning
                .ensure_connected(
                    &mut self.device,
                    self.settings.portal_timeout,
                    self.settings.failure_policy,
                )
                .await;
            self.provisioned = true;

            match outcome {
                ConnectOutcome::Connected => {
                    if self.device != before {
                        self.persist().await;
                    }
                }
                ConnectOutcome::Failed => {
                    warn!(
                        "No network ({:?}), skipping this cycle",
                        self.provisioning.state()
                    );
                    return CycleOutcome::Degraded;
                }
                ConnectOutcome::Restart => return CycleOutcome::Restart,
            }
        }

        if !self.sensor_ready {
            if let Err(e) = self.sensor.initialize().await {
                warn!("{}, skipping this cycle", e);
                return CycleOutcome::SensorUnavailable;
            }
            self.sensor_ready = true;
        }

        let reading = self.sensor.read();
        log_reading(&reading);
        if !reading.is_valid() {
            warn!("Invalid sensor data (all zero), not sending");
            return CycleOutcome::SkippedInvalid;
        }

        CycleOutcome::Uploaded(self.uploader.send(&self.device, &reading).await)
    }

    async fn persist(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&self.device).await {
                error!("Failed to save configuration: {}", e);
            }
        }
    }

    /// Cycle and idle according to the power mode until the node has to boot again.
    /// Consumes the node: all in-memory state is gone by the time this returns.
    pub async fn run_until_reboot<Pl: Platform>(mut self, platform: &mut Pl) {
        let mode = self.settings.power_mode;
        match mode {
            PowerMode::FreeRun { delay } => loop {
                if self.run_cycle().await == CycleOutcome::Restart {
                    drop(self);
                    platform.restart().await;
                    return;
                }
                sleep(delay).await;
            },
            PowerMode::TimerGated { interval } => {
                let mut gate = IntervalGate::new(interval);
                let poll = self.settings.poll_interval;
                loop {
                    if gate.should_run(Instant::now()) {
                        if self.run_cycle().await == CycleOutcome::Restart {
                            drop(self);
                            platform.restart().await;
                            return;
                        }
                        info!(
                            "Next cycle in {}",
                            format_duration(gate.remaining(Instant::now()))
                        );
                    }
                    sleep(poll).await;
                }
            }
            PowerMode::HardwareSuspend { duration } => {
                let outcome = self.run_cycle().await;
                drop(self);
                if outcome == CycleOutcome::Restart {
                    platform.restart().await;
                } else {
                    platform.suspend(duration).await;
                }
            }
        }
    }
}

fn log_reading(reading: &SensorReading) {
    info!("Reading at {}:", reading.timestamp);
    info!(
        "  Temperature: {:.2} {}",
        reading.temperature, reading.units.temperature
    );
    info!("  Humidity: {:.2} {}", reading.humidity, reading.units.humidity);
    info!("  Pressure: {:.2} {}", reading.pressure, reading.units.pressure);
    info!(
        "  Wind: {:.2} {} from {}",
        reading.wind_speed, reading.units.wind_speed, reading.wind_direction
    );
}

/// Boot, cycle, reboot, forever. Each boot gets fresh collaborators from `build`.
pub async fn run<S, L, P, T, Pl, F>(
    settings: NodeSettings,
    platform: &mut Pl,
    mut build: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    S: WeatherSensor,
    L: NetworkLink,
    P: ProvisioningPortal,
    T: Transport,
    Pl: Platform,
    F: FnMut(&NodeSettings) -> Result<NodeParts<S, L, P, T>, Box<dyn std::error::Error>>,
{
    loop {
        let wake = platform.wake_cause();
        let parts = build(&settings)?;
        let node = Node::boot(settings.clone(), parts, wake).await;
        node.run_until_reboot(platform).await;
    }
}
