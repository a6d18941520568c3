use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::time::Duration;

use crate::error::ConfigError;
use crate::network::provisioning::ProvisioningFailurePolicy;
use crate::power::PowerMode;
use crate::sensor::SensorInitPolicy;

pub const MAX_ADDRESS_LEN: usize = 15;
pub const MAX_PORT_LEN: usize = 5;
pub const MAX_DEVICE_ID_LEN: usize = 3;

const DEFAULT_COLLECTOR_ADDRESS: &str = "192.168.1.20";
const DEFAULT_COLLECTOR_PORT: &str = "5001";
const DEFAULT_DEVICE_ID: &str = "1";

/// Collector endpoint and device identity.
///
/// Every field is bounded; the setters refuse values over the limit instead
/// of storing them, so a `DeviceConfiguration` can never hold an oversized field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfiguration {
    collector_address: String,
    collector_port: String,
    device_id: String,
}

impl Default for DeviceConfiguration {
    fn default() -> Self {
        DeviceConfiguration {
            collector_address: DEFAULT_COLLECTOR_ADDRESS.to_string(),
            collector_port: DEFAULT_COLLECTOR_PORT.to_string(),
            device_id: DEFAULT_DEVICE_ID.to_string(),
        }
    }
}

impl DeviceConfiguration {
    pub fn new(address: &str, port: &str, device_id: &str) -> Result<Self, ConfigError> {
        let mut config = DeviceConfiguration::default();
        config.set_collector_address(address)?;
        config.set_collector_port(port)?;
        config.set_device_id(device_id)?;
        Ok(config)
    }

    pub fn collector_address(&self) -> &str {
        &self.collector_address
    }

    pub fn collector_port(&self) -> &str {
        &self.collector_port
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn set_collector_address(&mut self, value: &str) -> Result<(), ConfigError> {
        let address = bounded("collector address", value, MAX_ADDRESS_LEN)?;
        check_host("collector address", &address)?;
        self.collector_address = address;
        Ok(())
    }

    pub fn set_collector_port(&mut self, value: &str) -> Result<(), ConfigError> {
        self.collector_port = bounded("collector port", value, MAX_PORT_LEN)?;
        Ok(())
    }

    pub fn set_device_id(&mut self, value: &str) -> Result<(), ConfigError> {
        self.device_id = bounded("device id", value, MAX_DEVICE_ID_LEN)?;
        Ok(())
    }

    /// Re-validate fields that did not come through the setters (e.g. deserialized)
    pub fn validated(self) -> Result<Self, ConfigError> {
        DeviceConfiguration::new(
            &self.collector_address,
            &self.collector_port,
            &self.device_id,
        )
    }
}

fn bounded(field: &'static str, value: &str, max: usize) -> Result<String, ConfigError> {
    let value = value.trim();
    let len = value.chars().count();
    if len == 0 {
        return Err(ConfigError::EmptyField { field });
    }
    if len > max {
        return Err(ConfigError::FieldTooLong { field, len, max });
    }
    Ok(value.to_string())
}

/// Reject text that would change the meaning of `http://{host}:{port}/`
pub fn check_host(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || "/:?#@[]\\".contains(c))
    {
        return Err(ConfigError::InvalidHost {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Cut `value` down to at most `max` characters
pub fn truncate_chars(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

/// Runtime settings of the node, loaded from the environment
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub device: DeviceConfiguration,
    pub power_mode: PowerMode,
    pub poll_interval: Duration,
    pub portal_timeout: Duration,
    pub connect_grace: Duration,
    pub failure_policy: ProvisioningFailurePolicy,
    pub sensor_init_policy: SensorInitPolicy,
    pub ap_name: String,
    pub portal_bind: SocketAddr,
    pub upload_timeout: Duration,
    pub sensor_path: PathBuf,
    pub sensor_sync_time: bool,
    pub config_store_path: Option<PathBuf>,
}

impl NodeSettings {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        // Load environment variables
        dotenv::dotenv().ok();

        Ok(Self::from_lookup(|key| env::var(key).ok())?)
    }

    /// Build settings from any key lookup, falling back to defaults for missing keys
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let device = DeviceConfiguration::new(
            &text("COLLECTOR_ADDRESS", DEFAULT_COLLECTOR_ADDRESS),
            &text("COLLECTOR_PORT", DEFAULT_COLLECTOR_PORT),
            &text("DEVICE_ID", DEFAULT_DEVICE_ID),
        )?;

        let cycle_interval = seconds(&lookup, "CYCLE_INTERVAL_SECS", 300)?;
        let free_run_delay = seconds(&lookup, "FREE_RUN_DELAY_SECS", 1)?;
        let power_mode = match text("POWER_MODE", "timer-gated").as_str() {
            "free-run" => PowerMode::FreeRun {
                delay: free_run_delay,
            },
            "timer-gated" => PowerMode::TimerGated {
                interval: cycle_interval,
            },
            "hardware-suspend" => PowerMode::HardwareSuspend {
                duration: cycle_interval,
            },
            other => {
                return Err(ConfigError::UnknownValue {
                    name: "POWER_MODE",
                    value: other.to_string(),
                })
            }
        };

        let portal_bind = text("PORTAL_BIND", "0.0.0.0:8080");
        let portal_bind =
            SocketAddr::from_str(&portal_bind).map_err(|_| ConfigError::UnknownValue {
                name: "PORTAL_BIND",
                value: portal_bind.clone(),
            })?;

        let sensor_sync_time = match text("SENSOR_SYNC_TIME", "false").as_str() {
            "true" | "1" => true,
            "false" | "0" => false,
            other => {
                return Err(ConfigError::UnknownValue {
                    name: "SENSOR_SYNC_TIME",
                    value: other.to_string(),
                })
            }
        };

        Ok(NodeSettings {
            device,
            power_mode,
            poll_interval: seconds(&lookup, "POLL_INTERVAL_SECS", 1)?,
            portal_timeout: seconds(&lookup, "PORTAL_TIMEOUT_SECS", 180)?,
            connect_grace: seconds(&lookup, "CONNECT_GRACE_SECS", 10)?,
            failure_policy: text("PROVISIONING_FAILURE_POLICY", "restart").parse()?,
            sensor_init_policy: text("SENSOR_INIT_POLICY", "retry").parse()?,
            ap_name: text("PORTAL_AP_NAME", "LarkWeatherStationAP"),
            portal_bind,
            upload_timeout: seconds(&lookup, "UPLOAD_TIMEOUT_SECS", 10)?,
            sensor_path: PathBuf::from(text("SENSOR_PATH", "/run/lark/sensor.txt")),
            sensor_sync_time,
            config_store_path: lookup("CONFIG_STORE_PATH")
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
        })
    }
}

fn seconds<F>(lookup: &F, key: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidNumber { field: key, value }),
        None => Ok(Duration::from_secs(default)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<NodeSettings, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        NodeSettings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_match_compiled_in_values() {
        let config = DeviceConfiguration::default();
        assert_eq!(config.collector_address(), "192.168.1.20");
        assert_eq!(config.collector_port(), "5001");
        assert_eq!(config.device_id(), "1");
    }

    #[test]
    fn setter_rejects_oversized_address_and_keeps_previous_value() {
        let mut config = DeviceConfiguration::default();
        let long = "1".repeat(30);

        let err = config.set_collector_address(&long).unwrap_err();
        assert_eq!(
            err,
            ConfigError::FieldTooLong {
                field: "collector address",
                len: 30,
                max: MAX_ADDRESS_LEN
            }
        );
        assert_eq!(config.collector_address(), "192.168.1.20");
    }

    #[test]
    fn setters_accept_values_at_the_limit() {
        let mut config = DeviceConfiguration::default();
        config.set_collector_address("255.255.255.255").unwrap();
        config.set_collector_port("65535").unwrap();
        config.set_device_id("999").unwrap();
        assert_eq!(config.collector_address().len(), MAX_ADDRESS_LEN);
        assert_eq!(config.collector_port().len(), MAX_PORT_LEN);
        assert_eq!(config.device_id().len(), MAX_DEVICE_ID_LEN);
    }

    #[test]
    fn setter_rejects_address_that_would_move_the_port() {
        let mut config = DeviceConfiguration::default();
        for bad in ["10.0.0.5/x", "10.0.0.5:80", "a?b", "a#b", "a b", "user@host"] {
            assert!(
                matches!(
                    config.set_collector_address(bad),
                    Err(ConfigError::InvalidHost { field: "collector address", .. })
                ),
                "{} accepted",
                bad
            );
        }
        assert_eq!(config.collector_address(), "192.168.1.20");

        config.set_collector_address("collector-1.lan").unwrap();
        assert_eq!(config.collector_address(), "collector-1.lan");
    }

    #[test]
    fn setter_rejects_empty_values() {
        let mut config = DeviceConfiguration::default();
        assert_eq!(
            config.set_device_id("  "),
            Err(ConfigError::EmptyField { field: "device id" })
        );
    }

    #[test]
    fn truncate_counts_characters_not_bytes() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("ab", 3), "ab");
        assert_eq!(truncate_chars("ééééé", 2), "éé");
    }

    #[test]
    fn settings_fall_back_to_defaults() {
        let settings = settings(&[]).unwrap();
        assert_eq!(settings.device, DeviceConfiguration::default());
        assert_eq!(
            settings.power_mode,
            PowerMode::TimerGated {
                interval: Duration::from_secs(300)
            }
        );
        assert_eq!(settings.portal_timeout, Duration::from_secs(180));
        assert_eq!(
            settings.failure_policy,
            ProvisioningFailurePolicy::RestartProcess
        );
        assert_eq!(settings.sensor_init_policy, SensorInitPolicy::RetryForever);
        assert_eq!(settings.ap_name, "LarkWeatherStationAP");
        assert!(settings.config_store_path.is_none());
    }

    #[test]
    fn settings_read_overrides() {
        let settings = settings(&[
            ("POWER_MODE", "hardware-suspend"),
            ("CYCLE_INTERVAL_SECS", "60"),
            ("PORTAL_TIMEOUT_SECS", "120"),
            ("PROVISIONING_FAILURE_POLICY", "degrade"),
            ("SENSOR_INIT_POLICY", "fail-fast"),
            ("PORTAL_AP_NAME", "AutoConnectAP"),
            ("DEVICE_ID", "7"),
            ("CONFIG_STORE_PATH", "/var/lib/lark/device.json"),
        ])
        .unwrap();

        assert_eq!(
            settings.power_mode,
            PowerMode::HardwareSuspend {
                duration: Duration::from_secs(60)
            }
        );
        assert_eq!(settings.portal_timeout, Duration::from_secs(120));
        assert_eq!(
            settings.failure_policy,
            ProvisioningFailurePolicy::ProceedDegraded
        );
        assert_eq!(settings.sensor_init_policy, SensorInitPolicy::FailFast);
        assert_eq!(settings.ap_name, "AutoConnectAP");
        assert_eq!(settings.device.device_id(), "7");
        assert_eq!(
            settings.config_store_path,
            Some(PathBuf::from("/var/lib/lark/device.json"))
        );
    }

    #[test]
    fn settings_reject_bad_values() {
        assert!(matches!(
            settings(&[("POWER_MODE", "turbo")]),
            Err(ConfigError::UnknownValue { name: "POWER_MODE", .. })
        ));
        assert!(matches!(
            settings(&[("PORTAL_TIMEOUT_SECS", "soon")]),
            Err(ConfigError::InvalidNumber { field: "PORTAL_TIMEOUT_SECS", .. })
        ));
        assert!(matches!(
            settings(&[("COLLECTOR_PORT", "123456")]),
            Err(ConfigError::FieldTooLong { .. })
        ));
    }
}
