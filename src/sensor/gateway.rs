/// Weather station access: start-up policy and per-cycle reads
use log::{debug, error, info, warn};
use std::str::FromStr;
use time::OffsetDateTime;
use tokio::time::{sleep, Duration};

use crate::error::{ConfigError, SensorError};
use crate::models::{MetricUnits, SensorReading};
use crate::sensor::{
    WeatherSensor, METRIC_HUMIDITY, METRIC_PRESSURE, METRIC_TEMPERATURE, METRIC_WIND_DIRECTION,
    METRIC_WIND_SPEED,
};
use crate::utils::format_datetime;

const INIT_RETRY_DELAY_SECS: u64 = 1;

/// What to do when the sensor does not come up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorInitPolicy {
    /// Keep trying every second until the sensor answers
    RetryForever,
    /// One attempt, the caller idles or suspends on failure
    FailFast,
}

impl FromStr for SensorInitPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retry" => Ok(SensorInitPolicy::RetryForever),
            "fail-fast" => Ok(SensorInitPolicy::FailFast),
            other => Err(ConfigError::UnknownValue {
                name: "SENSOR_INIT_POLICY",
                value: other.to_string(),
            }),
        }
    }
}

pub struct SensorGateway<S> {
    sensor: S,
    policy: SensorInitPolicy,
}

impl<S: WeatherSensor> SensorGateway<S> {
    pub fn new(sensor: S, policy: SensorInitPolicy) -> Self {
        SensorGateway { sensor, policy }
    }

    /// Bring the sensor up according to the configured policy
    ///
    /// Under `RetryForever` this only returns once the sensor reports ready.
    pub async fn initialize(&mut self) -> Result<(), SensorError> {
        loop {
            let status = self.sensor.initialize();
            if status == 0 {
                info!("Sensor initialized");
                return Ok(());
            }

            match self.policy {
                SensorInitPolicy::FailFast => {
                    error!("Sensor init error (status {})", status);
                    return Err(SensorError::Init { status });
                }
                SensorInitPolicy::RetryForever => {
                    warn!(
                        "Sensor init error (status {}), retrying in {}s",
                        status, INIT_RETRY_DELAY_SECS
                    );
                    sleep(Duration::from_secs(INIT_RETRY_DELAY_SECS)).await;
                }
            }
        }
    }

    /// Set the sensor clock
    pub fn sync_clock(&mut self, now: OffsetDateTime) {
        self.sensor.set_time(
            now.year() as u16,
            u8::from(now.month()),
            now.day(),
            now.hour(),
            now.minute(),
            now.second(),
        );
        info!("Sensor clock set to {}", format_datetime(&now));
    }

    /// Take a single reading. No retries; validity is left to the caller.
    pub fn read(&mut self) -> SensorReading {
        self.sensor.sample();
        let timestamp = match self.sensor.get_timestamp().trim() {
            "" => format_datetime(&OffsetDateTime::now_utc()),
            ts => ts.to_string(),
        };

        let reading = SensorReading {
            timestamp,
            temperature: self.value(METRIC_TEMPERATURE),
            humidity: self.value(METRIC_HUMIDITY),
            pressure: self.value(METRIC_PRESSURE),
            wind_speed: self.value(METRIC_WIND_SPEED),
            wind_direction: self.sensor.get_value(METRIC_WIND_DIRECTION).trim().to_string(),
            units: MetricUnits {
                temperature: self.sensor.get_unit(METRIC_TEMPERATURE),
                humidity: self.sensor.get_unit(METRIC_HUMIDITY),
                pressure: self.sensor.get_unit(METRIC_PRESSURE),
                wind_speed: self.sensor.get_unit(METRIC_WIND_SPEED),
            },
        };

        debug!("Sensor reading: {:?}", reading);
        reading
    }

    #[cfg(test)]
    pub(crate) fn sensor(&self) -> &S {
        &self.sensor
    }

    fn value(&mut self, metric: &str) -> f32 {
        parse_metric(&self.sensor.get_value(metric))
    }
}

/// Parse the leading number of a metric value; anything unparseable is 0.0
pub fn parse_metric(text: &str) -> f32 {
    let text = text.trim();
    let end = text
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || (i == 0 && (c == '-' || c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    text[..end].parse().unwrap_or(0.0)
}
