use serde::{Deserialize, Serialize};

/// One reading of the weather station, produced once per cycle
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub timestamp: String,
    pub temperature: f32,
    pub humidity: f32,
    pub pressure: f32,
    pub wind_speed: f32,
    pub wind_direction: String,
    pub units: MetricUnits,
}

/// Units reported by the sensor, only used for logging
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricUnits {
    pub temperature: String,
    pub humidity: String,
    pub pressure: String,
    pub wind_speed: String,
}

impl SensorReading {
    /// All-zero temperature, humidity and pressure is what a faulted sensor reports
    pub fn is_valid(&self) -> bool {
        !(self.temperature == 0.0 && self.humidity == 0.0 && self.pressure == 0.0)
    }
}

/// JSON body posted to the collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPayload {
    pub device_id: i32,
    pub temperature: f32,
    pub humidity: f32,
    pub pressure: f32,
    pub wind_speed: f32,
    pub wind_direction: String,
}

impl TelemetryPayload {
    pub fn new(device_id: i32, reading: &SensorReading) -> Self {
        TelemetryPayload {
            device_id,
            temperature: reading.temperature,
            humidity: reading.humidity,
            pressure: reading.pressure,
            wind_speed: reading.wind_speed,
            wind_direction: reading.wind_direction.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Disconnected,
    Provisioning,
    Connected,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    TimerWake,
    FreshBoot,
    Other,
}

/// Result of a single upload attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The transport returned a response, carrying its status code
    Delivered(u16),
    NetworkFailure,
}
