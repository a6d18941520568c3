/// Error taxonomy for the telemetry node
use thiserror::Error;

/// Configuration and settings errors
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} is {len} characters long, maximum is {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },

    #[error("{field} is not a host name or address: '{value}'")]
    InvalidHost { field: &'static str, value: String },

    #[error("{field} is not a valid number: '{value}'")]
    InvalidNumber { field: &'static str, value: String },

    #[error("{name} has unknown value '{value}'")]
    UnknownValue { name: &'static str, value: String },

    #[error("Configuration store error: {0}")]
    Store(String),
}

/// Sensor gateway errors
#[derive(Debug, Error, PartialEq)]
pub enum SensorError {
    #[error("Sensor initialization failed with status {status}")]
    Init { status: i32 },
}

/// Provisioning errors
#[derive(Debug, Error, PartialEq)]
pub enum ProvisioningError {
    #[error("No connection within {0} seconds")]
    Timeout(u64),

    #[error("Portal could not be started: {0}")]
    Portal(String),
}

/// Upload errors. These are reported, never retried.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Device id '{0}' is not an integer")]
    InvalidDeviceId(String),

    #[error("Invalid collector URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Transport failed: {0}")]
    Transport(#[from] reqwest::Error),
}
