pub mod file;
pub mod gateway;

pub use file::FileSensor;
pub use gateway::{SensorGateway, SensorInitPolicy};

// Metric names understood by the weather station
pub const METRIC_TEMPERATURE: &str = "Temp";
pub const METRIC_HUMIDITY: &str = "Humi";
pub const METRIC_PRESSURE: &str = "Pressure";
pub const METRIC_WIND_SPEED: &str = "Speed";
pub const METRIC_WIND_DIRECTION: &str = "Dir";

/// Named-metric query interface of the weather station
///
/// Values and units come back as text, exactly as the instrument reports them.
pub trait WeatherSensor {
    /// Returns 0 when the sensor is ready, any other value is a driver status code
    fn initialize(&mut self) -> i32;

    /// Take a measurement. Queries up to the next call answer from it.
    fn sample(&mut self) {}

    fn get_value(&mut self, metric: &str) -> String;
    fn get_unit(&mut self, metric: &str) -> String;
    fn get_timestamp(&mut self) -> String;
    fn set_time(&mut self, year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8);
}
