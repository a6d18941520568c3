/// Weather station backed by a text dump, e.g. written by a serial bridge
///
/// Each line is `Metric=value` or `Metric=value unit`:
///
/// ```text
/// Time=2023-03-01 17:20:00
/// Temp=21.5 C
/// Dir=NE
/// ```
use log::{debug, warn};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use crate::sensor::WeatherSensor;

const TIMESTAMP_KEY: &str = "Time";

pub struct FileSensor {
    path: PathBuf,
    /// Last sample as metric -> (value, unit)
    latest: HashMap<String, (String, String)>,
}

impl FileSensor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSensor {
            path: path.into(),
            latest: HashMap::new(),
        }
    }

    fn field(&self, metric: &str) -> Option<&(String, String)> {
        self.latest.get(metric)
    }
}

fn parse_dump(contents: &str) -> HashMap<String, (String, String)> {
    let mut metrics = HashMap::new();
    for line in contents.lines() {
        let Some((name, rest)) = line.split_once('=') else {
            continue;
        };
        let name = name.trim();
        let rest = rest.trim();
        if name.is_empty() {
            continue;
        }
        // The timestamp contains spaces, so it never carries a unit
        let (value, unit) = if name == TIMESTAMP_KEY {
            (rest, "")
        } else {
            rest.split_once(char::is_whitespace)
                .map(|(v, u)| (v, u.trim()))
                .unwrap_or((rest, ""))
        };
        metrics.insert(name.to_string(), (value.to_string(), unit.to_string()));
    }
    metrics
}

impl WeatherSensor for FileSensor {
    fn initialize(&mut self) -> i32 {
        match fs::metadata(&self.path) {
            Ok(meta) if meta.is_file() => 0,
            Ok(_) => 2,
            Err(_) => 1,
        }
    }

    /// Read the whole dump once
    fn sample(&mut self) {
        self.latest = match fs::read_to_string(&self.path) {
            Ok(contents) => parse_dump(&contents),
            Err(e) => {
                warn!("Failed to read sensor file {}: {}", self.path.display(), e);
                HashMap::new()
            }
        };
    }

    fn get_value(&mut self, metric: &str) -> String {
        self.field(metric)
            .map(|(value, _)| value.clone())
            .unwrap_or_default()
    }

    fn get_unit(&mut self, metric: &str) -> String {
        self.field(metric)
            .map(|(_, unit)| unit.clone())
            .unwrap_or_default()
    }

    fn get_timestamp(&mut self) -> String {
        self.get_value(TIMESTAMP_KEY)
    }

    fn set_time(&mut self, year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) {
        debug!(
            "{} has no clock to set ({:04}-{:02}-{:02} {:02}:{:02}:{:02} ignored)",
            self.path.display(),
            year,
            month,
            day,
            hour,
            minute,
            second
        );
    }
}
