use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{info, warn};

use super::TemperatureSensor;
use crate::error::SensorFault;

pub const W1_DEVICES: &str = "/sys/bus/w1/devices";

/// DS18B20 read through the kernel's 1-Wire sysfs interface.
pub struct OneWireSensor {
    path: Option<PathBuf>,
}

impl OneWireSensor {
    pub fn new(path: Option<PathBuf>) -> Self {
        let path = path.or_else(|| discover(Path::new(W1_DEVICES)));
        match &path {
            Some(path) => info!("sensor: reading {}", path.display()),
            None => warn!("sensor: no DS18B20 found under {}", W1_DEVICES),
        }
        Self { path }
    }
}

/// First family-28 device (DS18B20) under `devices`.
pub fn discover(devices: &Path) -> Option<PathBuf> {
    let mut found: Vec<PathBuf> = fs::read_dir(devices)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("28-"))
        .map(|entry| entry.path().join("w1_slave"))
        .collect();
    found.sort();
    found.into_iter().next()
}

impl TemperatureSensor for OneWireSensor {
    fn read_celsius(&mut self) -> Result<f32, SensorFault> {
        let path = self.path.as_ref().ok_or(SensorFault::Disconnected)?;
        let text = fs::read_to_string(path).map_err(|_| SensorFault::Disconnected)?;
        parse_w1_slave(&text)
    }
}

/// Parses the two-line `w1_slave` format:
///
/// ```text
/// 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
/// 72 01 4b 46 7f ff 0e 10 57 t=23125
/// ```
pub fn parse_w1_slave(text: &str) -> Result<f32, SensorFault> {
    let mut lines = text.lines();
    let crc_line = lines.next().ok_or(SensorFault::Disconnected)?;
    if !crc_line.trim_end().ends_with("YES") {
        return Err(SensorFault::Crc);
    }

    let data_line = lines
        .next()
        .ok_or_else(|| SensorFault::Malformed("missing data line".to_string()))?;
    let (_, raw) = data_line
        .split_once("t=")
        .ok_or_else(|| SensorFault::Malformed(data_line.to_string()))?;
    let millidegrees: i32 = raw
        .trim()
        .parse()
        .map_err(|_| SensorFault::Malformed(raw.to_string()))?;

    // Sentinel the driver uses for a sensor that dropped off the bus
    if millidegrees == -127_000 {
        return Err(SensorFault::Disconnected);
    }

    Ok(millidegrees as f32 / 1000.0)
}
