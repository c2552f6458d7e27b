use std::{path::Path, path::PathBuf, time::Duration};

use anyhow::{Context, Error};
use pi_pinout::{GpioPin, PhysicalPin, WiringPiPin};
use serde::{Deserialize, Serialize};

use crate::{link::LinkPolicy, provisioning::ProvisioningPolicy, session::ClientIdentity};

#[derive(Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub broker: BrokerConfig,
    pub link: LinkConfig,
    pub provisioning: ProvisioningConfig,
    pub equipment: EquipmentConfig,
    pub timer: TimerConfig,
    pub telemetry: TelemetryConfig,
    pub storage: StorageConfig,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    /// Also the broker client id and the topic namespace
    pub id: String,
    /// Advertised name is `<prefix>-XXXX`
    pub name_prefix: String,
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// PEM root certificate. Plain TCP when absent.
    pub ca_cert: Option<PathBuf>,
    pub keep_alive_secs: u64,
    pub ack_timeout_ms: u64,
    pub retry_interval_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LinkConfig {
    pub interface: String,
    pub connect_timeout_ms: u64,
    pub retry_backoff_ms: u64,
    pub boot_attempts: u32,
    pub recheck_interval_ms: u64,
    pub loss_grace_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ProvisioningConfig {
    pub check_interval_ms: u64,
    pub scan_budget: usize,
    pub socket_path: String,
    /// Defaults to `<device id>-setup`
    pub portal_name: Option<String>,
    pub portal_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EquipmentConfig {
    pub pump_pin: Pin,
    pub valve_pin: Pin,
    /// Relay boards that switch on a low input
    pub active_low: bool,
    pub settle_delay_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimerConfig {
    pub publish_interval_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TelemetryConfig {
    pub wifi_interval_ms: u64,
    pub temperature_interval_ms: u64,
    /// `w1_slave` file of the sensor. First DS18B20 found when absent.
    pub sensor_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub dir: PathBuf,
    pub namespace: String,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub enum Pin {
    Physical(PhysicalPin),
    Gpio(GpioPin),
    WiringPi(WiringPiPin),
}

impl Pin {
    pub fn gpio(self) -> GpioPin {
        match self {
            Pin::Physical(pin) => pin.into(),
            Pin::Gpio(pin) => pin,
            Pin::WiringPi(pin) => pin.into(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            broker: BrokerConfig::default(),
            link: LinkConfig::default(),
            provisioning: ProvisioningConfig::default(),
            equipment: EquipmentConfig::default(),
            timer: TimerConfig::default(),
            telemetry: TelemetryConfig::default(),
            storage: StorageConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: "pool-01".to_string(),
            name_prefix: "Smart Pool".to_string(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8883,
            username: None,
            password: None,
            ca_cert: None,
            keep_alive_secs: 30,
            ack_timeout_ms: 10_000,
            retry_interval_ms: 5_000,
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            interface: "wlan0".to_string(),
            connect_timeout_ms: 15_000,
            retry_backoff_ms: 5_000,
            boot_attempts: 3,
            recheck_interval_ms: 10_000,
            loss_grace_ms: 3_000,
        }
    }
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 1_000,
            scan_budget: 400,
            socket_path: "/tmp/pool-provisioning.sock".to_string(),
            portal_name: None,
            portal_timeout_secs: 180,
        }
    }
}

impl Default for EquipmentConfig {
    fn default() -> Self {
        Self {
            pump_pin: Pin::Gpio(GpioPin(26)),
            valve_pin: Pin::Gpio(GpioPin(25)),
            active_low: false,
            settle_delay_ms: 500,
        }
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            publish_interval_ms: 10_000,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            wifi_interval_ms: 30_000,
            temperature_interval_ms: 60_000,
            sensor_path: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/var/lib/pool-controller"),
            namespace: "wifi".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Config, Error> {
        let path = path.as_ref();
        let config = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_ron(&config).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_ron(config: &str) -> Result<Config, Error> {
        let config: Config = ron::from_str(config)?;
        Ok(config)
    }

    /// `<prefix>-XXXX`, the suffix derived from the device id so that two
    /// controllers in range can be told apart.
    pub fn advertised_name(&self) -> String {
        // FNV-1a
        let hash = self
            .device
            .id
            .bytes()
            .fold(0x811c_9dc5_u32, |hash, byte| {
                (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193)
            });
        format!("{}-{:04X}", self.device.name_prefix, hash & 0xffff)
    }

    pub fn portal_name(&self) -> String {
        self.provisioning
            .portal_name
            .clone()
            .unwrap_or_else(|| format!("{}-setup", self.device.id))
    }

    pub fn provisioning_policy(&self) -> ProvisioningPolicy {
        ProvisioningPolicy {
            device_name: self.advertised_name(),
            check_interval: Duration::from_millis(self.provisioning.check_interval_ms),
            scan_budget: self.provisioning.scan_budget,
            portal_name: self.portal_name(),
            portal_timeout: Duration::from_secs(self.provisioning.portal_timeout_secs),
        }
    }

    pub fn client_identity(&self) -> ClientIdentity {
        ClientIdentity {
            client_id: self.device.id.clone(),
            username: self.broker.username.clone(),
            password: self.broker.password.clone(),
            keep_alive: Duration::from_secs(self.broker.keep_alive_secs),
        }
    }
}

impl LinkConfig {
    pub fn policy(&self) -> LinkPolicy {
        LinkPolicy {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            boot_attempts: self.boot_attempts,
            recheck_interval: Duration::from_millis(self.recheck_interval_ms),
            loss_grace: Duration::from_millis(self.loss_grace_ms),
            ..LinkPolicy::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ron");
        std::fs::write(
            &path,
            r#"(
    device: (id: "backyard"),
    broker: (host: "broker.example.net", username: Some("pool")),
    equipment: (
        pump_pin: Physical(PhysicalPin(37)),
        valve_pin: Gpio(GpioPin(5)),
        active_low: true,
    ),
    log_level: "debug",
)"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.device.id, "backyard");
        assert_eq!(config.device.name_prefix, "Smart Pool");
        assert_eq!(config.broker.host, "broker.example.net");
        assert_eq!(config.broker.port, 8883);
        assert_eq!(config.broker.username.as_deref(), Some("pool"));
        assert_eq!(
            config.equipment.pump_pin,
            Pin::Physical(pi_pinout::PhysicalPin(37))
        );
        assert_eq!(config.equipment.valve_pin.gpio(), pi_pinout::GpioPin(5));
        assert!(config.equipment.active_low);
        assert_eq!(config.equipment.settle_delay_ms, 500);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn empty_file_gives_firmware_defaults() {
        let config = Config::from_ron("()").unwrap();
        assert_eq!(config, Config::default());

        let policy = config.link.policy();
        assert_eq!(policy.connect_timeout, Duration::from_secs(15));
        assert_eq!(policy.retry_backoff, Duration::from_secs(5));
        assert_eq!(policy.boot_attempts, 3);
        assert_eq!(policy.recheck_interval, Duration::from_secs(10));

        let provisioning = config.provisioning_policy();
        assert_eq!(provisioning.check_interval, Duration::from_secs(1));
        assert_eq!(provisioning.scan_budget, 400);
        assert_eq!(provisioning.portal_name, "pool-01-setup");
    }

    #[test]
    fn advertised_name_is_stable_per_device() {
        let mut config = Config::default();
        let first = config.advertised_name();
        assert!(first.starts_with("Smart Pool-"));
        assert_eq!(first.len(), "Smart Pool-".len() + 4);
        assert_eq!(first, config.advertised_name());

        config.device.id = "pool-02".to_string();
        assert_ne!(first, config.advertised_name());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Config::load("/nonexistent/pool.ron").is_err());
    }
}
