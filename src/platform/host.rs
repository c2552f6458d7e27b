use std::{
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Error};
use log::warn;

use super::{
    gpio::GpioRelay, mqtt::MqttTransport, nmcli::NmcliLink, onewire::OneWireSensor,
    socket::SocketRadio, storage::FileCredentialStore, CaptivePortal, Clock, Platform,
};
use crate::{config::Config, credentials::Credentials};

pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.started.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Boards without an access point stack. Waits out the portal window and
/// gives up.
pub struct HeadlessPortal;

impl CaptivePortal for HeadlessPortal {
    fn run(&mut self, ap_name: &str, timeout: Duration) -> Option<Credentials> {
        warn!(
            "provisioning: no access point support, portal {:?} unavailable for {}s",
            ap_name,
            timeout.as_secs()
        );
        thread::sleep(timeout);
        None
    }
}

/// Wire the traits to real hardware as described by the config.
pub fn platform(config: &Config) -> Result<Platform, Error> {
    let pump = GpioRelay::init("pump", config.equipment.pump_pin, config.equipment.active_low)
        .context("pump relay")?;
    let valve = GpioRelay::init("valve", config.equipment.valve_pin, config.equipment.active_low)
        .context("valve relay")?;

    let channel = MqttTransport::new(
        &config.broker.host,
        config.broker.port,
        config.broker.ca_cert.as_deref(),
        Duration::from_millis(config.broker.ack_timeout_ms),
    )?;

    Ok(Platform {
        clock: Box::new(SystemClock::new()),
        link: Box::new(NmcliLink::new(
            &config.link.interface,
            Duration::from_millis(config.link.connect_timeout_ms),
        )),
        store: Box::new(FileCredentialStore::new(
            &config.storage.dir,
            &config.storage.namespace,
        )),
        channel: Box::new(channel),
        radio: Box::new(SocketRadio::new(&config.provisioning.socket_path)),
        portal: Box::new(HeadlessPortal),
        pump: Box::new(pump),
        valve: Box::new(valve),
        sensor: Box::new(OneWireSensor::new(config.telemetry.sensor_path.clone())),
    })
}
