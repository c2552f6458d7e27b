//! Hardware seams.
//!
//! The control logic only ever talks to these traits. `host` wires them to a
//! Raspberry Pi class board (GPIO relays, NetworkManager, a TLS broker
//! session, a 1-Wire sensor and a local socket standing in for the
//! short-range radio); `sim` provides shared-handle fakes for tests and
//! `--simulate` runs.

use std::time::Duration;

use pool_common::Attribute;

use crate::{
    credentials::Credentials,
    error::{ChannelError, LinkError, RadioError, SensorFault, StoreError},
};

pub mod gpio;
pub mod host;
pub mod mqtt;
pub mod nmcli;
pub mod onewire;
pub mod sim;
pub mod socket;
pub mod storage;

/// Monotonic time since boot plus a blocking delay.
pub trait Clock {
    fn now(&self) -> Duration;
    fn sleep(&self, duration: Duration);
}

/// One output driving a relay. `true` energizes the coil; any active-low
/// wiring is the implementation's business.
pub trait Relay {
    fn set(&mut self, energized: bool);
}

pub trait TemperatureSensor {
    fn read_celsius(&mut self) -> Result<f32, SensorFault>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScannedNetwork {
    pub ssid: String,
    pub rssi: i32,
    pub open: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkInfo {
    pub ssid: String,
    pub ip: String,
    pub rssi: i32,
}

/// Station-mode wireless link.
pub trait LinkDriver {
    /// Start joining. Association is observed through `is_associated`.
    fn begin(&mut self, credentials: &Credentials) -> Result<(), LinkError>;
    fn is_associated(&mut self) -> bool;
    /// Leave the network. `erase` also forgets the driver's own copy of
    /// the credentials.
    fn disconnect(&mut self, erase: bool);
    fn scan(&mut self) -> Vec<ScannedNetwork>;
    fn info(&mut self) -> Option<LinkInfo>;
}

/// Persistent storage for exactly one credential record.
pub trait CredentialStore {
    fn load(&mut self) -> Result<Option<Credentials>, StoreError>;
    fn save(&mut self, credentials: &Credentials) -> Result<(), StoreError>;
    fn clear(&mut self) -> Result<(), StoreError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectOptions {
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub last_will: LastWill,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Authenticated, encrypted publish/subscribe session with the broker.
pub trait ChannelTransport {
    /// One connection attempt, blocking until acknowledged or refused.
    fn connect(&mut self, options: &ConnectOptions) -> Result<(), ChannelError>;
    fn is_connected(&self) -> bool;
    fn subscribe(&mut self, topic: &str) -> Result<(), ChannelError>;
    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), ChannelError>;
    /// Service the session and hand back whatever arrived since the last
    /// call.
    fn poll(&mut self) -> Vec<InboundMessage>;
    fn disconnect(&mut self);
}

/// Events raised by the provisioning radio.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RadioEvent {
    ClientConnected,
    ClientDisconnected,
    Write { attribute: Attribute, value: Vec<u8> },
    Read { attribute: Attribute },
}

/// Short-range provisioning service. The radio owns the attribute table;
/// reads are answered from it without involving the caller.
pub trait ProvisioningRadio {
    fn start(&mut self, name: &str) -> Result<(), RadioError>;
    fn stop(&mut self);
    fn restart_advertising(&mut self);
    fn poll_event(&mut self) -> Option<RadioEvent>;
    fn update(&mut self, attribute: Attribute, value: &[u8], notify: bool);
}

/// Fallback access-point portal, used only when the radio cannot start.
pub trait CaptivePortal {
    /// Block until an operator submits credentials or `timeout` passes.
    fn run(&mut self, ap_name: &str, timeout: Duration) -> Option<Credentials>;
}

/// Everything the controller needs from the board.
pub struct Platform {
    pub clock: Box<dyn Clock>,
    pub link: Box<dyn LinkDriver>,
    pub store: Box<dyn CredentialStore>,
    pub channel: Box<dyn ChannelTransport>,
    pub radio: Box<dyn ProvisioningRadio>,
    pub portal: Box<dyn CaptivePortal>,
    pub pump: Box<dyn Relay>,
    pub valve: Box<dyn Relay>,
    pub sensor: Box<dyn TemperatureSensor>,
}

impl<T: Relay + ?Sized> Relay for Box<T> {
    fn set(&mut self, energized: bool) {
        (**self).set(energized)
    }
}

impl<T: LinkDriver + ?Sized> LinkDriver for Box<T> {
    fn begin(&mut self, credentials: &Credentials) -> Result<(), LinkError> {
        (**self).begin(credentials)
    }

    fn is_associated(&mut self) -> bool {
        (**self).is_associated()
    }

    fn disconnect(&mut self, erase: bool) {
        (**self).disconnect(erase)
    }

    fn scan(&mut self) -> Vec<ScannedNetwork> {
        (**self).scan()
    }

    fn info(&mut self) -> Option<LinkInfo> {
        (**self).info()
    }
}

impl<T: ChannelTransport + ?Sized> ChannelTransport for Box<T> {
    fn connect(&mut self, options: &ConnectOptions) -> Result<(), ChannelError> {
        (**self).connect(options)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), ChannelError> {
        (**self).subscribe(topic)
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), ChannelError> {
        (**self).publish(topic, payload, retain)
    }

    fn poll(&mut self) -> Vec<InboundMessage> {
        (**self).poll()
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }
}

impl<T: ProvisioningRadio + ?Sized> ProvisioningRadio for Box<T> {
    fn start(&mut self, name: &str) -> Result<(), RadioError> {
        (**self).start(name)
    }

    fn stop(&mut self) {
        (**self).stop()
    }

    fn restart_advertising(&mut self) {
        (**self).restart_advertising()
    }

    fn poll_event(&mut self) -> Option<RadioEvent> {
        (**self).poll_event()
    }

    fn update(&mut self, attribute: Attribute, value: &[u8], notify: bool) {
        (**self).update(attribute, value, notify)
    }
}

impl<T: CaptivePortal + ?Sized> CaptivePortal for Box<T> {
    fn run(&mut self, ap_name: &str, timeout: Duration) -> Option<Credentials> {
        (**self).run(ap_name, timeout)
    }
}
