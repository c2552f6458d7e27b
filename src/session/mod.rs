//! Broker session: connect with a last will, subscribe, publish the full
//! state snapshot, and hand inbound commands to the dispatcher.

use std::{collections::BTreeSet, time::Duration};

use log::{debug, error, info, warn};
use pool_common::{TimerReport, Topics, ValveMode, WifiReport};

use crate::{
    dispatch::{Command, CommandDispatcher},
    error::ChannelError,
    platform::{ChannelTransport, ConnectOptions, InboundMessage, LastWill},
};

/// Where state changes get reported. The session manager is the real one.
pub trait StateSink {
    fn pump_state(&mut self, on: bool);
    fn valve_state(&mut self, mode: ValveMode);
    fn timer_state(&mut self, report: &TimerReport);
}

/// Everything published right after a connect.
#[derive(Clone, Debug, PartialEq)]
pub struct StateSnapshot {
    pub pump_on: bool,
    pub valve: ValveMode,
    pub wifi: WifiReport,
    pub timer: TimerReport,
    /// `None` when the sensor faulted; the publish is skipped
    pub temperature: Option<f32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientIdentity {
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
}

/// Per-connection bookkeeping. Rebuilt from scratch on every connect.
#[derive(Debug, Default)]
struct ChannelSession {
    connected: bool,
    subscriptions: BTreeSet<String>,
}

pub struct SessionManager<T> {
    transport: T,
    topics: Topics,
    identity: ClientIdentity,
    dispatcher: CommandDispatcher,
    session: ChannelSession,
}

impl<T: ChannelTransport> SessionManager<T> {
    pub fn new(transport: T, topics: Topics, identity: ClientIdentity) -> Self {
        Self {
            transport,
            dispatcher: CommandDispatcher::new(topics.clone()),
            topics,
            identity,
            session: ChannelSession::default(),
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn is_connected(&self) -> bool {
        self.session.connected && self.transport.is_connected()
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &str> {
        self.session.subscriptions.iter().map(String::as_str)
    }

    /// One connection attempt. On success every command topic is
    /// subscribed and the whole snapshot published, retained.
    pub fn connect(&mut self, snapshot: &StateSnapshot) -> Result<(), ChannelError> {
        self.session = ChannelSession::default();

        let will_payload = WifiReport::disconnected()
            .to_json()
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        let options = ConnectOptions {
            client_id: self.identity.client_id.clone(),
            username: self.identity.username.clone(),
            password: self.identity.password.clone(),
            keep_alive: self.identity.keep_alive,
            last_will: LastWill {
                topic: self.topics.wifi_state.clone(),
                payload: will_payload.into_bytes(),
                retain: true,
            },
        };

        info!("session: connecting as {}", options.client_id);
        if let Err(e) = self.transport.connect(&options) {
            error!("session: connect failed: {}", e);
            return Err(e);
        }
        self.session.connected = true;
        info!("session: connected");

        for topic in self.topics.subscriptions() {
            match self.transport.subscribe(topic) {
                Ok(()) => {
                    debug!("session: subscribed to {}", topic);
                    self.session.subscriptions.insert(topic.to_string());
                }
                Err(e) => warn!("session: subscribe to {} failed: {}", topic, e),
            }
        }

        self.publish_snapshot(snapshot);
        Ok(())
    }

    fn publish_snapshot(&mut self, snapshot: &StateSnapshot) {
        self.pump_state(snapshot.pump_on);
        self.valve_state(snapshot.valve);
        self.publish_wifi(&snapshot.wifi);
        self.timer_state(&snapshot.timer);
        if let Some(celsius) = snapshot.temperature {
            self.publish_temperature(celsius);
        }
    }

    /// Retained publish. Dropped, with a log line, while disconnected.
    pub fn publish(&mut self, topic: &str, payload: &str) -> bool {
        if !self.is_connected() {
            debug!("session: not connected, dropping publish to {}", topic);
            return false;
        }

        match self.transport.publish(topic, payload.as_bytes(), true) {
            Ok(()) => {
                debug!("session: {} <- {}", topic, payload);
                true
            }
            Err(e) => {
                warn!("session: publish to {} failed: {}", topic, e);
                false
            }
        }
    }

    pub fn publish_wifi(&mut self, report: &WifiReport) -> bool {
        match report.to_json() {
            Ok(json) => {
                let topic = self.topics.wifi_state.clone();
                self.publish(&topic, &json)
            }
            Err(e) => {
                error!("session: cannot encode wifi report: {}", e);
                false
            }
        }
    }

    pub fn publish_temperature(&mut self, celsius: f32) -> bool {
        let topic = self.topics.temperature_state.clone();
        self.publish(&topic, &format!("{:.1}", celsius))
    }

    /// Service the transport. Returns whatever arrived; an empty batch if
    /// the session just dropped.
    pub fn tick(&mut self) -> Vec<InboundMessage> {
        if self.session.connected && !self.transport.is_connected() {
            warn!("session: connection lost");
            self.session = ChannelSession::default();
            return Vec::new();
        }

        let inbound = self.transport.poll();

        if self.session.connected && !self.transport.is_connected() {
            warn!("session: connection lost");
            self.session = ChannelSession::default();
        }

        inbound
    }

    pub fn dispatch(&self, message: &InboundMessage) -> Option<Command> {
        info!(
            "session: message on {}: {}",
            message.topic,
            String::from_utf8_lossy(&message.payload)
        );
        self.dispatcher.parse(&message.topic, &message.payload)
    }

    pub fn disconnect(&mut self) {
        if self.session.connected {
            info!("session: disconnecting");
        }
        self.transport.disconnect();
        self.session = ChannelSession::default();
    }
}

impl<T: ChannelTransport> StateSink for SessionManager<T> {
    fn pump_state(&mut self, on: bool) {
        let topic = self.topics.pump_state.clone();
        self.publish(&topic, if on { "ON" } else { "OFF" });
    }

    fn valve_state(&mut self, mode: ValveMode) {
        let topic = self.topics.valve_state.clone();
        self.publish(&topic, mode.as_payload());
    }

    fn timer_state(&mut self, report: &TimerReport) {
        match report.to_json() {
            Ok(json) => {
                let topic = self.topics.timer_state.clone();
                self.publish(&topic, &json);
            }
            Err(e) => error!("session: cannot encode timer report: {}", e),
        }
    }
}

/// Collects reports in memory.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    pub pump: Vec<bool>,
    pub valve: Vec<ValveMode>,
    pub timer: Vec<TimerReport>,
}

#[cfg(test)]
impl StateSink for RecordingSink {
    fn pump_state(&mut self, on: bool) {
        self.pump.push(on);
    }

    fn valve_state(&mut self, mode: ValveMode) {
        self.valve.push(mode);
    }

    fn timer_state(&mut self, report: &TimerReport) {
        self.timer.push(*report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::sim::{ChannelEvent, SimChannel};

    fn snapshot(temperature: Option<f32>) -> StateSnapshot {
        StateSnapshot {
            pump_on: false,
            valve: ValveMode::Mode1,
            wifi: WifiReport::connected("home".into(), "10.0.0.2".into(), -48),
            timer: TimerReport {
                active: false,
                remaining: 0,
                mode: 1,
                duration: 0,
            },
            temperature,
        }
    }

    fn manager(channel: &SimChannel) -> SessionManager<SimChannel> {
        SessionManager::new(
            channel.clone(),
            Topics::for_device("pool"),
            ClientIdentity {
                client_id: "pool".to_string(),
                username: Some("device".to_string()),
                password: Some("secret".to_string()),
                keep_alive: Duration::from_secs(30),
            },
        )
    }

    #[test]
    fn connect_registers_last_will() {
        let channel = SimChannel::default();
        let mut session = manager(&channel);
        session.connect(&snapshot(Some(24.0))).unwrap();

        let options = channel.last_connect().unwrap();
        assert_eq!(options.last_will.topic, "devices/pool/wifi/state");
        assert_eq!(options.last_will.payload, br#"{"status":"disconnected"}"#.to_vec());
        assert!(options.last_will.retain);
    }

    #[test]
    fn connect_subscribes_then_publishes_snapshot() {
        let channel = SimChannel::default();
        let mut session = manager(&channel);
        session.connect(&snapshot(Some(24.31))).unwrap();

        assert_eq!(session.subscriptions().count(), 4);
        assert_eq!(channel.retained("devices/pool/pump/state"), Some("OFF".to_string()));
        assert_eq!(channel.retained("devices/pool/valve/state"), Some("1".to_string()));
        assert_eq!(
            channel.retained("devices/pool/timer/state"),
            Some(r#"{"active":false,"remaining":0,"mode":1,"duration":0}"#.to_string())
        );
        assert_eq!(
            channel.retained("devices/pool/temperature/state"),
            Some("24.3".to_string())
        );

        // Subscriptions all land before the first publish
        let events = channel.events();
        let first_publish = events
            .iter()
            .position(|e| matches!(e, ChannelEvent::Published { .. }))
            .unwrap();
        let last_subscribe = events
            .iter()
            .rposition(|e| matches!(e, ChannelEvent::Subscribed(_)))
            .unwrap();
        assert!(last_subscribe < first_publish);
    }

    #[test]
    fn temperature_fault_skips_that_publish() {
        let channel = SimChannel::default();
        let mut session = manager(&channel);
        session.connect(&snapshot(None)).unwrap();
        assert_eq!(channel.retained("devices/pool/temperature/state"), None);
    }

    #[test]
    fn refused_connect_leaves_session_down() {
        let channel = SimChannel::default();
        channel.refuse_with(5);
        let mut session = manager(&channel);

        assert!(matches!(
            session.connect(&snapshot(None)),
            Err(ChannelError::Refused(5))
        ));
        assert!(!session.is_connected());
        assert!(!session.publish("devices/pool/pump/state", "ON"));
    }

    #[test]
    fn tick_notices_a_dropped_connection() {
        let channel = SimChannel::default();
        let mut session = manager(&channel);
        session.connect(&snapshot(None)).unwrap();

        channel.inject("devices/pool/pump/set", "ON");
        channel.drop_connection();

        assert!(session.tick().is_empty());
        assert!(!session.is_connected());
        assert_eq!(session.subscriptions().count(), 0);
    }

    #[test]
    fn inbound_messages_are_dispatched() {
        let channel = SimChannel::default();
        let mut session = manager(&channel);
        session.connect(&snapshot(None)).unwrap();

        channel.inject("devices/pool/valve/set", "TOGGLE");
        let inbound = session.tick();
        assert_eq!(inbound.len(), 1);
        assert_eq!(
            session.dispatch(&inbound[0]),
            Some(Command::Valve(crate::dispatch::ValveCommand::Toggle))
        );
    }
}
