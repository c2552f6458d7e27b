//! In-memory board.
//!
//! Every fake is a cheap handle around shared state: clone one, hand the
//! clone to the controller, keep the original to script inputs and inspect
//! what happened.

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, VecDeque},
    rc::Rc,
    time::Duration,
};

use pool_common::Attribute;

use super::{
    CaptivePortal, ChannelTransport, Clock, ConnectOptions, CredentialStore, InboundMessage,
    LinkDriver, LinkInfo, Platform, ProvisioningRadio, RadioEvent, Relay, ScannedNetwork,
    TemperatureSensor,
};
use crate::{
    credentials::Credentials,
    error::{ChannelError, LinkError, RadioError, SensorFault, StoreError},
};

/// Manual clock. `sleep` advances it instantly.
#[derive(Clone, Debug, Default)]
pub struct SimClock {
    now: Rc<Cell<Duration>>,
}

impl SimClock {
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for SimClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[derive(Clone, Debug, Default)]
pub struct SimRelay {
    writes: Rc<RefCell<Vec<bool>>>,
}

impl SimRelay {
    pub fn writes(&self) -> Vec<bool> {
        self.writes.borrow().clone()
    }

    pub fn is_energized(&self) -> bool {
        self.writes.borrow().last().copied().unwrap_or(false)
    }
}

impl Relay for SimRelay {
    fn set(&mut self, energized: bool) {
        self.writes.borrow_mut().push(energized);
    }
}

/// Sensor returning a fixed reading, or a disconnect fault when unset.
#[derive(Clone, Debug, Default)]
pub struct SimSensor {
    reading: Rc<Cell<Option<f32>>>,
}

impl SimSensor {
    pub fn set(&self, reading: Option<f32>) {
        self.reading.set(reading);
    }
}

impl TemperatureSensor for SimSensor {
    fn read_celsius(&mut self) -> Result<f32, SensorFault> {
        self.reading.get().ok_or(SensorFault::Disconnected)
    }
}

#[derive(Debug)]
struct LinkWorld {
    /// Networks in range and their passwords
    networks: HashMap<String, String>,
    router_up: bool,
    associated: Option<Credentials>,
    begin_calls: Vec<String>,
    erased: bool,
    scan: Vec<ScannedNetwork>,
}

impl Default for LinkWorld {
    fn default() -> Self {
        Self {
            networks: HashMap::new(),
            router_up: true,
            associated: None,
            begin_calls: Vec::new(),
            erased: false,
            scan: Vec::new(),
        }
    }
}

/// Joins succeed immediately when the router is up and the password
/// matches; otherwise the join just never associates.
#[derive(Clone, Debug, Default)]
pub struct SimLink {
    world: Rc<RefCell<LinkWorld>>,
}

impl SimLink {
    pub fn with_network(ssid: &str, password: &str) -> Self {
        let link = Self::default();
        link.add_network(ssid, password);
        link
    }

    pub fn add_network(&self, ssid: &str, password: &str) {
        self.world
            .borrow_mut()
            .networks
            .insert(ssid.to_string(), password.to_string());
    }

    /// While down nothing associates. Bringing it back up restores an
    /// existing association.
    pub fn set_router_up(&self, up: bool) {
        self.world.borrow_mut().router_up = up;
    }

    pub fn drop_association(&self) {
        self.world.borrow_mut().associated = None;
    }

    pub fn set_scan(&self, networks: Vec<ScannedNetwork>) {
        self.world.borrow_mut().scan = networks;
    }

    pub fn begin_calls(&self) -> Vec<String> {
        self.world.borrow().begin_calls.clone()
    }

    pub fn erased(&self) -> bool {
        self.world.borrow().erased
    }
}

impl LinkDriver for SimLink {
    fn begin(&mut self, credentials: &Credentials) -> Result<(), LinkError> {
        let mut world = self.world.borrow_mut();
        world.begin_calls.push(credentials.ssid.clone());

        let accepted = world.router_up
            && world.networks.get(&credentials.ssid) == Some(&credentials.password);
        world.associated = accepted.then(|| credentials.clone());
        Ok(())
    }

    fn is_associated(&mut self) -> bool {
        let world = self.world.borrow();
        world.router_up && world.associated.is_some()
    }

    fn disconnect(&mut self, erase: bool) {
        let mut world = self.world.borrow_mut();
        world.associated = None;
        world.erased |= erase;
    }

    fn scan(&mut self) -> Vec<ScannedNetwork> {
        self.world.borrow().scan.clone()
    }

    fn info(&mut self) -> Option<LinkInfo> {
        let world = self.world.borrow();
        if !world.router_up {
            return None;
        }
        world.associated.as_ref().map(|credentials| LinkInfo {
            ssid: credentials.ssid.clone(),
            ip: "192.168.1.50".to_string(),
            rssi: -55,
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    slot: Rc<RefCell<Option<Credentials>>>,
    clears: Rc<Cell<u32>>,
}

impl MemoryStore {
    pub fn with(credentials: Credentials) -> Self {
        let store = Self::default();
        *store.slot.borrow_mut() = Some(credentials);
        store
    }

    pub fn contents(&self) -> Option<Credentials> {
        self.slot.borrow().clone()
    }

    pub fn clears(&self) -> u32 {
        self.clears.get()
    }
}

impl CredentialStore for MemoryStore {
    fn load(&mut self) -> Result<Option<Credentials>, StoreError> {
        Ok(self.contents())
    }

    fn save(&mut self, credentials: &Credentials) -> Result<(), StoreError> {
        *self.slot.borrow_mut() = Some(credentials.clone());
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        *self.slot.borrow_mut() = None;
        self.clears.set(self.clears.get() + 1);
        Ok(())
    }
}

/// What the broker saw, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    Connected,
    Subscribed(String),
    Published {
        topic: String,
        payload: String,
        retain: bool,
    },
    Disconnected,
}

#[derive(Debug, Default)]
struct Broker {
    connected: bool,
    refuse: Option<u8>,
    connects: Vec<ConnectOptions>,
    events: Vec<ChannelEvent>,
    inbox: VecDeque<InboundMessage>,
}

#[derive(Clone, Debug, Default)]
pub struct SimChannel {
    broker: Rc<RefCell<Broker>>,
}

impl SimChannel {
    /// Refuse every connect with this reason code until `accept`.
    pub fn refuse_with(&self, code: u8) {
        self.broker.borrow_mut().refuse = Some(code);
    }

    pub fn accept(&self) {
        self.broker.borrow_mut().refuse = None;
    }

    /// Broker side drop; the device has to notice on its own.
    pub fn drop_connection(&self) {
        self.broker.borrow_mut().connected = false;
    }

    pub fn inject(&self, topic: &str, payload: &str) {
        self.broker.borrow_mut().inbox.push_back(InboundMessage {
            topic: topic.to_string(),
            payload: payload.as_bytes().to_vec(),
        });
    }

    pub fn connects(&self) -> usize {
        self.broker.borrow().connects.len()
    }

    pub fn last_connect(&self) -> Option<ConnectOptions> {
        self.broker.borrow().connects.last().cloned()
    }

    pub fn events(&self) -> Vec<ChannelEvent> {
        self.broker.borrow().events.clone()
    }

    pub fn clear_events(&self) {
        self.broker.borrow_mut().events.clear();
    }

    /// Every payload published on `topic`, oldest first.
    pub fn published(&self, topic: &str) -> Vec<String> {
        self.broker
            .borrow()
            .events
            .iter()
            .filter_map(|event| match event {
                ChannelEvent::Published {
                    topic: published, payload, ..
                } if published == topic => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    /// Latest retained payload on `topic`.
    pub fn retained(&self, topic: &str) -> Option<String> {
        self.broker
            .borrow()
            .events
            .iter()
            .rev()
            .find_map(|event| match event {
                ChannelEvent::Published {
                    topic: published,
                    payload,
                    retain: true,
                } if published == topic => Some(payload.clone()),
                _ => None,
            })
    }
}

impl ChannelTransport for SimChannel {
    fn connect(&mut self, options: &ConnectOptions) -> Result<(), ChannelError> {
        let mut broker = self.broker.borrow_mut();
        broker.connects.push(options.clone());

        if let Some(code) = broker.refuse {
            broker.connected = false;
            return Err(ChannelError::Refused(code));
        }
        broker.connected = true;
        broker.events.push(ChannelEvent::Connected);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.broker.borrow().connected
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), ChannelError> {
        let mut broker = self.broker.borrow_mut();
        if !broker.connected {
            return Err(ChannelError::NotConnected);
        }
        broker.events.push(ChannelEvent::Subscribed(topic.to_string()));
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), ChannelError> {
        let mut broker = self.broker.borrow_mut();
        if !broker.connected {
            return Err(ChannelError::NotConnected);
        }
        broker.events.push(ChannelEvent::Published {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(payload).into_owned(),
            retain,
        });
        Ok(())
    }

    fn poll(&mut self) -> Vec<InboundMessage> {
        let mut broker = self.broker.borrow_mut();
        if !broker.connected {
            return Vec::new();
        }
        broker.inbox.drain(..).collect()
    }

    fn disconnect(&mut self) {
        let mut broker = self.broker.borrow_mut();
        if broker.connected {
            broker.connected = false;
            broker.events.push(ChannelEvent::Disconnected);
        }
    }
}

#[derive(Debug, Default)]
struct RadioState {
    advertised_name: Option<String>,
    fail_start: bool,
    starts: u32,
    stops: u32,
    advertising_restarts: u32,
    attributes: HashMap<Attribute, Vec<u8>>,
    status_history: Vec<String>,
    events: VecDeque<RadioEvent>,
}

#[derive(Clone, Debug, Default)]
pub struct SimRadio {
    state: Rc<RefCell<RadioState>>,
}

impl SimRadio {
    pub fn fail_start(&self) {
        self.state.borrow_mut().fail_start = true;
    }

    pub fn push_event(&self, event: RadioEvent) {
        self.state.borrow_mut().events.push_back(event);
    }

    pub fn is_active(&self) -> bool {
        self.state.borrow().advertised_name.is_some()
    }

    pub fn advertised_name(&self) -> Option<String> {
        self.state.borrow().advertised_name.clone()
    }

    pub fn starts(&self) -> u32 {
        self.state.borrow().starts
    }

    pub fn stops(&self) -> u32 {
        self.state.borrow().stops
    }

    pub fn advertising_restarts(&self) -> u32 {
        self.state.borrow().advertising_restarts
    }

    pub fn attribute(&self, attribute: Attribute) -> Option<String> {
        self.state
            .borrow()
            .attributes
            .get(&attribute)
            .map(|value| String::from_utf8_lossy(value).into_owned())
    }

    /// Every status notified since the radio was created
    pub fn status_history(&self) -> Vec<String> {
        self.state.borrow().status_history.clone()
    }
}

impl ProvisioningRadio for SimRadio {
    fn start(&mut self, name: &str) -> Result<(), RadioError> {
        let mut state = self.state.borrow_mut();
        if state.fail_start {
            return Err(RadioError::Unavailable("simulated radio fault".to_string()));
        }
        state.starts += 1;
        state.advertised_name = Some(name.to_string());
        state.attributes.clear();
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.state.borrow_mut();
        state.stops += 1;
        state.advertised_name = None;
        state.events.clear();
    }

    fn restart_advertising(&mut self) {
        self.state.borrow_mut().advertising_restarts += 1;
    }

    fn poll_event(&mut self) -> Option<RadioEvent> {
        let mut state = self.state.borrow_mut();
        if state.advertised_name.is_none() {
            return None;
        }
        state.events.pop_front()
    }

    fn update(&mut self, attribute: Attribute, value: &[u8], notify: bool) {
        let mut state = self.state.borrow_mut();
        if attribute == Attribute::Status && notify {
            let status = String::from_utf8_lossy(value).into_owned();
            state.status_history.push(status);
        }
        state.attributes.insert(attribute, value.to_vec());
    }
}

#[derive(Clone, Debug, Default)]
pub struct SimPortal {
    offer: Rc<RefCell<Option<Credentials>>>,
    runs: Rc<Cell<u32>>,
}

impl SimPortal {
    /// Credentials the next portal run will hand back
    pub fn offer(&self, credentials: Credentials) {
        *self.offer.borrow_mut() = Some(credentials);
    }

    pub fn runs(&self) -> u32 {
        self.runs.get()
    }
}

impl CaptivePortal for SimPortal {
    fn run(&mut self, _ap_name: &str, _timeout: Duration) -> Option<Credentials> {
        self.runs.set(self.runs.get() + 1);
        self.offer.borrow_mut().take()
    }
}

/// One handle per device on the simulated board.
#[derive(Clone, Debug, Default)]
pub struct SimBoard {
    pub clock: SimClock,
    pub link: SimLink,
    pub store: MemoryStore,
    pub channel: SimChannel,
    pub radio: SimRadio,
    pub portal: SimPortal,
    pub pump: SimRelay,
    pub valve: SimRelay,
    pub sensor: SimSensor,
}

impl SimBoard {
    /// Board for `--simulate`: a reachable network already stored and a
    /// sensor reading.
    pub fn demo() -> Self {
        let board = Self::default();
        board.link.add_network("pool-lab", "swimming");
        board.link.set_scan(vec![ScannedNetwork {
            ssid: "pool-lab".to_string(),
            rssi: -48,
            open: false,
        }]);
        *board.store.slot.borrow_mut() = Some(Credentials::new("pool-lab", "swimming"));
        board.sensor.set(Some(26.5));
        board
    }

    pub fn platform(&self) -> Platform {
        Platform {
            clock: Box::new(self.clock.clone()),
            link: Box::new(self.link.clone()),
            store: Box::new(self.store.clone()),
            channel: Box::new(self.channel.clone()),
            radio: Box::new(self.radio.clone()),
            portal: Box::new(self.portal.clone()),
            pump: Box::new(self.pump.clone()),
            valve: Box::new(self.valve.clone()),
            sensor: Box::new(self.sensor.clone()),
        }
    }
}
