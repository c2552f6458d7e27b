//! The cooperative main loop. Every pass either services provisioning or
//! runs normal operation, never both.

use std::time::Duration;

use log::{debug, error, info, warn};
use pool_common::{Topics, WifiReport};

use crate::{
    config::Config,
    dispatch::{Command, PumpCommand, ValveCommand},
    equipment::{EquipmentController, EquipmentState},
    link::{LinkState, LinkSupervisor, LinkTick},
    platform::{
        CaptivePortal, ChannelTransport, Clock, CredentialStore, LinkDriver, Platform,
        ProvisioningRadio, Relay, TemperatureSensor,
    },
    provisioning::{Entry, ProvisioningCoordinator, ServiceOutcome},
    session::{SessionManager, StateSnapshot},
    timer::{TimerEngine, TimerState},
};

/// Unix time below which the wall clock is assumed unset. Certificate
/// validation needs a real date.
const MIN_PLAUSIBLE_EPOCH: i64 = 1_700_000_000;

/// Time for the disconnected report to leave before the session closes.
const RESET_FLUSH: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Caller should restart the process
    Restart,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Intervals {
    pub wifi_report: Duration,
    pub temperature_report: Duration,
    pub channel_retry: Duration,
}

impl Intervals {
    pub fn from_config(config: &Config) -> Self {
        Self {
            wifi_report: Duration::from_millis(config.telemetry.wifi_interval_ms),
            temperature_report: Duration::from_millis(config.telemetry.temperature_interval_ms),
            channel_retry: Duration::from_millis(config.broker.retry_interval_ms),
        }
    }
}

#[derive(Debug, Default)]
struct Schedule {
    last_wifi_report: Option<Duration>,
    last_temperature_report: Option<Duration>,
    last_channel_attempt: Option<Duration>,
}

fn due(last: Option<Duration>, now: Duration, every: Duration) -> bool {
    last.map_or(true, |at| now.saturating_sub(at) >= every)
}

pub struct PoolController {
    clock: Box<dyn Clock>,
    store: Box<dyn CredentialStore>,
    sensor: Box<dyn TemperatureSensor>,
    link: LinkSupervisor<Box<dyn LinkDriver>>,
    provisioning: ProvisioningCoordinator<Box<dyn ProvisioningRadio>, Box<dyn CaptivePortal>>,
    session: SessionManager<Box<dyn ChannelTransport>>,
    equipment: EquipmentController<Box<dyn Relay>>,
    timer: TimerEngine,
    intervals: Intervals,
    schedule: Schedule,
}

impl PoolController {
    pub fn new(platform: Platform, config: &Config) -> Self {
        let topics = Topics::for_device(&config.device.id);

        Self {
            clock: platform.clock,
            store: platform.store,
            sensor: platform.sensor,
            link: LinkSupervisor::new(platform.link, config.link.policy()),
            provisioning: ProvisioningCoordinator::new(
                platform.radio,
                platform.portal,
                config.provisioning_policy(),
            ),
            session: SessionManager::new(platform.channel, topics, config.client_identity()),
            equipment: EquipmentController::new(platform.pump, platform.valve),
            timer: TimerEngine::new(
                Duration::from_millis(config.equipment.settle_delay_ms),
                Duration::from_millis(config.timer.publish_interval_ms),
            ),
            intervals: Intervals::from_config(config),
            schedule: Schedule::default(),
        }
    }

    pub fn equipment_state(&self) -> EquipmentState {
        self.equipment.state()
    }

    pub fn timer_state(&self) -> TimerState {
        self.timer.state()
    }

    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    pub fn provisioning_active(&self) -> bool {
        self.provisioning.is_active()
    }

    pub fn channel_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn boot(&mut self) -> Flow {
        info!("controller: booting");

        let entry = self
            .provisioning
            .boot(&mut self.link, self.store.as_mut(), self.clock.as_ref());
        self.after_entry(entry)
    }

    fn after_entry(&mut self, entry: Entry) -> Flow {
        match entry {
            Entry::Online => {
                self.come_online();
                Flow::Continue
            }
            Entry::Advertising => {
                info!("controller: waiting for provisioning");
                Flow::Continue
            }
            Entry::Restart => Flow::Restart,
        }
    }

    fn come_online(&mut self) {
        check_wall_clock();
        self.connect_channel();
    }

    /// One pass of the loop.
    pub fn poll(&mut self) -> Flow {
        if self.provisioning.is_active() {
            let outcome =
                self.provisioning
                    .service(&mut self.link, self.store.as_mut(), self.clock.as_ref());
            return match outcome {
                ServiceOutcome::Waiting => Flow::Continue,
                ServiceOutcome::Online => {
                    self.come_online();
                    Flow::Continue
                }
                ServiceOutcome::ClearRequested => self.clear_credentials(),
                ServiceOutcome::Restart => Flow::Restart,
            };
        }

        // Local actuation, independent of the link
        self.timer.tick(
            self.clock.now(),
            &mut self.equipment,
            &mut self.session,
            self.clock.as_ref(),
        );

        match self.link.tick(self.store.as_mut(), self.clock.as_ref()) {
            LinkTick::Up => {}
            LinkTick::Recovered => {
                info!("controller: link recovered");
                if !self.session.is_connected() {
                    self.connect_channel();
                }
            }
            LinkTick::NoCredentials => {
                warn!("controller: link down with nothing to rejoin, provisioning");
                // Provisioning passes never tick the timer
                self.timer
                    .stop(&mut self.equipment, &mut self.session, self.clock.as_ref());
                self.session.disconnect();
                let entry =
                    self.provisioning
                        .enter(&mut self.link, self.store.as_mut(), self.clock.as_ref());
                return self.after_entry(entry);
            }
            LinkTick::Lost | LinkTick::Down => return Flow::Continue,
        }

        let now = self.clock.now();
        self.publish_telemetry(now);

        if !self.session.is_connected()
            && due(
                self.schedule.last_channel_attempt,
                now,
                self.intervals.channel_retry,
            )
        {
            self.connect_channel();
        }

        for message in self.session.tick() {
            if let Some(command) = self.session.dispatch(&message) {
                if self.apply(command) == Flow::Restart {
                    return Flow::Restart;
                }
            }
        }

        Flow::Continue
    }

    fn publish_telemetry(&mut self, now: Duration) {
        if !self.session.is_connected() {
            return;
        }

        if due(
            self.schedule.last_wifi_report,
            now,
            self.intervals.wifi_report,
        ) {
            self.schedule.last_wifi_report = Some(now);
            let report = self.link.report();
            self.session.publish_wifi(&report);
        }

        if due(
            self.schedule.last_temperature_report,
            now,
            self.intervals.temperature_report,
        ) {
            self.schedule.last_temperature_report = Some(now);
            if let Some(celsius) = self.read_temperature() {
                self.session.publish_temperature(celsius);
            }
        }
    }

    fn read_temperature(&mut self) -> Option<f32> {
        match self.sensor.read_celsius() {
            Ok(celsius) => {
                debug!("controller: water at {:.1} C", celsius);
                Some(celsius)
            }
            Err(e) => {
                warn!("controller: skipping temperature, {}", e);
                None
            }
        }
    }

    fn snapshot(&mut self) -> StateSnapshot {
        let equipment = self.equipment.state();
        StateSnapshot {
            pump_on: equipment.pump_on,
            valve: equipment.valve,
            wifi: self.link.report(),
            timer: self.timer.report(),
            temperature: self.read_temperature(),
        }
    }

    fn connect_channel(&mut self) {
        let now = self.clock.now();
        self.schedule.last_channel_attempt = Some(now);

        let snapshot = self.snapshot();
        match self.session.connect(&snapshot) {
            Ok(()) => {
                self.schedule.last_wifi_report = Some(now);
                self.schedule.last_temperature_report = Some(now);
            }
            Err(e) => warn!(
                "controller: channel down ({}), retrying in {}s",
                e,
                self.intervals.channel_retry.as_secs()
            ),
        }
    }

    fn apply(&mut self, command: Command) -> Flow {
        let clock = self.clock.as_ref();

        match command {
            Command::Pump(PumpCommand::On) => self.equipment.set_pump(true, &mut self.session),
            Command::Pump(PumpCommand::Off) => self.equipment.set_pump(false, &mut self.session),
            Command::Pump(PumpCommand::Toggle) => {
                let on = !self.equipment.state().pump_on;
                self.equipment.set_pump(on, &mut self.session);
            }
            Command::Valve(ValveCommand::Set(mode)) => {
                self.equipment.set_valve_mode(mode, &mut self.session)
            }
            Command::Valve(ValveCommand::Toggle) => {
                let mode = self.equipment.state().valve.toggled();
                self.equipment.set_valve_mode(mode, &mut self.session);
            }
            Command::Timer(timer) if timer.duration == 0 => {
                self.timer
                    .stop(&mut self.equipment, &mut self.session, clock)
            }
            Command::Timer(timer) => self.timer.start(
                timer.mode,
                timer.duration,
                &mut self.equipment,
                &mut self.session,
                clock,
            ),
            Command::ClearCredentials => return self.hard_reset(),
        }

        Flow::Continue
    }

    /// Wipe requested while a provisioning client is attached. Without a
    /// live channel there is nothing to announce, so the device just drops
    /// the credentials and keeps advertising.
    fn clear_credentials(&mut self) -> Flow {
        if self.session.is_connected() {
            return self.hard_reset();
        }

        info!("controller: clearing stored credentials");
        if let Err(e) = self.store.clear() {
            error!("controller: cannot clear credentials: {}", e);
        }
        self.link.forget();
        self.provisioning.reset_status();
        Flow::Continue
    }

    /// Announce the disconnect, tear everything down, wipe, restart.
    fn hard_reset(&mut self) -> Flow {
        warn!("controller: credential wipe requested, resetting");

        if self.session.is_connected() {
            self.session.publish_wifi(&WifiReport::disconnected());
            self.clock.sleep(RESET_FLUSH);
        }
        self.session.disconnect();
        self.link.forget();

        if let Err(e) = self.store.clear() {
            error!("controller: cannot clear credentials: {}", e);
        }

        Flow::Restart
    }

    /// Leave the outputs safe and close the session cleanly.
    pub fn shutdown(&mut self) {
        info!("controller: shutting down");

        let clock = self.clock.as_ref();
        self.timer
            .stop(&mut self.equipment, &mut self.session, clock);
        if self.equipment.state().pump_on {
            self.equipment.set_pump(false, &mut self.session);
        }
        self.session.disconnect();
        self.provisioning.stop();
    }
}

fn check_wall_clock() {
    let now = chrono::Utc::now();
    if now.timestamp() < MIN_PLAUSIBLE_EPOCH {
        warn!(
            "controller: wall clock reads {}, certificate checks will likely fail",
            now.format("%Y-%m-%d %H:%M:%S")
        );
    }
}
