//! Wireless link supervision: bounded joins at boot, patient retries once
//! the link has been lost.

use std::time::Duration;

use log::{error, info, warn};
use pool_common::WifiReport;

use crate::{
    credentials::Credentials,
    error::LinkError,
    platform::{Clock, CredentialStore, LinkDriver},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    /// No usable credentials
    Unprovisioned,
    /// Inside a join, `attempt` counts from 1
    Connecting { attempt: u32 },
    Connected,
    /// Credentials exist but the link is down, since the given clock reading
    Degraded { since: Duration },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkPolicy {
    /// How long one join may take before it counts as failed
    pub connect_timeout: Duration,
    /// Pause between attempts of a bounded join
    pub retry_backoff: Duration,
    /// Attempts made at boot before falling back to provisioning
    pub boot_attempts: u32,
    /// Spacing of single-attempt rejoins while degraded
    pub recheck_interval: Duration,
    /// A loss shorter than this is not yet treated as degraded
    pub loss_grace: Duration,
    /// How often association is checked during a join
    pub poll_interval: Duration,
}

impl Default for LinkPolicy {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            retry_backoff: Duration::from_secs(5),
            boot_attempts: 3,
            recheck_interval: Duration::from_secs(10),
            loss_grace: Duration::from_secs(3),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Result of one supervisor pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkTick {
    /// Associated and nothing changed
    Up,
    /// Association dropped, still inside the grace window
    Lost,
    /// Down; a rejoin either failed or is not due yet
    Down,
    /// Back up after being down
    Recovered,
    /// Down and the store holds nothing to rejoin with
    NoCredentials,
}

pub struct LinkSupervisor<D> {
    driver: D,
    policy: LinkPolicy,
    state: LinkState,
    last_good: Option<Credentials>,
    lost_at: Option<Duration>,
    last_recheck: Option<Duration>,
    reconnect_attempts: u32,
}

impl<D: LinkDriver> LinkSupervisor<D> {
    pub fn new(driver: D, policy: LinkPolicy) -> Self {
        Self {
            driver,
            policy,
            state: LinkState::Unprovisioned,
            last_good: None,
            lost_at: None,
            last_recheck: None,
            reconnect_attempts: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn policy(&self) -> &LinkPolicy {
        &self.policy
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn last_good(&self) -> Option<&Credentials> {
        self.last_good.as_ref()
    }

    /// Rejoin attempts since the link was last up. Informational only.
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Bounded join: up to `max_attempts` tries of `connect_timeout` each,
    /// `retry_backoff` apart. Blocks the caller throughout.
    pub fn attempt_connect(
        &mut self,
        credentials: &Credentials,
        max_attempts: u32,
        clock: &dyn Clock,
    ) -> Result<(), LinkError> {
        if !credentials.is_eligible() {
            return Err(LinkError::EmptyIdentifier);
        }

        let degraded_since = match self.state {
            LinkState::Degraded { since } => since,
            _ => clock.now(),
        };
        let max_attempts = max_attempts.max(1);

        info!(
            "link: joining {:?} (password {} bytes)",
            credentials.ssid,
            credentials.password.len()
        );

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                info!("link: retry {}/{}", attempt, max_attempts);
                clock.sleep(self.policy.retry_backoff);
            }
            self.state = LinkState::Connecting { attempt };

            if let Err(e) = self.driver.begin(credentials) {
                warn!("link: attempt {} rejected: {}", attempt, e);
                continue;
            }

            let started = clock.now();
            loop {
                if self.driver.is_associated() {
                    self.mark_connected(credentials);
                    return Ok(());
                }
                if clock.now().saturating_sub(started) >= self.policy.connect_timeout {
                    break;
                }
                clock.sleep(self.policy.poll_interval);
            }

            warn!("link: attempt {} timed out", attempt);
        }

        error!("link: giving up after {} attempt(s)", max_attempts);
        self.state = LinkState::Degraded {
            since: degraded_since,
        };
        self.last_recheck = Some(clock.now());

        Err(LinkError::Exhausted {
            attempts: max_attempts,
        })
    }

    fn mark_connected(&mut self, credentials: &Credentials) {
        if let Some(info) = self.driver.info() {
            info!("link: connected to {:?}, ip {}, rssi {}", info.ssid, info.ip, info.rssi);
        } else {
            info!("link: connected to {:?}", credentials.ssid);
        }

        self.state = LinkState::Connected;
        self.last_good = Some(credentials.clone());
        self.lost_at = None;
        self.reconnect_attempts = 0;
    }

    /// One supervision pass. While connected, watches for loss; once
    /// degraded, makes a single rejoin attempt per `recheck_interval` using
    /// whatever the store currently holds.
    pub fn tick(&mut self, store: &mut dyn CredentialStore, clock: &dyn Clock) -> LinkTick {
        let now = clock.now();

        if self.state == LinkState::Connected {
            if self.driver.is_associated() {
                self.lost_at = None;
                return LinkTick::Up;
            }

            let lost_at = *self.lost_at.get_or_insert(now);
            if now.saturating_sub(lost_at) < self.policy.loss_grace {
                return LinkTick::Lost;
            }

            warn!("link: lost, entering degraded mode");
            self.state = LinkState::Degraded { since: lost_at };
            self.last_recheck = None;
        }

        if self.driver.is_associated() {
            // Came back on its own
            if let Some(credentials) = self.last_good.clone() {
                self.mark_connected(&credentials);
                return LinkTick::Recovered;
            }
        }

        let due = self
            .last_recheck
            .map_or(true, |at| now.saturating_sub(at) >= self.policy.recheck_interval);
        if !due {
            return LinkTick::Down;
        }
        self.last_recheck = Some(now);

        let credentials = match store.load() {
            Ok(Some(credentials)) if credentials.is_eligible() => credentials,
            Ok(_) => {
                self.state = LinkState::Unprovisioned;
                return LinkTick::NoCredentials;
            }
            Err(e) => {
                error!("link: cannot read stored credentials: {}", e);
                return LinkTick::Down;
            }
        };

        self.reconnect_attempts += 1;
        info!("link: rejoin attempt {}", self.reconnect_attempts);

        match self.attempt_connect(&credentials, 1, clock) {
            Ok(()) => LinkTick::Recovered,
            Err(_) => LinkTick::Down,
        }
    }

    /// Whether the next `tick` would make a rejoin attempt.
    pub fn rejoin_due(&self, now: Duration) -> bool {
        matches!(self.state, LinkState::Degraded { .. })
            && self
                .last_recheck
                .map_or(true, |at| now.saturating_sub(at) >= self.policy.recheck_interval)
    }

    /// Point-in-time check, no state change.
    pub fn is_up(&mut self) -> bool {
        self.state == LinkState::Connected && self.driver.is_associated()
    }

    pub fn report(&mut self) -> WifiReport {
        if !self.is_up() {
            return WifiReport::disconnected();
        }

        match self.driver.info() {
            Some(info) => WifiReport::connected(info.ssid, info.ip, info.rssi),
            None => WifiReport::disconnected(),
        }
    }

    /// Leave the network and drop every trace of the credentials held by
    /// the supervisor and the driver.
    pub fn forget(&mut self) {
        info!("link: disconnecting and erasing driver credentials");
        self.driver.disconnect(true);
        self.state = LinkState::Unprovisioned;
        self.last_good = None;
        self.lost_at = None;
        self.last_recheck = None;
        self.reconnect_attempts = 0;
    }
}
