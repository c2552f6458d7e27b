//! First-time setup and recovery: decide at boot whether stored credentials
//! are good enough, otherwise advertise the provisioning service and wait
//! for an operator to write new ones.

use std::time::Duration;

use log::{error, info, warn};
use pool_common::{Attribute, ProvisioningStatus};

use crate::{
    link::{LinkSupervisor, LinkTick},
    platform::{CaptivePortal, Clock, CredentialStore, LinkDriver, ProvisioningRadio},
};

pub mod scan;
pub mod session;

pub use session::ProvisioningSession;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisioningPolicy {
    /// Name the radio advertises under
    pub device_name: String,
    /// How often written credentials are picked up
    pub check_interval: Duration,
    /// Upper bound for the scan listing, in bytes
    pub scan_budget: usize,
    /// Access point name of the fallback portal
    pub portal_name: String,
    pub portal_timeout: Duration,
}

/// How entering provisioning turned out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Entry {
    /// Already online, no provisioning needed
    Online,
    /// Radio is advertising
    Advertising,
    /// Nothing worked; the device should restart
    Restart,
}

/// Outcome of one provisioning pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceOutcome {
    Waiting,
    /// Link is up with new or recovered credentials; radio is stopped
    Online,
    /// Operator asked for the stored credentials to be wiped
    ClearRequested,
    Restart,
}

pub struct ProvisioningCoordinator<R, P> {
    radio: R,
    portal: P,
    policy: ProvisioningPolicy,
    session: Option<ProvisioningSession>,
    last_check: Option<Duration>,
}

impl<R: ProvisioningRadio, P: CaptivePortal> ProvisioningCoordinator<R, P> {
    pub fn new(radio: R, portal: P, policy: ProvisioningPolicy) -> Self {
        Self {
            radio,
            portal,
            policy,
            session: None,
            last_check: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&ProvisioningSession> {
        self.session.as_ref()
    }

    /// Stored credentials get a bounded join; anything short of a working
    /// link ends in provisioning.
    pub fn boot<D: LinkDriver>(
        &mut self,
        link: &mut LinkSupervisor<D>,
        store: &mut dyn CredentialStore,
        clock: &dyn Clock,
    ) -> Entry {
        match store.load() {
            Ok(Some(credentials)) if credentials.is_eligible() => {
                info!("provisioning: found stored credentials for {:?}", credentials.ssid);
                let attempts = link.policy().boot_attempts;
                if link.attempt_connect(&credentials, attempts, clock).is_ok() {
                    return Entry::Online;
                }
                warn!("provisioning: stored credentials failed, keeping them for later retries");
            }
            Ok(_) => info!("provisioning: no stored credentials"),
            Err(e) => error!("provisioning: credential store unreadable: {}", e),
        }

        self.enter(link, store, clock)
    }

    /// Start advertising. If the radio can't start, run the access point
    /// portal instead and try whatever it collects once.
    pub fn enter<D: LinkDriver>(
        &mut self,
        link: &mut LinkSupervisor<D>,
        store: &mut dyn CredentialStore,
        clock: &dyn Clock,
    ) -> Entry {
        if self.is_active() {
            return Entry::Advertising;
        }

        match self.radio.start(&self.policy.device_name) {
            Ok(()) => {
                info!("provisioning: advertising as {:?}", self.policy.device_name);
                let mut session = ProvisioningSession::default();
                self.radio.update(Attribute::Ssid, b"", false);
                self.radio.update(Attribute::Networks, b"[]", false);
                self.radio.update(Attribute::Command, b"", false);
                session.emit(ProvisioningStatus::Waiting, &mut self.radio);
                self.session = Some(session);
                self.last_check = Some(clock.now());
                Entry::Advertising
            }
            Err(e) => {
                error!("provisioning: {}, falling back to portal", e);
                self.run_portal(link, store, clock)
            }
        }
    }

    fn run_portal<D: LinkDriver>(
        &mut self,
        link: &mut LinkSupervisor<D>,
        store: &mut dyn CredentialStore,
        clock: &dyn Clock,
    ) -> Entry {
        info!(
            "provisioning: portal {:?} open for {}s",
            self.policy.portal_name,
            self.policy.portal_timeout.as_secs()
        );

        let Some(credentials) = self.portal.run(&self.policy.portal_name, self.policy.portal_timeout)
        else {
            warn!("provisioning: portal timed out");
            return Entry::Restart;
        };

        if link.attempt_connect(&credentials, 1, clock).is_err() {
            warn!("provisioning: portal credentials did not work");
            return Entry::Restart;
        }
        if let Err(e) = store.save(&credentials) {
            error!("provisioning: cannot persist credentials: {}", e);
        }
        Entry::Online
    }

    /// Stop advertising and drop the session.
    pub fn stop(&mut self) {
        if self.session.take().is_some() {
            info!("provisioning: stopping radio");
            self.radio.stop();
        }
    }

    /// Back to `waiting` after a wipe that didn't need a restart.
    pub fn reset_status(&mut self) {
        if let Some(session) = self.session.as_mut() {
            *session = ProvisioningSession::default();
            session.emit(ProvisioningStatus::Waiting, &mut self.radio);
        }
    }

    /// One provisioning pass: drain radio events, then on the check
    /// interval act on whatever they left behind.
    pub fn service<D: LinkDriver>(
        &mut self,
        link: &mut LinkSupervisor<D>,
        store: &mut dyn CredentialStore,
        clock: &dyn Clock,
    ) -> ServiceOutcome {
        let Some(session) = self.session.as_mut() else {
            return ServiceOutcome::Waiting;
        };

        while let Some(event) = self.radio.poll_event() {
            session.handle(event, &mut self.radio, link.driver_mut(), self.policy.scan_budget);
        }

        let now = clock.now();
        let due = self
            .last_check
            .map_or(true, |at| now.saturating_sub(at) >= self.policy.check_interval);
        if !due {
            return ServiceOutcome::Waiting;
        }
        self.last_check = Some(now);

        if session.take_clear_request() {
            return ServiceOutcome::ClearRequested;
        }

        if let Some(credentials) = session.take_credentials() {
            info!("provisioning: trying credentials for {:?}", credentials.ssid);
            // The radio and the station share an antenna
            self.stop();

            if link.attempt_connect(&credentials, 1, clock).is_ok() {
                match store.save(&credentials) {
                    Ok(()) => info!("provisioning: credentials saved"),
                    Err(e) => error!("provisioning: cannot persist credentials: {}", e),
                }
                return ServiceOutcome::Online;
            }

            warn!("provisioning: join failed, advertising again");
            return match self.enter(link, store, clock) {
                Entry::Online => ServiceOutcome::Online,
                Entry::Advertising => ServiceOutcome::Waiting,
                Entry::Restart => ServiceOutcome::Restart,
            };
        }

        // Keep trying stored credentials while nobody is mid-setup
        if session.client_connected() || !link.rejoin_due(now) {
            return ServiceOutcome::Waiting;
        }

        self.stop();
        if link.tick(store, clock) == LinkTick::Recovered {
            info!("provisioning: stored credentials work again");
            return ServiceOutcome::Online;
        }

        match self.enter(link, store, clock) {
            Entry::Online => ServiceOutcome::Online,
            Entry::Advertising => ServiceOutcome::Waiting,
            Entry::Restart => ServiceOutcome::Restart,
        }
    }
}
