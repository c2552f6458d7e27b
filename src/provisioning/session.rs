use log::{debug, info, warn};
use pool_common::{Attribute, ProvisioningStatus};

use crate::{
    credentials::{Credentials, MAX_PASSWORD_LEN, MAX_SSID_LEN},
    platform::{LinkDriver, ProvisioningRadio, RadioEvent},
};

use super::scan;

/// What an operator has written over the radio so far.
#[derive(Debug)]
pub struct ProvisioningSession {
    pending_ssid: String,
    pending_password: String,
    complete: bool,
    clear_requested: bool,
    client_connected: bool,
    status: ProvisioningStatus,
}

impl Default for ProvisioningSession {
    fn default() -> Self {
        Self {
            pending_ssid: String::new(),
            pending_password: String::new(),
            complete: false,
            clear_requested: false,
            client_connected: false,
            status: ProvisioningStatus::Waiting,
        }
    }
}

impl ProvisioningSession {
    pub fn status(&self) -> ProvisioningStatus {
        self.status
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn client_connected(&self) -> bool {
        self.client_connected
    }

    pub fn emit(&mut self, status: ProvisioningStatus, radio: &mut dyn ProvisioningRadio) {
        debug!("provisioning: status -> {}", status.as_str());
        self.status = status;
        radio.update(Attribute::Status, status.as_str().as_bytes(), true);
    }

    pub fn handle<D: LinkDriver>(
        &mut self,
        event: RadioEvent,
        radio: &mut dyn ProvisioningRadio,
        driver: &mut D,
        scan_budget: usize,
    ) {
        match event {
            RadioEvent::ClientConnected => {
                info!("provisioning: client connected");
                self.client_connected = true;
                self.emit(ProvisioningStatus::Connected, radio);
            }
            RadioEvent::ClientDisconnected => {
                info!("provisioning: client disconnected, advertising again");
                self.client_connected = false;
                radio.restart_advertising();
            }
            RadioEvent::Write { attribute, value } => {
                self.on_write(attribute, &value, radio, driver, scan_budget)
            }
            RadioEvent::Read { attribute } => {
                debug!("provisioning: {} read", attribute.name());
            }
        }
    }

    fn on_write<D: LinkDriver>(
        &mut self,
        attribute: Attribute,
        value: &[u8],
        radio: &mut dyn ProvisioningRadio,
        driver: &mut D,
        scan_budget: usize,
    ) {
        match attribute {
            Attribute::Ssid => {
                self.pending_ssid = Credentials::new(String::from_utf8_lossy(value), "").ssid;
                if value.len() > MAX_SSID_LEN {
                    warn!("provisioning: identifier truncated to {} bytes", MAX_SSID_LEN);
                }
                info!("provisioning: identifier {:?}", self.pending_ssid);
                self.emit(ProvisioningStatus::IdentifierReceived, radio);
            }
            Attribute::Password => {
                self.pending_password =
                    Credentials::new("", String::from_utf8_lossy(value)).password;
                if value.len() > MAX_PASSWORD_LEN {
                    warn!("provisioning: secret truncated to {} bytes", MAX_PASSWORD_LEN);
                }
                info!(
                    "provisioning: secret received ({} bytes)",
                    self.pending_password.len()
                );
                self.emit(ProvisioningStatus::SecretReceived, radio);

                if !self.pending_ssid.is_empty() && !self.pending_password.is_empty() {
                    self.complete = true;
                    info!("provisioning: credentials ready");
                    self.emit(ProvisioningStatus::CredentialsReady, radio);
                }
            }
            Attribute::Networks => {
                info!("provisioning: scan requested");
                let found = driver.scan();
                let json = scan::listing(&found, scan_budget);
                info!(
                    "provisioning: {} networks seen, listing is {} bytes",
                    found.len(),
                    json.len()
                );
                radio.update(Attribute::Networks, json.as_bytes(), true);
            }
            Attribute::Command => {
                let verb = String::from_utf8_lossy(value);
                let verb = verb.trim();
                if verb.eq_ignore_ascii_case("clear_wifi") || verb.eq_ignore_ascii_case("clear") {
                    warn!("provisioning: credential wipe requested");
                    self.clear_requested = true;
                    self.emit(ProvisioningStatus::ClearWifiRequested, radio);
                } else {
                    warn!("provisioning: unknown command {:?}", verb);
                }
            }
            Attribute::Status => {
                warn!("provisioning: ignoring write to read-only status");
            }
        }
    }

    /// Hands over the pending pair once both parts arrived, clearing it
    /// either way so a failed join needs a fresh write.
    pub fn take_credentials(&mut self) -> Option<Credentials> {
        if !self.complete {
            return None;
        }
        self.complete = false;

        let ssid = std::mem::take(&mut self.pending_ssid);
        let password = std::mem::take(&mut self.pending_password);
        Some(Credentials::new(ssid, password))
    }

    pub fn take_clear_request(&mut self) -> bool {
        std::mem::take(&mut self.clear_requested)
    }
}
