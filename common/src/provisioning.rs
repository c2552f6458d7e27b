use serde::{Deserialize, Serialize};

/// Service advertised by the short-range provisioning radio.
pub const SERVICE_UUID: &str = "4fafc201-1fb5-459e-8fcc-c5c9c331914b";

/// Attributes exposed by the provisioning service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Attribute {
    /// Network identifier (read/write)
    Ssid,
    /// Network secret (write only)
    Password,
    /// Last emitted status string (read/notify)
    Status,
    /// Write triggers a scan, the listing is read back or notified
    Networks,
    /// Generic command verbs, e.g. `clear_wifi`
    Command,
}

impl Attribute {
    pub const ALL: [Attribute; 5] = [
        Attribute::Ssid,
        Attribute::Password,
        Attribute::Status,
        Attribute::Networks,
        Attribute::Command,
    ];

    pub fn uuid(self) -> &'static str {
        match self {
            Attribute::Ssid => "beb5483e-36e1-4688-b7f5-ea07361b26a8",
            Attribute::Password => "cba1d466-344c-4be3-ab3f-189f80dd7518",
            Attribute::Status => "8d8218b6-97bc-4527-a8db-13094ac06b1d",
            Attribute::Networks => "fa87c0d0-afac-11de-8a39-0800200c9a66",
            Attribute::Command => "8b9d68c4-57b8-4b02-bf19-6fd94b62f709",
        }
    }

    /// Short name, used by line-oriented bridges
    pub fn name(self) -> &'static str {
        match self {
            Attribute::Ssid => "ssid",
            Attribute::Password => "password",
            Attribute::Status => "status",
            Attribute::Networks => "networks",
            Attribute::Command => "command",
        }
    }

    /// Accepts either the short name or the UUID
    pub fn parse(id: &str) -> Option<Self> {
        let id = id.trim();
        Self::ALL
            .into_iter()
            .find(|attr| attr.name().eq_ignore_ascii_case(id) || attr.uuid().eq_ignore_ascii_case(id))
    }

    pub fn readable(self) -> bool {
        !matches!(self, Attribute::Password)
    }
}

/// Values of the status attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProvisioningStatus {
    Waiting,
    IdentifierReceived,
    SecretReceived,
    CredentialsReady,
    ClearWifiRequested,
    Connected,
}

impl ProvisioningStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProvisioningStatus::Waiting => "waiting",
            ProvisioningStatus::IdentifierReceived => "identifier_received",
            ProvisioningStatus::SecretReceived => "secret_received",
            ProvisioningStatus::CredentialsReady => "credentials_ready",
            ProvisioningStatus::ClearWifiRequested => "clear_wifi_requested",
            ProvisioningStatus::Connected => "connected",
        }
    }
}

/// One entry of the network scan listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkEntry {
    pub ssid: String,
    pub rssi: i32,
    pub open: bool,
}
