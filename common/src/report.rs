use serde::{Deserialize, Serialize};

/// The two valve positions. Both are driven from a single relay, so there is
/// no in-between state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValveMode {
    /// Relay released (cascade outlet)
    Mode1,
    /// Relay energized (jet outlet)
    Mode2,
}

impl ValveMode {
    pub fn from_number(n: i64) -> Option<Self> {
        match n {
            1 => Some(ValveMode::Mode1),
            2 => Some(ValveMode::Mode2),
            _ => None,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            ValveMode::Mode1 => 1,
            ValveMode::Mode2 => 2,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            ValveMode::Mode1 => ValveMode::Mode2,
            ValveMode::Mode2 => ValveMode::Mode1,
        }
    }

    /// Payload published on the valve state topic
    pub fn as_payload(self) -> &'static str {
        match self {
            ValveMode::Mode1 => "1",
            ValveMode::Mode2 => "2",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Connected,
    Disconnected,
}

/// Signal quality bucket derived from RSSI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalQuality {
    Excellent,
    Good,
    Fair,
    Weak,
}

impl SignalQuality {
    pub fn from_rssi(rssi: i32) -> Self {
        if rssi >= -50 {
            SignalQuality::Excellent
        } else if rssi >= -60 {
            SignalQuality::Good
        } else if rssi >= -70 {
            SignalQuality::Fair
        } else {
            SignalQuality::Weak
        }
    }
}

/// Retained document on the wifi state topic. Doubles as the last will.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiReport {
    pub status: LinkStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<SignalQuality>,
}

impl WifiReport {
    pub fn disconnected() -> Self {
        Self {
            status: LinkStatus::Disconnected,
            ssid: None,
            ip: None,
            rssi: None,
            quality: None,
        }
    }

    pub fn connected(ssid: String, ip: String, rssi: i32) -> Self {
        Self {
            status: LinkStatus::Connected,
            ssid: Some(ssid),
            ip: Some(ip),
            rssi: Some(rssi),
            quality: Some(SignalQuality::from_rssi(rssi)),
        }
    }
}

/// Retained document on the timer state topic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerReport {
    pub active: bool,
    pub remaining: u32,
    pub mode: u8,
    pub duration: u32,
}

/// Inbound timer command. Exactly these two fields; anything else is
/// rejected. A duration of zero means stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimerCommand {
    pub mode: i64,
    pub duration: u32,
}

#[cfg(feature = "std")]
impl TimerCommand {
    /// Strict parse: both fields present and integral, nothing trailing.
    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

#[cfg(feature = "std")]
impl WifiReport {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(feature = "std")]
impl TimerReport {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
