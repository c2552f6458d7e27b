use std::fmt;

/// Longest network identifier the radio accepts, in bytes
pub const MAX_SSID_LEN: usize = 32;
/// Longest WPA passphrase, in bytes
pub const MAX_PASSWORD_LEN: usize = 63;

/// A station identifier and secret.
///
/// Values longer than the radio limits are cut at the last character
/// boundary that fits.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub ssid: String,
    pub password: String,
}

impl Credentials {
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: truncate_to(ssid.into(), MAX_SSID_LEN),
            password: truncate_to(password.into(), MAX_PASSWORD_LEN),
        }
    }

    /// A non-empty identifier is all it takes to try a join.
    pub fn is_eligible(&self) -> bool {
        !self.ssid.is_empty()
    }
}

// Keep the secret out of logs
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid)
            .field("password", &format_args!("<{} bytes>", self.password.len()))
            .finish()
    }
}

fn truncate_to(mut value: String, max: usize) -> String {
    if value.len() > max {
        let mut cut = max;
        while !value.is_char_boundary(cut) {
            cut -= 1;
        }
        value.truncate(cut);
    }
    value
}
