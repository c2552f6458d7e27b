//! Link driver on top of NetworkManager's command line client.

use std::{process::Command, time::Duration};

use log::{debug, warn};

use super::{LinkDriver, LinkInfo, ScannedNetwork};
use crate::{credentials::Credentials, error::LinkError};

pub struct NmcliLink {
    interface: String,
    /// Passed to `nmcli --wait` for a join
    join_wait: Duration,
}

impl NmcliLink {
    pub fn new(interface: impl Into<String>, join_wait: Duration) -> Self {
        Self {
            interface: interface.into(),
            join_wait,
        }
    }

    fn run(&self, args: &[&str]) -> Result<String, String> {
        let output = Command::new("nmcli")
            .args(args)
            .output()
            .map_err(|e| format!("cannot run nmcli: {}", e))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
        }
    }

    fn device_fields(&self, fields: &str) -> Option<String> {
        match self.run(&["-t", "-f", fields, "device", "show", &self.interface]) {
            Ok(out) => Some(out),
            Err(e) => {
                debug!("link: nmcli device show failed: {}", e);
                None
            }
        }
    }
}

impl LinkDriver for NmcliLink {
    fn begin(&mut self, credentials: &Credentials) -> Result<(), LinkError> {
        let wait = self.join_wait.as_secs().max(1).to_string();
        let mut args = vec![
            "--wait",
            wait.as_str(),
            "device",
            "wifi",
            "connect",
            credentials.ssid.as_str(),
        ];
        if !credentials.password.is_empty() {
            args.extend(["password", credentials.password.as_str()]);
        }
        args.extend(["ifname", self.interface.as_str()]);

        self.run(&args).map(|_| ()).map_err(LinkError::Driver)
    }

    fn is_associated(&mut self) -> bool {
        self.device_fields("GENERAL.STATE,IP4.ADDRESS")
            .map(|out| parse_device_show(&out).associated())
            .unwrap_or(false)
    }

    fn disconnect(&mut self, erase: bool) {
        let connection = self
            .device_fields("GENERAL.CONNECTION")
            .and_then(|out| parse_device_show(&out).connection);

        if let Err(e) = self.run(&["device", "disconnect", &self.interface]) {
            warn!("link: nmcli disconnect failed: {}", e);
        }

        if erase {
            if let Some(name) = connection {
                if let Err(e) = self.run(&["connection", "delete", "id", &name]) {
                    warn!("link: cannot delete profile {:?}: {}", name, e);
                }
            }
        }
    }

    fn scan(&mut self) -> Vec<ScannedNetwork> {
        match self.run(&[
            "-t",
            "-f",
            "SSID,SIGNAL,SECURITY",
            "device",
            "wifi",
            "list",
            "ifname",
            &self.interface,
            "--rescan",
            "yes",
        ]) {
            Ok(out) => out.lines().filter_map(parse_scan_line).collect(),
            Err(e) => {
                warn!("link: scan failed: {}", e);
                Vec::new()
            }
        }
    }

    fn info(&mut self) -> Option<LinkInfo> {
        let device = parse_device_show(&self.device_fields("IP4.ADDRESS")?);
        let ip = device.ip?;

        let out = self
            .run(&[
                "-t",
                "-f",
                "ACTIVE,SSID,SIGNAL",
                "device",
                "wifi",
                "list",
                "ifname",
                &self.interface,
                "--rescan",
                "no",
            ])
            .ok()?;
        let (ssid, signal) = out.lines().find_map(parse_active_line)?;

        Some(LinkInfo {
            ssid,
            ip,
            rssi: signal_to_rssi(signal),
        })
    }
}

#[derive(Debug, Default, PartialEq)]
struct DeviceShow {
    state: Option<u32>,
    connection: Option<String>,
    ip: Option<String>,
}

impl DeviceShow {
    /// 100 is NM_DEVICE_STATE_ACTIVATED
    fn associated(&self) -> bool {
        self.state == Some(100) && self.ip.is_some()
    }
}

fn parse_device_show(out: &str) -> DeviceShow {
    let mut device = DeviceShow::default();

    for line in out.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if key == "GENERAL.STATE" {
            device.state = value.split_whitespace().next().and_then(|s| s.parse().ok());
        } else if key == "GENERAL.CONNECTION" && !value.is_empty() && value != "--" {
            device.connection = Some(value.to_string());
        } else if key.starts_with("IP4.ADDRESS") && device.ip.is_none() {
            let address = value.split('/').next().unwrap_or(value);
            if !address.is_empty() {
                device.ip = Some(address.to_string());
            }
        }
    }

    device
}

/// Splits a terse-mode line on unescaped colons.
fn split_terse(line: &str) -> Vec<String> {
    let mut fields = vec![String::new()];
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let (Some(next), Some(field)) = (chars.next(), fields.last_mut()) {
                    field.push(next);
                }
            }
            ':' => fields.push(String::new()),
            c => {
                if let Some(field) = fields.last_mut() {
                    field.push(c);
                }
            }
        }
    }

    fields
}

/// nmcli reports signal as a percentage
fn signal_to_rssi(percent: u8) -> i32 {
    i32::from(percent.min(100)) / 2 - 100
}

fn parse_scan_line(line: &str) -> Option<ScannedNetwork> {
    let fields = split_terse(line);
    let [ssid, signal, security] = fields.as_slice() else {
        return None;
    };
    if ssid.is_empty() {
        return None;
    }

    Some(ScannedNetwork {
        ssid: ssid.clone(),
        rssi: signal_to_rssi(signal.parse().ok()?),
        open: security.is_empty() || security == "--",
    })
}

fn parse_active_line(line: &str) -> Option<(String, u8)> {
    let fields = split_terse(line);
    let [active, ssid, signal] = fields.as_slice() else {
        return None;
    };
    if active != "yes" {
        return None;
    }
    Some((ssid.clone(), signal.parse().ok()?))
}
