//! Provisioning radio bridged over a local socket.
//!
//! The GATT stack lives in a separate helper process that forwards each
//! central's writes and reads as text lines. One socket connection is one
//! radio client.
//!
//! Requests:
//!     write <attribute> <value>   -> ok | err <reason>
//!     read <attribute>            -> value <attribute> <value> | err <reason>
//! Pushed to every client when an attribute notifies:
//!     notify <attribute> <value>

use std::{
    collections::{HashMap, VecDeque},
    io::{ErrorKind, Read, Write},
};

use interprocess::local_socket::{LocalSocketListener, LocalSocketStream};
use log::{debug, info, warn};
use pool_common::Attribute;

use super::{ProvisioningRadio, RadioEvent};
use crate::error::RadioError;

/// Longest request line a client may send
const MAX_LINE: usize = 400;

struct Client {
    stream: LocalSocketStream,
    buffer: Vec<u8>,
}

pub struct SocketRadio {
    path: String,
    listener: Option<LocalSocketListener>,
    clients: Vec<Client>,
    table: HashMap<Attribute, Vec<u8>>,
    events: VecDeque<RadioEvent>,
}

impl SocketRadio {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            listener: None,
            clients: Vec::new(),
            table: HashMap::new(),
            events: VecDeque::new(),
        }
    }

    fn accept_clients(&mut self) {
        let Some(listener) = self.listener.as_ref() else {
            return;
        };

        loop {
            match listener.accept() {
                Ok(stream) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        warn!("provisioning: dropping client: {}", e);
                        continue;
                    }
                    self.clients.push(Client {
                        stream,
                        buffer: Vec::new(),
                    });
                    self.events.push_back(RadioEvent::ClientConnected);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("provisioning: accept failed: {}", e);
                    break;
                }
            }
        }
    }

    fn read_clients(&mut self) {
        let mut closed = Vec::new();

        for (index, client) in self.clients.iter_mut().enumerate() {
            let mut chunk = [0u8; 256];
            let mut open = true;
            while client.buffer.len() <= MAX_LINE {
                match client.stream.read(&mut chunk) {
                    Ok(0) => {
                        open = false;
                        break;
                    }
                    Ok(n) => client.buffer.extend_from_slice(&chunk[..n]),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) => {
                        debug!("provisioning: client read failed: {}", e);
                        open = false;
                        break;
                    }
                }
            }

            match drain_lines(&mut client.buffer) {
                Some(lines) => {
                    for line in lines {
                        let reply = handle_line(&line, &mut self.table, &mut self.events);
                        if let Err(e) = client.stream.write_all(format!("{}\n", reply).as_bytes()) {
                            debug!("provisioning: reply failed: {}", e);
                        }
                    }
                }
                None => {
                    warn!("provisioning: client sent a line over {} bytes, dropping it", MAX_LINE);
                    open = false;
                }
            }

            if !open {
                closed.push(index);
            }
        }

        for index in closed.into_iter().rev() {
            self.clients.remove(index);
            self.events.push_back(RadioEvent::ClientDisconnected);
        }
    }
}

/// Split off every complete line. `None` once a line, finished or not,
/// runs past `MAX_LINE`.
fn drain_lines(buffer: &mut Vec<u8>) -> Option<Vec<String>> {
    let mut lines = Vec::new();

    while let Some(end) = buffer.iter().position(|b| *b == b'\n') {
        let line: Vec<u8> = buffer.drain(..=end).collect();
        let line = String::from_utf8_lossy(&line);
        let line = line.trim_end_matches(['\r', '\n']);
        if line.len() > MAX_LINE {
            return None;
        }
        lines.push(line.to_string());
    }

    if buffer.len() > MAX_LINE {
        return None;
    }
    Some(lines)
}

fn handle_line(
    line: &str,
    table: &mut HashMap<Attribute, Vec<u8>>,
    events: &mut VecDeque<RadioEvent>,
) -> String {
    let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
    let (name, value) = rest.split_once(' ').unwrap_or((rest, ""));

    let Some(attribute) = Attribute::parse(name) else {
        return format!("err unknown attribute {:?}", name);
    };

    match verb {
        "write" => {
            if attribute == Attribute::Status {
                return "err read-only".to_string();
            }
            if attribute != Attribute::Networks {
                table.insert(attribute, value.as_bytes().to_vec());
            }
            events.push_back(RadioEvent::Write {
                attribute,
                value: value.as_bytes().to_vec(),
            });
            "ok".to_string()
        }
        "read" => {
            if !attribute.readable() {
                return "err write-only".to_string();
            }
            events.push_back(RadioEvent::Read { attribute });
            let value = table.get(&attribute).map(Vec::as_slice).unwrap_or_default();
            format!(
                "value {} {}",
                attribute.name(),
                String::from_utf8_lossy(value)
            )
        }
        _ => format!("err unknown request {:?}", verb),
    }
}

impl ProvisioningRadio for SocketRadio {
    fn start(&mut self, name: &str) -> Result<(), RadioError> {
        // Make sure a stale socket from a previous run is gone
        std::fs::remove_file(&self.path).ok();

        let listener = LocalSocketListener::bind(self.path.as_str())
            .map_err(|e| RadioError::Unavailable(format!("bind {}: {}", self.path, e)))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| RadioError::Unavailable(e.to_string()))?;

        info!("provisioning: bridge for {:?} listening on {}", name, self.path);
        self.listener = Some(listener);
        self.table.clear();
        self.events.clear();
        Ok(())
    }

    fn stop(&mut self) {
        self.clients.clear();
        self.events.clear();
        if self.listener.take().is_some() {
            std::fs::remove_file(&self.path).ok();
        }
    }

    fn restart_advertising(&mut self) {
        // The listener keeps accepting; nothing to re-arm
        debug!("provisioning: advertising");
    }

    fn poll_event(&mut self) -> Option<RadioEvent> {
        if self.events.is_empty() && self.listener.is_some() {
            self.accept_clients();
            self.read_clients();
        }
        self.events.pop_front()
    }

    fn update(&mut self, attribute: Attribute, value: &[u8], notify: bool) {
        self.table.insert(attribute, value.to_vec());
        if !notify {
            return;
        }

        let line = format!(
            "notify {} {}\n",
            attribute.name(),
            String::from_utf8_lossy(value)
        );
        for client in self.clients.iter_mut() {
            if let Err(e) = client.stream.write_all(line.as_bytes()) {
                debug!("provisioning: notify failed: {}", e);
            }
        }
    }
}
