use std::{
    fs,
    path::Path,
    time::{Duration, Instant},
};

use anyhow::{Context, Error};
use log::{debug, info, warn};
use rumqttc::{
    Client, ConnectReturnCode, Connection, ConnectionError, Event, LastWill, MqttOptions,
    Outgoing, Packet, QoS, RecvTimeoutError, Transport,
};

use super::{ChannelTransport, ConnectOptions, InboundMessage};
use crate::error::ChannelError;

/// How long a single `poll` may spend draining the event loop
const POLL_SLICE: Duration = Duration::from_millis(5);
const REQUEST_CAPACITY: usize = 32;

/// Synchronous rumqttc session. A dropped connection is never resumed in
/// the background; the controller decides when to connect again.
pub struct MqttTransport {
    host: String,
    port: u16,
    ca: Option<Vec<u8>>,
    ack_timeout: Duration,
    client: Option<Client>,
    connection: Option<Connection>,
}

impl MqttTransport {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        ca_cert: Option<&Path>,
        ack_timeout: Duration,
    ) -> Result<Self, Error> {
        let ca = match ca_cert {
            Some(path) => Some(
                fs::read(path).with_context(|| format!("reading CA {}", path.display()))?,
            ),
            None => None,
        };
        if ca.is_none() {
            warn!("session: no CA configured, broker traffic is unencrypted");
        }

        Ok(Self {
            host: host.into(),
            port,
            ca,
            ack_timeout,
            client: None,
            connection: None,
        })
    }

    fn drop_session(&mut self) {
        self.client = None;
        self.connection = None;
    }
}

fn return_code(code: ConnectReturnCode) -> u8 {
    match code {
        ConnectReturnCode::Success => 0,
        ConnectReturnCode::RefusedProtocolVersion => 1,
        ConnectReturnCode::BadClientId => 2,
        ConnectReturnCode::ServiceUnavailable => 3,
        ConnectReturnCode::BadUserNamePassword => 4,
        ConnectReturnCode::NotAuthorized => 5,
    }
}

impl ChannelTransport for MqttTransport {
    fn connect(&mut self, options: &ConnectOptions) -> Result<(), ChannelError> {
        self.drop_session();

        let mut mqtt = MqttOptions::new(&options.client_id, &self.host, self.port);
        mqtt.set_keep_alive(options.keep_alive);
        mqtt.set_clean_session(true);
        if let (Some(username), Some(password)) = (&options.username, &options.password) {
            mqtt.set_credentials(username, password);
        }
        mqtt.set_last_will(LastWill::new(
            &options.last_will.topic,
            options.last_will.payload.clone(),
            QoS::AtMostOnce,
            options.last_will.retain,
        ));
        if let Some(ca) = &self.ca {
            mqtt.set_transport(Transport::tls(ca.clone(), None, None));
        }

        info!("session: dialing {}:{}", self.host, self.port);
        let (client, mut connection) = Client::new(mqtt, REQUEST_CAPACITY);
        let deadline = Instant::now() + self.ack_timeout;

        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(ChannelError::Timeout);
            }

            match connection.recv_timeout(left) {
                Ok(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(ChannelError::Refused(return_code(ack.code)));
                    }
                    self.client = Some(client);
                    self.connection = Some(connection);
                    return Ok(());
                }
                Ok(Ok(event)) => debug!("session: {:?}", event),
                Ok(Err(ConnectionError::ConnectionRefused(code))) => {
                    return Err(ChannelError::Refused(return_code(code)))
                }
                Ok(Err(e)) => return Err(ChannelError::Transport(e.to_string())),
                Err(RecvTimeoutError::Timeout) => return Err(ChannelError::Timeout),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ChannelError::Transport("event loop closed".to_string()))
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), ChannelError> {
        let client = self.client.as_mut().ok_or(ChannelError::NotConnected)?;
        client
            .try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| ChannelError::Transport(e.to_string()))
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), ChannelError> {
        let client = self.client.as_mut().ok_or(ChannelError::NotConnected)?;
        client
            .try_publish(topic, QoS::AtMostOnce, retain, payload.to_vec())
            .map_err(|e| ChannelError::Transport(e.to_string()))
    }

    fn poll(&mut self) -> Vec<InboundMessage> {
        let mut inbound = Vec::new();
        let Some(connection) = self.connection.as_mut() else {
            return inbound;
        };

        let mut lost = false;
        loop {
            match connection.recv_timeout(POLL_SLICE) {
                Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                    inbound.push(InboundMessage {
                        topic: publish.topic.clone(),
                        payload: publish.payload.to_vec(),
                    });
                }
                Ok(Ok(Event::Incoming(Packet::Disconnect))) => {
                    warn!("session: broker closed the session");
                    lost = true;
                    break;
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    warn!("session: {}", e);
                    lost = true;
                    break;
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    lost = true;
                    break;
                }
            }
        }

        if lost {
            self.drop_session();
        }
        inbound
    }

    fn disconnect(&mut self) {
        if let Some(client) = self.client.as_mut() {
            if let Err(e) = client.try_disconnect() {
                debug!("session: disconnect request failed: {}", e);
            }
        }

        // Flush queued publishes and the disconnect itself
        if let Some(connection) = self.connection.as_mut() {
            for _ in 0..20 {
                match connection.recv_timeout(Duration::from_millis(50)) {
                    Ok(Ok(Event::Outgoing(Outgoing::Disconnect))) => break,
                    Ok(Ok(_)) => {}
                    _ => break,
                }
            }
        }

        self.drop_session();
    }
}
