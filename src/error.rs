use thiserror::Error;

/// Failures joining the wireless link. Always transient from the
/// controller's point of view; the loop keeps retrying.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("credentials have an empty network identifier")]
    EmptyIdentifier,
    #[error("link driver refused the join: {0}")]
    Driver(String),
    #[error("not associated after {attempts} attempt(s)")]
    Exhausted { attempts: u32 },
}

/// Failures of the secure publish/subscribe channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("broker refused the session (rc={0})")]
    Refused(u8),
    #[error("timed out waiting for the broker to acknowledge")]
    Timeout,
    #[error("channel is not connected")]
    NotConnected,
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("credential storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("credential record is unreadable: {0}")]
    Corrupt(String),
}

/// Temperature sensor read failures. A fault skips one publish cycle.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SensorFault {
    #[error("sensor disconnected")]
    Disconnected,
    #[error("sensor reported a CRC mismatch")]
    Crc,
    #[error("sensor output unreadable: {0}")]
    Malformed(String),
}

/// Commands that were delivered but cannot be applied.
#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("unknown {target} command {verb:?}")]
    UnknownVerb { target: &'static str, verb: String },
    #[error("malformed timer payload {payload:?}: {reason}")]
    MalformedTimer { payload: String, reason: String },
}

#[derive(Debug, Error)]
pub enum RadioError {
    #[error("provisioning radio unavailable: {0}")]
    Unavailable(String),
}
