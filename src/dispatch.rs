use log::{debug, warn};
use pool_common::{TimerCommand, Topics, ValveMode};

use crate::error::CommandError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PumpCommand {
    On,
    Off,
    Toggle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValveCommand {
    Set(ValveMode),
    Toggle,
}

/// A command received from the broker, already validated for shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Pump(PumpCommand),
    Valve(ValveCommand),
    /// `duration == 0` means stop
    Timer(TimerCommand),
    ClearCredentials,
}

/// Maps inbound topic/payload pairs onto commands.
pub struct CommandDispatcher {
    topics: Topics,
}

impl CommandDispatcher {
    pub fn new(topics: Topics) -> Self {
        Self { topics }
    }

    /// Messages on topics we don't own are dropped without a word;
    /// malformed payloads on our own topics are logged and dropped.
    pub fn parse(&self, topic: &str, payload: &[u8]) -> Option<Command> {
        match self.route(topic, payload) {
            Ok(command) => command,
            Err(e) => {
                warn!("dispatch: {}", e);
                None
            }
        }
    }

    fn route(&self, topic: &str, payload: &[u8]) -> Result<Option<Command>, CommandError> {
        let text = String::from_utf8_lossy(payload);
        let text = text.trim();

        let command = if topic == self.topics.pump_set {
            Command::Pump(parse_pump(text)?)
        } else if topic == self.topics.valve_set {
            Command::Valve(parse_valve(text)?)
        } else if topic == self.topics.timer_set {
            Command::Timer(parse_timer(text)?)
        } else if topic == self.topics.wifi_clear {
            // Any payload will do
            Command::ClearCredentials
        } else {
            debug!("dispatch: ignoring message on {}", topic);
            return Ok(None);
        };

        Ok(Some(command))
    }
}

fn parse_pump(verb: &str) -> Result<PumpCommand, CommandError> {
    match verb.to_ascii_uppercase().as_str() {
        "ON" | "1" => Ok(PumpCommand::On),
        "OFF" | "0" => Ok(PumpCommand::Off),
        "TOGGLE" => Ok(PumpCommand::Toggle),
        _ => Err(CommandError::UnknownVerb {
            target: "pump",
            verb: verb.to_string(),
        }),
    }
}

fn parse_valve(verb: &str) -> Result<ValveCommand, CommandError> {
    match verb.to_ascii_uppercase().as_str() {
        "1" => Ok(ValveCommand::Set(ValveMode::Mode1)),
        "2" => Ok(ValveCommand::Set(ValveMode::Mode2)),
        "TOGGLE" => Ok(ValveCommand::Toggle),
        _ => Err(CommandError::UnknownVerb {
            target: "valve",
            verb: verb.to_string(),
        }),
    }
}

fn parse_timer(payload: &str) -> Result<TimerCommand, CommandError> {
    TimerCommand::from_json(payload).map_err(|e| CommandError::MalformedTimer {
        payload: payload.to_string(),
        reason: e.to_string(),
    })
}
