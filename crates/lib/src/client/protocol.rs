//! saged wire protocol: `{ "cmd", "args" }` envelopes, typed commands and events.
//!
//! The same envelope shape is used in both directions. Outbound `lighting_group_on`/`_off`
//! wrap the address list once (`args: [[ga, ...]]`) while `get_light_states` sends it flat
//! (`args: [ga, ...]`); the server depends on both shapes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Numeric identifier of one lighting group on the bus. Not range-checked.
pub type GroupAddress = u32;

/// Unit address that originated an event; `None` when another client sent the command.
pub type SourceAddress = Option<u32>;

/// Brightness fraction, nominally 0.0..=1.0. Passed through unchanged.
pub type Level = f64;

/// Snapshot of group levels, as carried by `light_states`.
pub type LightStates = BTreeMap<GroupAddress, Level>;

pub const CMD_LIGHTING_GROUP_ON: &str = "lighting_group_on";
pub const CMD_LIGHTING_GROUP_OFF: &str = "lighting_group_off";
pub const CMD_LIGHTING_GROUP_RAMP: &str = "lighting_group_ramp";
pub const CMD_LIGHTING_GROUP_TERMINATE_RAMP: &str = "lighting_group_terminate_ramp";
pub const CMD_GET_LIGHT_STATES: &str = "get_light_states";
pub const CMD_LIGHT_STATES: &str = "light_states";

/// Wire frame: `{ "cmd": name, "args": [...] }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub cmd: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("bad arguments for {cmd}: {source}")]
    BadArgs {
        cmd: String,
        source: serde_json::Error,
    },
}

/// Command sent from the client to saged.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    LightingGroupOn(Vec<GroupAddress>),
    LightingGroupOff(Vec<GroupAddress>),
    LightingGroupRamp {
        group: GroupAddress,
        duration: u32,
        level: Level,
    },
    LightingGroupTerminateRamp(GroupAddress),
    GetLightStates(Vec<GroupAddress>),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::LightingGroupOn(_) => CMD_LIGHTING_GROUP_ON,
            Command::LightingGroupOff(_) => CMD_LIGHTING_GROUP_OFF,
            Command::LightingGroupRamp { .. } => CMD_LIGHTING_GROUP_RAMP,
            Command::LightingGroupTerminateRamp(_) => CMD_LIGHTING_GROUP_TERMINATE_RAMP,
            Command::GetLightStates(_) => CMD_GET_LIGHT_STATES,
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        let args = match self {
            Command::LightingGroupOn(groups) | Command::LightingGroupOff(groups) => {
                vec![json!(groups)]
            }
            Command::LightingGroupRamp {
                group,
                duration,
                level,
            } => vec![json!(group), json!(duration), json!(level)],
            Command::LightingGroupTerminateRamp(group) => vec![json!(group)],
            Command::GetLightStates(groups) => groups.iter().map(|g| json!(g)).collect(),
        };
        Envelope {
            cmd: self.name().to_string(),
            args,
        }
    }

    /// Serialize to one JSON text frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_envelope())
    }
}

/// Event pushed by saged to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    LightingGroupOn {
        source: SourceAddress,
        groups: Vec<GroupAddress>,
    },
    LightingGroupOff {
        source: SourceAddress,
        groups: Vec<GroupAddress>,
    },
    LightingGroupRamp {
        source: SourceAddress,
        group: GroupAddress,
        duration: u32,
        level: Level,
    },
    LightStates(LightStates),
}

impl Event {
    /// Parse one inbound text frame.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(frame)?;
        Self::from_envelope(envelope)
    }

    pub fn from_envelope(envelope: Envelope) -> Result<Self, ProtocolError> {
        let Envelope { cmd, args } = envelope;
        match cmd.as_str() {
            CMD_LIGHTING_GROUP_ON => {
                let (source, groups): (SourceAddress, Vec<GroupAddress>) =
                    decode_args(&cmd, args)?;
                Ok(Event::LightingGroupOn { source, groups })
            }
            CMD_LIGHTING_GROUP_OFF => {
                let (source, groups): (SourceAddress, Vec<GroupAddress>) =
                    decode_args(&cmd, args)?;
                Ok(Event::LightingGroupOff { source, groups })
            }
            CMD_LIGHTING_GROUP_RAMP => {
                let (source, group, duration, level): (SourceAddress, GroupAddress, u32, Level) =
                    decode_args(&cmd, args)?;
                Ok(Event::LightingGroupRamp {
                    source,
                    group,
                    duration,
                    level,
                })
            }
            CMD_LIGHT_STATES => {
                let (states,): (LightStates,) = decode_args(&cmd, args)?;
                Ok(Event::LightStates(states))
            }
            _ => Err(ProtocolError::UnknownCommand(cmd)),
        }
    }
}

/// Positional args deserialize as a tuple, so the arity must match exactly.
fn decode_args<T: DeserializeOwned>(cmd: &str, args: Vec<Value>) -> Result<T, ProtocolError> {
    serde_json::from_value(Value::Array(args)).map_err(|source| ProtocolError::BadArgs {
        cmd: cmd.to_string(),
        source,
    })
}
