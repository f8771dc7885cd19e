//! Gridlink wire protocol.
//!
//! Every frame is a JSON text message with a `Cmd` tag and a `Data` payload:
//!
//! ```text
//! { "Cmd": "setled",         "Data": [x, y] }
//! { "Cmd": "levelMap",       "Data": [b0, b1, ..., b(N-1)] }
//! { "Cmd": "fromGridBuffer", "Data": [b0, b1, ..., b(N-1)] }
//! ```
//!
//! Unknown tags decode to [`Command::Unknown`] so receivers can skip them.

use serde::{Deserialize, Serialize};

use crate::error::{GridlinkError, Result};

pub const CMD_SET_LED: &str = "setled";
pub const CMD_LEVEL_MAP: &str = "levelMap";
pub const CMD_FROM_GRID_BUFFER: &str = "fromGridBuffer";

/// Close codes used by both ends of the socket.
pub mod close_code {
    /// Client finished its session.
    pub const NORMAL: u16 = 1000;
    /// Peer is going away; the only code that suppresses reconnection.
    pub const GOING_AWAY: u16 = 1001;
    /// Close frame without a status code.
    pub const NO_STATUS: u16 = 1005;
    /// Connection dropped without a close frame.
    pub const ABNORMAL: u16 = 1006;
    /// Subscriber could not keep up with the fan-out.
    pub const POLICY_VIOLATION: u16 = 1008;
}

/// A decoded wire frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Toggle one cell (client -> server).
    SetLed { x: usize, y: usize },
    /// Replace the whole grid (either direction).
    LevelMap(Vec<u8>),
    /// Full snapshot pushed by the server.
    FromGridBuffer(Vec<u8>),
    /// Any other tag. Carried only so it can be ignored.
    Unknown(String),
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "Cmd")]
    cmd: Option<String>,
    #[serde(rename = "Data", default)]
    data: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct WireFrame<'a, T: Serialize> {
    #[serde(rename = "Cmd")]
    cmd: &'a str,
    #[serde(rename = "Data")]
    data: T,
}

impl Command {
    /// Decode a text frame.
    ///
    /// Payload lengths are not checked here; the grid enforces them on apply.
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawFrame = serde_json::from_str(text)
            .map_err(|e| GridlinkError::MalformedFrame(e.to_string()))?;
        let cmd = raw
            .cmd
            .ok_or_else(|| GridlinkError::MalformedFrame("missing Cmd".into()))?;

        match cmd.as_str() {
            CMD_SET_LED => {
                let (x, y) = serde_json::from_value::<(usize, usize)>(raw.data).map_err(|e| {
                    GridlinkError::MalformedFrame(format!("setled Data must be [x, y]: {e}"))
                })?;
                Ok(Self::SetLed { x, y })
            }
            CMD_LEVEL_MAP => Ok(Self::LevelMap(levels(&cmd, raw.data)?)),
            CMD_FROM_GRID_BUFFER => Ok(Self::FromGridBuffer(levels(&cmd, raw.data)?)),
            _ => Ok(Self::Unknown(cmd)),
        }
    }

    /// The `Cmd` tag this command travels under.
    pub fn tag(&self) -> &str {
        match self {
            Self::SetLed { .. } => CMD_SET_LED,
            Self::LevelMap(_) => CMD_LEVEL_MAP,
            Self::FromGridBuffer(_) => CMD_FROM_GRID_BUFFER,
            Self::Unknown(tag) => tag.as_str(),
        }
    }

    /// Full-grid payload, if this command carries one.
    pub fn levels(&self) -> Option<&[u8]> {
        match self {
            Self::LevelMap(data) | Self::FromGridBuffer(data) => Some(data.as_slice()),
            _ => None,
        }
    }

    /// Encode as a JSON text frame.
    pub fn to_frame(&self) -> Result<String> {
        let tag = self.tag();
        let json = match self {
            Self::SetLed { x, y } => serde_json::to_string(&WireFrame {
                cmd: tag,
                data: [*x, *y],
            }),
            Self::LevelMap(data) | Self::FromGridBuffer(data) => {
                serde_json::to_string(&WireFrame { cmd: tag, data })
            }
            Self::Unknown(_) => serde_json::to_string(&WireFrame {
                cmd: tag,
                data: [0u8; 0],
            }),
        }?;
        Ok(json)
    }
}

fn levels(cmd: &str, data: serde_json::Value) -> Result<Vec<u8>> {
    serde_json::from_value::<Vec<u8>>(data)
        .map_err(|e| GridlinkError::MalformedFrame(format!("{cmd} Data must be a level array: {e}")))
}
