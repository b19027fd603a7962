//! Wire messages of the JSON-lines transport.

use crate::error::RegistryError;
use crate::friends::RawCommand;
use crate::message::BuddyMessage;
use crate::types::{KickReason, LoginInfo, ProfileId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Must be the first line on a connection.
    Login(LoginInfo),
    Command(RawCommand),
    OpenHost { enabled: bool },
    Logout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    LoggedIn { profile_id: ProfileId },
    Bm(BuddyMessage),
    Error { code: u32, message: String },
    Kicked { reason: KickReason },
}

impl From<BuddyMessage> for ServerMessage {
    fn from(message: BuddyMessage) -> Self {
        ServerMessage::Bm(message)
    }
}

impl From<&RegistryError> for ServerMessage {
    fn from(err: &RegistryError) -> Self {
        ServerMessage::Error {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// One line of output, newline included.
pub fn encode_line(message: &ServerMessage) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}
