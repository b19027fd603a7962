//! Typed inbound commands.
//!
//! The transport hands over a command name, its value and a bag of key/value
//! fields. Everything is validated here once so the friend and presence code
//! only ever sees well-formed ids.

use crate::error::{CommandKind, ProtocolError};
use crate::types::ProfileId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Command as decoded by the transport, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCommand {
    pub command: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub fields: HashMap<String, String>,
}

impl RawCommand {
    pub fn new(command: &str, value: &str) -> Self {
        Self {
            command: command.to_string(),
            value: value.to_string(),
            fields: HashMap::new(),
        }
    }

    pub fn field(mut self, key: &str, value: &str) -> Self {
        self.fields.insert(key.to_string(), value.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    AddFriend {
        new_profile_id: ProfileId,
    },
    DelFriend {
        del_profile_id: ProfileId,
    },
    AuthAdd {
        from_profile_id: ProfileId,
    },
    Status {
        code: String,
        stat_string: String,
        loc_string: String,
    },
}

impl Command {
    pub fn parse(raw: &RawCommand) -> Result<Self, ProtocolError> {
        match raw.command.as_str() {
            "addfriend" => Ok(Command::AddFriend {
                new_profile_id: profile_id_field(raw, "newprofileid", CommandKind::AddFriend)?,
            }),
            "delfriend" => Ok(Command::DelFriend {
                del_profile_id: profile_id_field(raw, "delprofileid", CommandKind::DelFriend)?,
            }),
            "authadd" => Ok(Command::AuthAdd {
                from_profile_id: profile_id_field(raw, "fromprofileid", CommandKind::AuthAdd)?,
            }),
            "status" => Ok(Command::Status {
                code: raw.value.clone(),
                stat_string: optional_field(raw, "statstring"),
                loc_string: optional_field(raw, "locstring"),
            }),
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Command::AddFriend { .. } => CommandKind::AddFriend,
            Command::DelFriend { .. } => CommandKind::DelFriend,
            Command::AuthAdd { .. } => CommandKind::AuthAdd,
            Command::Status { .. } => CommandKind::Status,
        }
    }
}

/// Unsigned decimal that fits in 32 bits. A missing field counts as malformed.
fn profile_id_field(
    raw: &RawCommand,
    key: &str,
    command: CommandKind,
) -> Result<ProfileId, ProtocolError> {
    let value = raw.fields.get(key).map(String::as_str).unwrap_or("");
    let invalid = || ProtocolError::InvalidProfileId {
        command,
        raw: value.to_string(),
    };

    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    value.parse::<ProfileId>().map_err(|_| invalid())
}

fn optional_field(raw: &RawCommand, key: &str) -> String {
    match raw.fields.get(key) {
        Some(value) => value.clone(),
        None => {
            warn!("Missing {} in {} command", key, raw.command);
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_friend_commands() {
        let add = RawCommand::new("addfriend", "").field("newprofileid", "200");
        assert_eq!(
            Command::parse(&add).unwrap(),
            Command::AddFriend { new_profile_id: 200 }
        );

        let del = RawCommand::new("delfriend", "").field("delprofileid", "4294967295");
        assert_eq!(
            Command::parse(&del).unwrap(),
            Command::DelFriend {
                del_profile_id: u32::MAX
            }
        );

        let auth = RawCommand::new("authadd", "").field("fromprofileid", "7");
        assert_eq!(Command::parse(&auth).unwrap().kind(), CommandKind::AuthAdd);
    }

    #[test]
    fn test_malformed_profile_ids() {
        for bad in ["", "-1", "+5", "12a", "4294967296", " 1"] {
            let raw = RawCommand::new("addfriend", "").field("newprofileid", bad);
            assert_eq!(
                Command::parse(&raw).unwrap_err(),
                ProtocolError::InvalidProfileId {
                    command: CommandKind::AddFriend,
                    raw: bad.to_string(),
                },
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_missing_field_is_parse_failure() {
        let raw = RawCommand::new("authadd", "");
        let err = Command::parse(&raw).unwrap_err();
        assert_eq!(err.code(), 0x0701);

        let raw = RawCommand::new("delfriend", "").field("newprofileid", "5");
        assert_eq!(Command::parse(&raw).unwrap_err().code(), 0x0A00);
    }

    #[test]
    fn test_status_fields_default_to_empty() {
        let raw = RawCommand::new("status", "1").field("statstring", "Racing");
        assert_eq!(
            Command::parse(&raw).unwrap(),
            Command::Status {
                code: "1".to_string(),
                stat_string: "Racing".to_string(),
                loc_string: String::new(),
            }
        );
    }

    #[test]
    fn test_unknown_command() {
        let raw = RawCommand::new("bm", "1");
        assert_eq!(
            Command::parse(&raw).unwrap_err(),
            ProtocolError::UnknownCommand("bm".to_string())
        );
    }
}
