use crate::types::ProfileId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config serialization error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

/// Inbound command that produced a protocol error. Selects the legacy error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    AddFriend,
    DelFriend,
    AuthAdd,
    Status,
}

impl CommandKind {
    pub fn name(self) -> &'static str {
        match self {
            CommandKind::AddFriend => "addfriend",
            CommandKind::DelFriend => "delfriend",
            CommandKind::AuthAdd => "authadd",
            CommandKind::Status => "status",
        }
    }
}

/// Errors reported back to the client that issued the command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("{}: invalid profile id {raw:?}", .command.name())]
    InvalidProfileId { command: CommandKind, raw: String },

    #[error("cannot add self ({0}) as a friend")]
    SelfAddNotAllowed(ProfileId),

    #[error("{0} has not requested authorization")]
    AuthorizationNotPending(ProfileId),

    #[error("unknown command {0:?}")]
    UnknownCommand(String),
}

impl ProtocolError {
    /// Legacy numeric error code understood by the console SDK.
    pub fn code(&self) -> u32 {
        match self {
            ProtocolError::InvalidProfileId { command, .. } => match command {
                CommandKind::AddFriend => 0x0600,
                CommandKind::DelFriend => 0x0A00,
                CommandKind::AuthAdd => 0x0701,
                CommandKind::Status => 0x0800,
            },
            ProtocolError::SelfAddNotAllowed(_) => 0x0602,
            ProtocolError::AuthorizationNotPending(_) => 0x0701,
            ProtocolError::UnknownCommand(_) => 0x0100,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("profile {0} is already logged in")]
    AlreadyLoggedIn(ProfileId),

    #[error("profile {0} is not logged in")]
    NotLoggedIn(ProfileId),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl RegistryError {
    pub fn code(&self) -> u32 {
        match self {
            RegistryError::AlreadyLoggedIn(_) => 0x0101,
            RegistryError::NotLoggedIn(_) => 0x0002,
            RegistryError::Protocol(err) => err.code(),
        }
    }
}
