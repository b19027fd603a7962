//! Friend list and presence daemon.
//!
//! The core lives in [`session_registry`] and [`friends`]; [`network`] is a
//! newline-delimited JSON transport that drives it over TCP.

pub mod config;
pub mod error;
pub mod friend_code;
pub mod friends;
pub mod message;
pub mod network;
pub mod session;
pub mod session_registry;
pub mod shutdown;
pub mod types;

pub use config::Config;
pub use error::{AppError, ProtocolError, RegistryError};
pub use friends::{Command, RawCommand};
pub use message::{BuddyMessage, BuddyMessageKind, Outbound};
pub use session::ConnectionLink;
pub use session_registry::{SessionRegistry, SessionSnapshot};
pub use types::{KickReason, LoginInfo, ProfileId, UnitCode};
