pub mod command;
pub mod open_host;
pub mod presence;
pub mod protocol;

pub use command::{Command, RawCommand};
pub use open_host::OpenHostMode;
pub use presence::{NoPresenceHook, PresenceBroadcaster, PresenceHook};
pub use protocol::FriendshipProtocol;
