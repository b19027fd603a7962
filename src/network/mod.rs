//! JSON-lines transport over TCP.
//!
//! One task per connection. The first line must be a login; after that the
//! task multiplexes client commands with the session's outbound queue.

pub mod message;
pub mod rate_limiter;
pub mod server;

pub use message::{ClientMessage, ServerMessage};
pub use server::PresenceServer;
