//! Friend code boundary.
//!
//! The arithmetic that turns a profile id and a game id into a friend code
//! lives outside this crate. The registry only uses codes for log lines, so
//! the source is optional and defaults to one that knows nothing.

use crate::types::ProfileId;

pub trait FriendCodeSource: Send + Sync {
    /// Friend code for `profile_id` in the title identified by `game_id`
    /// (the first four characters of the game code).
    fn friend_code(&self, profile_id: ProfileId, game_id: &str) -> Option<u64>;
}

/// Used when no friend code implementation has been wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFriendCodes;

impl FriendCodeSource for NoFriendCodes {
    fn friend_code(&self, _profile_id: ProfileId, _game_id: &str) -> Option<u64> {
        None
    }
}

/// Render a friend code the way consoles show it: zero padded to 12 digits,
/// grouped by four (`0000-0000-0100`).
pub fn format_friend_code(code: u64) -> String {
    let digits = format!("{:012}", code);
    let mut formatted = String::with_capacity(digits.len() + digits.len() / 4);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && i % 4 == 0 {
            formatted.push('-');
        }
        formatted.push(c);
    }
    formatted
}

/// Friend code for log lines, `-` when unavailable.
pub fn describe(source: &dyn FriendCodeSource, profile_id: ProfileId, game_code: &str) -> String {
    let game_id = game_code.get(..4).unwrap_or(game_code);
    source
        .friend_code(profile_id, game_id)
        .map(format_friend_code)
        .unwrap_or_else(|| "-".to_string())
}
