use crate::types::{KickReason, ProfileId, LEGACY_AUTH_MESSAGE, OFFLINE_STATUS};
use serde::{Deserialize, Serialize};

/// Sub-type of a buddy message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum BuddyMessageKind {
    /// Plain text "I have authorized..." understood by older titles.
    LegacyAuth,
    /// Friendship became mutual.
    BuddyAuth,
    /// Presence update.
    Status,
}

impl From<BuddyMessageKind> for u32 {
    fn from(kind: BuddyMessageKind) -> Self {
        match kind {
            BuddyMessageKind::LegacyAuth => 1,
            BuddyMessageKind::BuddyAuth => 4,
            BuddyMessageKind::Status => 100,
        }
    }
}

impl TryFrom<u32> for BuddyMessageKind {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(BuddyMessageKind::LegacyAuth),
            4 => Ok(BuddyMessageKind::BuddyAuth),
            100 => Ok(BuddyMessageKind::Status),
            other => Err(format!("unknown buddy message type {}", other)),
        }
    }
}

/// `bm` envelope: sub-type, sender and payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuddyMessage {
    pub kind: BuddyMessageKind,
    pub from: ProfileId,
    pub msg: String,
}

impl BuddyMessage {
    pub fn buddy_auth(from: ProfileId) -> Self {
        Self {
            kind: BuddyMessageKind::BuddyAuth,
            from,
            msg: String::new(),
        }
    }

    pub fn legacy_auth(from: ProfileId) -> Self {
        Self {
            kind: BuddyMessageKind::LegacyAuth,
            from,
            msg: LEGACY_AUTH_MESSAGE.to_string(),
        }
    }

    pub fn status(from: ProfileId, status: &str) -> Self {
        Self {
            kind: BuddyMessageKind::Status,
            from,
            msg: status.to_string(),
        }
    }

    pub fn offline(from: ProfileId) -> Self {
        Self::status(from, OFFLINE_STATUS)
    }

    pub fn is_offline(&self) -> bool {
        self.kind == BuddyMessageKind::Status && self.msg == OFFLINE_STATUS
    }
}

/// What the registry hands to a connection's outbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Write this message now.
    Message(BuddyMessage),
    /// The session's write buffer has new messages; drain and write them.
    Flush,
    /// Close the connection; the transport logs the session out.
    Kick(KickReason),
}

/// Legacy presence payload for a status update.
pub fn status_payload(code: &str, statstring: &str, locstring: &str) -> String {
    format!(
        "|s|{}|ss|{}|ls|{}|ip|0|p|0|qm|0",
        code, statstring, locstring
    )
}
