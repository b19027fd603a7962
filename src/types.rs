use serde::{Deserialize, Serialize};
use std::fmt;

/// 32-bit profile identifier assigned at account creation.
pub type ProfileId = u32;

/// Presence code a client sends while searching for public matches.
pub const STATUS_SEARCHING_PUBLIC: &str = "3";

/// Body of the legacy text authorization message (DS titles and a few Wii titles).
pub const LEGACY_AUTH_MESSAGE: &str = "I have authorized your request to add me to your list";

/// Presence payload sent to friends when a player goes away.
pub const OFFLINE_STATUS: &str = "|s|0|ss|Offline|ls||ip|0|p|0|qm|0";

/// Console family reported at login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum UnitCode {
    Ds,
    Wii,
    DsAndWii,
    Other(u8),
}

impl UnitCode {
    /// DS-family units only understand the legacy text authorization message.
    pub fn is_ds_family(self) -> bool {
        matches!(self, UnitCode::Ds | UnitCode::DsAndWii)
    }
}

impl From<u8> for UnitCode {
    fn from(value: u8) -> Self {
        match value {
            0x00 => UnitCode::Ds,
            0x01 => UnitCode::Wii,
            0xff => UnitCode::DsAndWii,
            other => UnitCode::Other(other),
        }
    }
}

impl From<UnitCode> for u8 {
    fn from(code: UnitCode) -> Self {
        match code {
            UnitCode::Ds => 0x00,
            UnitCode::Wii => 0x01,
            UnitCode::DsAndWii => 0xff,
            UnitCode::Other(other) => other,
        }
    }
}

/// Reason tag attached to a forced disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KickReason {
    Banned,
    Restricted,
    RestrictedJoin,
}

impl KickReason {
    pub fn as_str(self) -> &'static str {
        match self {
            KickReason::Banned => "banned",
            KickReason::Restricted => "restricted",
            KickReason::RestrictedJoin => "restricted_join",
        }
    }
}

impl fmt::Display for KickReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the transport knows about a player once login has succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginInfo {
    pub profile_id: ProfileId,
    pub game_name: String,
    pub game_code: String,
    #[serde(default = "default_unit_code")]
    pub unit_code: UnitCode,
    #[serde(default)]
    pub open_host: bool,
    #[serde(default)]
    pub restricted: bool,
    #[serde(default)]
    pub needs_exploit: bool,
}

fn default_unit_code() -> UnitCode {
    UnitCode::Wii
}

impl LoginInfo {
    pub fn new(profile_id: ProfileId, game_name: &str, game_code: &str) -> Self {
        Self {
            profile_id,
            game_name: game_name.to_string(),
            game_code: game_code.to_string(),
            unit_code: UnitCode::Wii,
            open_host: false,
            restricted: false,
            needs_exploit: false,
        }
    }

    pub fn with_open_host(mut self, open_host: bool) -> Self {
        self.open_host = open_host;
        self
    }

    pub fn with_unit_code(mut self, unit_code: UnitCode) -> Self {
        self.unit_code = unit_code;
        self
    }

    pub fn with_restricted(mut self, restricted: bool) -> Self {
        self.restricted = restricted;
        self
    }

    pub fn with_needs_exploit(mut self, needs_exploit: bool) -> Self {
        self.needs_exploit = needs_exploit;
        self
    }
}
