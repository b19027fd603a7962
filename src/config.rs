//! Configuration management for the presence daemon.
//!
//! The daemon reads a single TOML file (`presenced.toml` by default). Every
//! section is optional; missing sections and keys fall back to the values in
//! `Config::default()`. On first run the defaults are written out so the file
//! is ready to edit.

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 29900;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Connections beyond this are accepted and closed immediately.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_max_connections() -> usize {
    4096
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            max_connections: default_max_connections(),
        }
    }
}

impl ServerConfig {
    pub fn full_listen_address(&self) -> String {
        if self.listen_address.contains(':') {
            self.listen_address.clone()
        } else {
            format!("{}:{}", self.listen_address, DEFAULT_PORT)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Title-specific behaviour of the friend and presence layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Game code prefix of the title whose clients overflow on long locstrings.
    #[serde(default = "default_vulnerable_game_prefix")]
    pub vulnerable_game_prefix: String,
    /// Longest locstring (bytes) still delivered to a vulnerable client.
    #[serde(default = "default_max_locstring_len")]
    pub max_locstring_len: usize,
    /// Wii titles that, like DS titles, expect the legacy text authorization.
    #[serde(default = "default_legacy_auth_games")]
    pub legacy_auth_games: Vec<String>,
}

fn default_vulnerable_game_prefix() -> String {
    "RMC".to_string()
}

fn default_max_locstring_len() -> usize {
    0x14
}

fn default_legacy_auth_games() -> Vec<String> {
    vec![
        "jissenpachwii".to_string(),
        "drmariowii".to_string(),
        "pokebattlewii".to_string(),
    ]
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            vulnerable_game_prefix: default_vulnerable_game_prefix(),
            max_locstring_len: default_max_locstring_len(),
            legacy_auth_games: default_legacy_auth_games(),
        }
    }
}

/// Per-connection command limits: command name -> (window seconds, max commands).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limits")]
    pub limits: HashMap<String, (u64, u32)>,
}

fn default_rate_limits() -> HashMap<String, (u64, u32)> {
    [
        ("addfriend".to_string(), (10, 20)),
        ("delfriend".to_string(), (10, 20)),
        ("authadd".to_string(), (10, 20)),
        ("status".to_string(), (1, 10)),
        ("open_host".to_string(), (10, 5)),
        ("general".to_string(), (1, 20)),
    ]
    .into()
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limits: default_rate_limits(),
        }
    }
}

impl RateLimitConfig {
    pub fn windows(&self) -> HashMap<String, (Duration, u32)> {
        self.limits
            .iter()
            .map(|(key, (secs, max))| (key.clone(), (Duration::from_secs(*secs), *max)))
            .collect()
    }
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, writing the defaults there first if it does not exist.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load_from_file(path)
        } else {
            let config = Config::default();
            config.save_to_file(path)?;
            Ok(config)
        }
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), AppError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.presence.vulnerable_game_prefix.is_empty() {
            return Err(AppError::Config(
                "presence.vulnerable_game_prefix must not be empty".to_string(),
            ));
        }
        if self.server.max_connections == 0 {
            return Err(AppError::Config(
                "server.max_connections must be at least 1".to_string(),
            ));
        }
        if let Some((name, _)) = self
            .rate_limits
            .limits
            .iter()
            .find(|(_, (secs, max))| *secs == 0 || *max == 0)
        {
            return Err(AppError::Config(format!(
                "rate_limits.{} needs a non-zero window and count",
                name
            )));
        }
        Ok(())
    }
}
