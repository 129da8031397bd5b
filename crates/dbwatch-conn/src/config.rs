//! Plugin configuration: defaults, named sessions and validation.
//!
//! Parsed from TOML:
//!
//! ```toml
//! uri = "tcp(localhost:3306)/"
//! user = "root"
//! password = "secret"
//! timeout = 5
//! keep_alive = 300
//!
//! [sessions.primary]
//! uri = "tcp(db1:3306)/"
//! user = "monitor"
//! password = "pw"
//!
//! [kill_detection]
//! error_codes = [1927]
//! message_patterns = ["connection was killed"]
//! ```

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classifier::KillClassifier;
use crate::identity::parse_address;

/// Maximum accepted password length, in characters.
pub const MAX_AUTH_PASS_LEN: usize = 512;

pub const DEFAULT_URI: &str = "tcp(localhost:3306)/";
pub const DEFAULT_USER: &str = "root";

/// Agent-wide request timeout used when the plugin does not set its own.
pub const DEFAULT_GLOBAL_TIMEOUT_SECS: u64 = 3;
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 300;

pub const TIMEOUT_RANGE: RangeInclusive<u64> = 1..=30;
pub const KEEP_ALIVE_RANGE: RangeInclusive<u64> = 60..=900;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("password cannot be longer than {} characters", MAX_AUTH_PASS_LEN)]
    PasswordTooLong,

    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: u64,
        max: u64,
        value: u64,
    },

    #[error("invalid default uri: {0}")]
    Address(String),

    #[error("invalid parameters for session '{session}': {reason}")]
    Session { session: String, reason: String },

    #[error("invalid kill-detection pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// A named set of connection settings. Empty fields fall back to the
/// plugin-wide defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Session {
    pub uri: String,
    pub user: String,
    pub password: String,
}

/// How to recognise a connection the server has terminated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KillDetectionConfig {
    /// MySQL error numbers meaning the session is gone.
    pub error_codes: Vec<u16>,
    /// Case-insensitive regular expressions matched against the error message.
    pub message_patterns: Vec<String>,
}

impl Default for KillDetectionConfig {
    fn default() -> Self {
        Self {
            // ER_CONNECTION_KILLED, CR_SERVER_GONE_ERROR, CR_SERVER_LOST
            error_codes: vec![1927, 2006, 2013],
            message_patterns: vec![
                "connection was killed".to_string(),
                "server has gone away".to_string(),
                "lost connection to (mysql )?server".to_string(),
                "invalid connection".to_string(),
            ],
        }
    }
}

/// Plugin-wide options.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PluginOptions {
    /// Default connection string.
    pub uri: String,
    /// Default user.
    pub user: String,
    /// Default password.
    pub password: String,
    /// Request timeout in seconds. Falls back to the agent-wide timeout.
    pub timeout: Option<u64>,
    /// Seconds an unused connection is kept before it is closed.
    pub keep_alive: u64,
    /// Pre-defined named connection settings.
    pub sessions: BTreeMap<String, Session>,
    pub kill_detection: KillDetectionConfig,
}

impl Default for PluginOptions {
    fn default() -> Self {
        Self {
            uri: DEFAULT_URI.to_string(),
            user: DEFAULT_USER.to_string(),
            password: String::new(),
            timeout: None,
            keep_alive: DEFAULT_KEEP_ALIVE_SECS,
            sessions: BTreeMap::new(),
            kill_detection: KillDetectionConfig::default(),
        }
    }
}

impl PluginOptions {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply agent-level defaults: a missing timeout takes the global one and
    /// empty session fields take the plugin defaults.
    pub fn configure(mut self, global_timeout: u64) -> Self {
        if self.timeout.is_none() {
            self.timeout = Some(global_timeout);
        }
        for session in self.sessions.values_mut() {
            if session.uri.is_empty() {
                session.uri = self.uri.clone();
            }
            if session.user.is_empty() {
                session.user = self.user.clone();
            }
            if session.password.is_empty() {
                session.password = self.password.clone();
            }
        }
        self
    }

    /// Reject configurations that could never produce a working connection.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if exceeds_pass_len(&self.password) {
            return Err(ConfigError::PasswordTooLong);
        }
        if let Some(timeout) = self.timeout {
            check_range("timeout", timeout, &TIMEOUT_RANGE)?;
        }
        check_range("keep_alive", self.keep_alive, &KEEP_ALIVE_RANGE)?;

        parse_address(&self.uri).map_err(|e| ConfigError::Address(e.to_string()))?;

        for (name, session) in &self.sessions {
            let uri = if session.uri.is_empty() { &self.uri } else { &session.uri };
            parse_address(uri).map_err(|e| ConfigError::Session {
                session: name.clone(),
                reason: e.to_string(),
            })?;
            if exceeds_pass_len(&session.password) {
                return Err(ConfigError::Session {
                    session: name.clone(),
                    reason: format!("password cannot be longer than {MAX_AUTH_PASS_LEN} characters"),
                });
            }
        }

        self.kill_classifier()?;
        Ok(())
    }

    /// Per-request timeout applied to every network operation.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.unwrap_or(DEFAULT_GLOBAL_TIMEOUT_SECS))
    }

    /// Budget for opening a link and for each read on it: one second less
    /// than the request timeout, so the client gives up before the caller.
    pub fn link_timeout(&self) -> Duration {
        let secs = self.timeout.unwrap_or(DEFAULT_GLOBAL_TIMEOUT_SECS);
        Duration::from_secs(secs.saturating_sub(1).max(1))
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive)
    }

    pub fn kill_classifier(&self) -> Result<KillClassifier, ConfigError> {
        Ok(KillClassifier::new(
            self.kill_detection.error_codes.iter().copied(),
            &self.kill_detection.message_patterns,
        )?)
    }
}

fn exceeds_pass_len(password: &str) -> bool {
    password.chars().count() > MAX_AUTH_PASS_LEN
}

fn check_range(
    field: &'static str,
    value: u64,
    range: &RangeInclusive<u64>,
) -> Result<(), ConfigError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            min: *range.start(),
            max: *range.end(),
            value,
        })
    }
}
