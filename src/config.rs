//! Process settings.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::recorder::DEFAULT_LOG_CAPACITY;

/// Default timeout for door-open commands.
pub const DEFAULT_DOOR_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for identity directory requests.
pub const DEFAULT_IDENTITY_TIMEOUT: Duration = Duration::from_secs(5);

const ENV_PREFIX: &str = "DOOR_ACCESS_";

/// Settings for running the engine as a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Directory holding the four collection files.
    pub data_dir: PathBuf,
    /// Socket address the HTTP API binds to.
    pub bind_addr: String,
    /// Number of access log entries retained (default: 1000).
    pub log_capacity: usize,
    /// Door-open request timeout (default: 5 s).
    pub door_timeout: Duration,
    /// Path appended to a door's endpoint for the open command.
    pub door_unlock_path: String,
    /// Identity directory URL. Empty disables verification.
    pub identity_url: String,
    pub identity_user: String,
    pub identity_key: String,
    /// Identity request timeout (default: 5 s).
    pub identity_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("Data/door_access"),
            bind_addr: "0.0.0.0:8000".into(),
            log_capacity: DEFAULT_LOG_CAPACITY,
            door_timeout: DEFAULT_DOOR_TIMEOUT,
            door_unlock_path: "/unlock".into(),
            identity_url: String::new(),
            identity_user: String::new(),
            identity_key: String::new(),
            identity_timeout: DEFAULT_IDENTITY_TIMEOUT,
        }
    }
}

impl Settings {
    /// Reads `DOOR_ACCESS_*` environment variables over the defaults.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` for malformed numeric values.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from an arbitrary key lookup.
    ///
    /// Keys are the full variable names, e.g. `DOOR_ACCESS_DATA_DIR`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let mut settings = Self::default();

        if let Some(value) = get("DATA_DIR") {
            settings.data_dir = PathBuf::from(value);
        }
        if let Some(value) = get("BIND_ADDR") {
            settings.bind_addr = value;
        }
        if let Some(value) = get("LOG_CAPACITY") {
            settings.log_capacity = parse_number("LOG_CAPACITY", &value)?;
            if settings.log_capacity == 0 {
                return Err(Error::InvalidConfig(
                    "LOG_CAPACITY must be greater than zero".to_string(),
                ));
            }
        }
        if let Some(value) = get("DOOR_TIMEOUT_SECS") {
            settings.door_timeout = Duration::from_secs(parse_number("DOOR_TIMEOUT_SECS", &value)?);
        }
        if let Some(value) = get("DOOR_UNLOCK_PATH") {
            settings.door_unlock_path = value;
        }
        if let Some(value) = get("IDENTITY_URL") {
            settings.identity_url = value;
        }
        if let Some(value) = get("IDENTITY_USER") {
            settings.identity_user = value;
        }
        if let Some(value) = get("IDENTITY_KEY") {
            settings.identity_key = value;
        }
        if let Some(value) = get("IDENTITY_TIMEOUT_SECS") {
            settings.identity_timeout =
                Duration::from_secs(parse_number("IDENTITY_TIMEOUT_SECS", &value)?);
        }
        Ok(settings)
    }

    /// Returns true when an identity directory is configured.
    pub fn identity_enabled(&self) -> bool {
        !self.identity_url.is_empty()
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        Error::InvalidConfig(format!("{ENV_PREFIX}{name} must be a number, got {value}"))
    })
}
