use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

const MAX_ID_LEN: usize = 128;

fn validate_id(value: &str, kind: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidId(format!("{kind} must not be empty")));
    }
    if trimmed.len() > MAX_ID_LEN {
        return Err(Error::InvalidId(format!(
            "{kind} length must be <= {MAX_ID_LEN}"
        )));
    }
    if !trimmed.chars().all(is_allowed_id_char) {
        return Err(Error::InvalidId(format!(
            "{kind} contains invalid characters"
        )));
    }
    Ok(trimmed.to_string())
}

// Employee ids arrive from an external directory and may carry dots, slashes or an email form.
fn is_allowed_id_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, ':' | '_' | '-' | '.' | '/' | '@')
}

macro_rules! define_id_type {
    ($(#[$doc:meta])* $name:ident, $kind:expr) => {
        $(#[$doc])*
        #[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a validated identifier.
            pub fn new(value: impl AsRef<str>) -> Result<Self> {
                validate_id(value.as_ref(), $kind).map(Self)
            }

            /// Creates an identifier from a trusted string without validation.
            pub fn from_string(value: String) -> Self {
                Self(value)
            }

            /// Returns the underlying string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<&str> for $name {
            type Error = Error;

            fn try_from(value: &str) -> Result<Self> {
                Self::new(value)
            }
        }

        impl TryFrom<String> for $name {
            type Error = Error;

            fn try_from(value: String) -> Result<Self> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

define_id_type!(
    /// Group (building or zone) identifier.
    GroupId,
    "group id"
);
define_id_type!(
    /// Door identifier.
    DoorId,
    "door id"
);
define_id_type!(
    /// User identifier issued by the external identity system.
    UserId,
    "user id"
);
define_id_type!(
    /// Access log entry identifier.
    LogId,
    "log id"
);

impl GroupId {
    /// Generates a fresh `grp_` prefixed identifier.
    pub fn generate() -> Self {
        Self(format!("grp_{}", short_hex()))
    }
}

impl DoorId {
    /// Generates a fresh `door_` prefixed identifier.
    pub fn generate() -> Self {
        Self(format!("door_{}", short_hex()))
    }
}

impl LogId {
    /// Generates a fresh UUID v4 identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

fn short_hex() -> String {
    let mut hex = uuid::Uuid::new_v4().simple().to_string();
    hex.truncate(8);
    hex
}

/// Operational status reported for a door.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoorStatus {
    #[default]
    Online,
    Offline,
    Locked,
    Unlocked,
    Error,
}

impl DoorStatus {
    /// Returns the storage string for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Locked => "locked",
            Self::Unlocked => "unlocked",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for DoorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DoorStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "online" => Ok(Self::Online),
            "offline" => Ok(Self::Offline),
            "locked" => Ok(Self::Locked),
            "unlocked" => Ok(Self::Unlocked),
            "error" => Ok(Self::Error),
            other => Err(Error::InvalidValue(format!("unknown door status {other}"))),
        }
    }
}

/// Kind of event recorded in the access log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessEventKind {
    Granted,
    Denied,
    DoorOpened,
    DoorClosed,
    ManualUnlock,
    Emergency,
}

impl AccessEventKind {
    /// Returns the storage string for this event kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::Denied => "denied",
            Self::DoorOpened => "door_opened",
            Self::DoorClosed => "door_closed",
            Self::ManualUnlock => "manual_unlock",
            Self::Emergency => "emergency",
        }
    }
}

impl fmt::Display for AccessEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
