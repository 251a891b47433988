use std::fmt;
use thiserror::Error;

/// Store-layer error type.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Crate result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Entity kind named in lookup and reference errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// Building or zone.
    Group,
    /// Physical door.
    Door,
    /// Person identified by an external id.
    User,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Group => "group",
            Self::Door => "door",
            Self::User => "user",
        })
    }
}

/// Errors returned by this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Store error wrapper.
    #[error("store error: {0}")]
    Store(#[source] StoreError),
    /// JSON encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Invalid identifier input.
    #[error("invalid id: {0}")]
    InvalidId(String),
    /// Unknown enumerated value.
    #[error("invalid value: {0}")]
    InvalidValue(String),
    /// Invalid configuration value.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// Entity lookup miss.
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },
    /// Parent reference on create or update does not exist.
    #[error("invalid {kind} reference: {id}")]
    InvalidReference { kind: EntityKind, id: String },
    /// Caller-supplied id is already taken.
    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: EntityKind, id: String },
}

impl Error {
    pub(crate) fn not_found(kind: EntityKind, id: impl fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn invalid_reference(kind: EntityKind, id: impl fmt::Display) -> Self {
        Self::InvalidReference {
            kind,
            id: id.to_string(),
        }
    }

    /// Returns true for lookup misses.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<StoreError> for Error {
    fn from(error: StoreError) -> Self {
        Self::Store(error)
    }
}
