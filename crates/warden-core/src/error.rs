//! Error types for warden-core
//!
//! Every fallible operation in the crate returns [`Result`]. Variants map
//! one-to-one onto the outcomes a command layer needs to render: callers
//! match on the variant (or on [`Error::code`]) and never on message text.

use thiserror::Error;

/// Core error type for confinement operations
#[derive(Debug, Error)]
pub enum Error {
    /// No zone with the given (case-folded) name
    #[error("Zone not found: {0}")]
    ZoneNotFound(String),

    /// Subject holds no active restriction
    #[error("Subject is not restricted: {0}")]
    NotRestricted(String),

    /// A zone with the same case-folded name already exists
    #[error("Zone already exists: {0}")]
    ZoneExists(String),

    /// Subject already holds an active restriction
    #[error("Subject is already restricted: {0}")]
    AlreadyRestricted(String),

    /// Referenced world is missing or the target region cannot be loaded
    #[error("Invalid location: {0}")]
    InvalidLocation(String),

    /// I/O or encoding failure while loading or saving a collection
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// Negative, overflowing or unparsable duration
    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    /// Zone name failed validation
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// Configuration value failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration document could not be parsed
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Expiration scheduler could not be started
    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

impl Error {
    /// Stable machine-readable code for this error.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ZoneNotFound(_) => "zone_not_found",
            Self::NotRestricted(_) => "not_restricted",
            Self::ZoneExists(_) => "zone_exists",
            Self::AlreadyRestricted(_) => "already_restricted",
            Self::InvalidLocation(_) => "invalid_location",
            Self::Persistence(_) => "persistence_failure",
            Self::InvalidDuration(_) => "invalid_duration",
            Self::InvalidName(_) => "invalid_name",
            Self::InvalidConfig(_) => "invalid_config",
            Self::ParseError(_) => "parse_error",
            Self::Scheduler(_) => "scheduler_error",
        }
    }

    /// True for both flavours of "not found" (zone or restriction).
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::ZoneNotFound(_) | Self::NotRestricted(_))
    }

    /// True when the in-memory mutation was applied but the flush failed.
    ///
    /// Callers can retry with [`crate::RestrictionManager::save_all`].
    pub const fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::ParseError(format!("Failed to parse config: {err}"))
    }
}

/// Result type alias for warden-core operations
pub type Result<T> = std::result::Result<T, Error>;
