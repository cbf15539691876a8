//! Error types.
//!
//! Only configuration is fallible at runtime. Protocol precondition
//! violations inside the engines are programming errors and panic.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("unknown rate adaptation strategy {0:?}")]
    UnknownStrategy(String),

    #[error("unknown rate table {0:?} (expected \"ieee80211a\" or \"ieee80211n\")")]
    UnknownRateTable(String),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
