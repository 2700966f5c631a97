//! Errors raised while loading and querying configuration.
//!
//! Configuration errors are fatal to server startup, so each variant names
//! the section and item involved. I/O and JSON errors are wrapped in `Arc`
//! to keep the enum cheap to clone into lifecycle reports.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Errors arising from configuration loading or validation.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration '{}': {source}", path.display())]
    Read {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The configuration document is not valid JSON or has the wrong shape.
    #[error("failed to parse configuration: {source}")]
    Parse {
        /// Underlying JSON error.
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// A section contains a value of a type that cannot be represented.
    #[error("section '{section}' is malformed: {message}")]
    Structure {
        /// Section being converted.
        section: String,
        /// Description of the problem.
        message: String,
    },

    /// A required item was not present.
    #[error("section '{section}' has no value for '{item}'")]
    MissingItem {
        /// Section that was searched.
        section: String,
        /// Item that was required.
        item: String,
    },

    /// An item was present but its value could not be used.
    #[error("invalid value \"{value}\" for '{item}' in section '{section}': {reason}")]
    InvalidValue {
        /// Section containing the item.
        section: String,
        /// Item name.
        item: String,
        /// Offending value.
        value: String,
        /// Why the value was rejected.
        reason: String,
    },
}

impl ConfigError {
    /// Builds a [`ConfigError::InvalidValue`].
    #[must_use]
    pub fn invalid_value(
        section: impl Into<String>,
        item: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            section: section.into(),
            item: item.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Builds a [`ConfigError::MissingItem`].
    #[must_use]
    pub fn missing_item(section: impl Into<String>, item: impl Into<String>) -> Self {
        Self::MissingItem {
            section: section.into(),
            item: item.into(),
        }
    }
}
