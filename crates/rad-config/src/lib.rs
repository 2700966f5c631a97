//! Typed configuration for the request-processing server.
//!
//! The server reads a single JSON document describing logging, module
//! instances and virtual servers. Module and server blocks are kept as
//! ordered [`ConfigSection`] trees so that modules can interpret their own
//! items during bootstrap and instantiate, and so that section lists keep
//! the order in which modules are called.
//!
//! ```json
//! {
//!   "log_filter": "info",
//!   "log_format": "compact",
//!   "modules": {
//!     "linelog": { "filename": "/var/log/radius/linelog", "format": "%{User-Name}" }
//!   },
//!   "servers": {
//!     "default": { "namespace": "radius", "authorize": ["linelog", "ok"] }
//!   }
//! }
//! ```

mod defaults;
mod error;
mod logging;
mod section;

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

pub use defaults::{
    DEFAULT_LOG_FILTER, MODULE_KIND_ITEM, NAMESPACE_ITEM, default_log_filter,
    default_log_filter_string, default_log_format,
};
pub use error::ConfigError;
pub use logging::{LogFormat, LogFormatParseError, LoggingConfig};
pub use section::{ConfigItem, ConfigPair, ConfigSection};

/// Fully loaded server configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    logging: LoggingConfig,
    modules: Vec<ConfigSection>,
    servers: Vec<ConfigSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default = "default_log_filter_string")]
    log_filter: String,
    #[serde(default)]
    log_format: LogFormat,
    #[serde(default)]
    modules: Map<String, Value>,
    #[serde(default)]
    servers: Map<String, Value>,
}

impl Config {
    /// Reads and parses a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read, or any error
    /// reported by [`Config::from_json_str`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source: Arc::new(source),
        })?;
        Self::from_json_str(&text)
    }

    /// Parses a configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON or unknown top-level
    /// keys, [`ConfigError::Structure`] for blocks that are not objects, and
    /// [`ConfigError::InvalidValue`] for an empty log filter.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            source: Arc::new(source),
        })?;

        if raw.log_filter.trim().is_empty() {
            return Err(ConfigError::invalid_value(
                "root",
                "log_filter",
                raw.log_filter,
                "filter must not be empty",
            ));
        }

        Ok(Self {
            logging: LoggingConfig {
                filter: raw.log_filter,
                format: raw.log_format,
            },
            modules: sections_from_map(&raw.modules)?,
            servers: sections_from_map(&raw.servers)?,
        })
    }

    /// Adds a module instance section.
    #[must_use]
    pub fn with_module(mut self, section: ConfigSection) -> Self {
        self.modules.push(section);
        self
    }

    /// Adds a virtual server section.
    #[must_use]
    pub fn with_server(mut self, section: ConfigSection) -> Self {
        self.servers.push(section);
        self
    }

    /// Replaces the logging options.
    #[must_use]
    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    /// Returns the configured `tracing` filter.
    #[must_use]
    pub const fn log_filter(&self) -> &str {
        self.logging.filter.as_str()
    }

    /// Returns the configured log format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.logging.format
    }

    /// Returns the module instance sections, one per configured instance.
    #[must_use]
    pub fn modules(&self) -> &[ConfigSection] {
        &self.modules
    }

    /// Returns the virtual server sections.
    #[must_use]
    pub fn servers(&self) -> &[ConfigSection] {
        &self.servers
    }

    /// Looks up a module instance section by instance name.
    #[must_use]
    pub fn module(&self, name: &str) -> Option<&ConfigSection> {
        self.modules.iter().find(|section| section.name() == name)
    }

    /// Looks up a virtual server section by name.
    #[must_use]
    pub fn server(&self, name: &str) -> Option<&ConfigSection> {
        self.servers.iter().find(|section| section.name() == name)
    }
}

fn sections_from_map(map: &Map<String, Value>) -> Result<Vec<ConfigSection>, ConfigError> {
    map.iter()
        .map(|(name, value)| ConfigSection::from_json(name, value))
        .collect()
}
