//! Linelog instance settings.

use rad_config::{ConfigError, ConfigSection};

/// `filename` value that sends lines to syslog instead of a file.
pub const SYSLOG_FILENAME: &str = "syslog";

/// Default mode for newly created log files.
pub const DEFAULT_PERMISSIONS: u32 = 0o600;

/// Default syslog severity.
pub const DEFAULT_SEVERITY: &str = "info";

/// Settings read from a linelog instance section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinelogConfig {
    /// Output file template, or `syslog`. Required at instantiate.
    pub filename: Option<String>,
    /// Hex-escape unsafe filename characters instead of replacing them.
    pub escape_filenames: bool,
    /// Syslog facility name.
    pub syslog_facility: Option<String>,
    /// Syslog severity name.
    pub syslog_severity: String,
    /// Mode for newly created files.
    pub permissions: u32,
    /// Group (name or numeric id) given to the log file.
    pub group: Option<String>,
    /// Line template.
    pub format: Option<String>,
    /// Template naming an item inside the instance section that holds the
    /// line template.
    pub reference: Option<String>,
}

impl LinelogConfig {
    /// Reads the settings from `section`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for a malformed boolean or
    /// permissions value.
    pub fn from_section(section: &ConfigSection) -> Result<Self, ConfigError> {
        let owned = |item: &str| section.pair(item).map(str::to_owned);
        Ok(Self {
            filename: owned("filename"),
            escape_filenames: section.bool_or("escape_filenames", false)?,
            syslog_facility: owned("syslog_facility"),
            syslog_severity: owned("syslog_severity")
                .unwrap_or_else(|| DEFAULT_SEVERITY.to_owned()),
            permissions: section
                .pair("permissions")
                .map_or(Ok(DEFAULT_PERMISSIONS), |value| {
                    parse_permissions(section.name(), value)
                })?,
            group: owned("group"),
            format: owned("format"),
            reference: owned("reference"),
        })
    }

    /// Returns `true` when lines go to syslog.
    #[must_use]
    pub fn is_syslog(&self) -> bool {
        self.filename.as_deref() == Some(SYSLOG_FILENAME)
    }
}

fn parse_permissions(section: &str, value: &str) -> Result<u32, ConfigError> {
    let digits = value.trim();
    let mode = u32::from_str_radix(digits, 8).map_err(|error| {
        ConfigError::invalid_value(section, "permissions", value, error.to_string())
    })?;
    if mode > 0o7777 {
        return Err(ConfigError::invalid_value(
            section,
            "permissions",
            value,
            "not a file mode",
        ));
    }
    Ok(mode)
}
