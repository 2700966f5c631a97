//! The `linelog` module: writes one expanded line per request to a file or
//! to syslog.
//!
//! Each instance names an output with `filename` (a template expanded per
//! request, or the word `syslog`) and a line template with `format`. A
//! `reference` template can pick the line from a pair inside the instance
//! section instead, so one instance can log different packet types in
//! different shapes:
//!
//! ```text
//! linelog {
//!     filename = "/var/log/radius/%{Client-IP-Address}/linelog"
//!     format = "default line"
//!     reference = "messages.%{reply:Packet-Type}"
//!     messages {
//!         Access-Accept = "accepted %{User-Name}"
//!         Access-Reject = ""
//!     }
//! }
//! ```
//!
//! A reference that resolves to an empty value logs nothing and returns
//! `ok`; one that resolves to nothing at all returns `noop`. Substituted
//! values are escaped so a line never contains raw control characters, and
//! filename values can never introduce extra path components.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::unistd::Gid;
use rad_config::{ConfigError, ConfigItem, ConfigSection};
use rad_server::exfile::{ExFile, ExFileError};
use rad_server::module::MethodCtx;
use rad_server::xlat::{self, Escape, XlatError};
use rad_server::{LifecyclePhase, ModuleDescriptor, ModuleError, Rcode, Request, Section};
use thiserror::Error;
use tracing::{debug, warn};

pub mod config;
pub mod escape;
pub mod file;
pub mod syslog;

#[cfg(test)]
mod tests;

pub use self::config::LinelogConfig;

use self::syslog::{Facility, Priority, Severity};

/// Module kind name used in configuration.
pub const MODULE_NAME: &str = "linelog";

/// Tracing target for this module.
pub const LINELOG_TARGET: &str = "rad_module_linelog";

const MAX_OPEN_FILES: usize = 64;
const MAX_IDLE: Duration = Duration::from_secs(30);

/// Errors raised while logging a request.
#[derive(Debug, Error)]
pub enum LinelogError {
    /// A template could not be expanded.
    #[error("failed to expand template: {0}")]
    Expand(#[from] XlatError),
    /// The parent directory of the log file could not be created.
    #[error("failed to create directory '{}': {source}", path.display())]
    CreateDir {
        /// Directory being created.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The log file could not be opened.
    #[error(transparent)]
    Open(#[from] ExFileError),
    /// The line could not be written.
    #[error("failed writing '{}': {source}", path.display())]
    Write {
        /// File being written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The line could not be handed to syslog.
    #[error("line contains a NUL byte and cannot be sent to syslog")]
    Syslog,
}

/// Where lines go.
#[derive(Debug)]
enum Output {
    File {
        template: String,
        files: ExFile,
        group: Option<Gid>,
    },
    Syslog(Priority),
}

/// Instance data of a `linelog` module.
#[derive(Debug)]
pub struct Linelog {
    config: LinelogConfig,
    section: ConfigSection,
    output: Option<Output>,
}

impl Linelog {
    /// Settings this instance was configured with.
    #[must_use]
    pub const fn config(&self) -> &LinelogConfig {
        &self.config
    }

    /// Number of log files held open for reuse.
    #[must_use]
    pub fn open_files(&self) -> usize {
        match &self.output {
            Some(Output::File { files, .. }) => files.open_files(),
            _ => 0,
        }
    }

    /// Picks the line template for `request`.
    ///
    /// `Ok(None)` means nothing should be logged for this request, and
    /// `Ok(Some(""))` means logging is deliberately suppressed.
    fn template(&self, request: &Request) -> Result<Option<&str>, LinelogError> {
        let format = self.config.format.as_deref();
        let Some(reference) = self.config.reference.as_deref() else {
            return Ok(format);
        };
        let expanded = xlat::expand(reference, request, Some(&escape::escape_line))?;
        if expanded.starts_with('.') {
            return Ok(format);
        }
        let path = format!(".{expanded}");
        match self.section.reference(&path) {
            None => {
                debug!(target: LINELOG_TARGET, reference = %path, "no such entry");
                Ok(None)
            }
            Some(ConfigItem::Section(_)) => {
                debug!(target: LINELOG_TARGET, reference = %path, "entry is not a pair");
                Ok(format)
            }
            Some(ConfigItem::Pair(pair)) => Ok(pair.value().or(format)),
        }
    }

    /// Logs one line for `request`.
    fn log(&self, request: &Request) -> Result<Rcode, LinelogError> {
        let Some(template) = self.template(request)? else {
            return Ok(Rcode::Noop);
        };
        if template.is_empty() {
            return Ok(Rcode::Ok);
        }
        let Some(output) = &self.output else {
            return Ok(Rcode::Noop);
        };
        let line = xlat::expand(template, request, Some(&escape::escape_line))?;
        match output {
            Output::Syslog(priority) => priority.send(&line)?,
            Output::File {
                template: filename,
                files,
                group,
            } => {
                let filename_escape: Escape<'_> = if self.config.escape_filenames {
                    &escape::escape_filename
                } else {
                    &escape::make_filename_safe
                };
                let path = xlat::expand(filename, request, Some(filename_escape))?;
                file::append(
                    files,
                    Path::new(&path),
                    self.config.permissions,
                    *group,
                    &line,
                )?;
            }
        }
        Ok(Rcode::Ok)
    }
}

fn bootstrap(section: &ConfigSection) -> Result<Linelog, ModuleError> {
    let config = LinelogConfig::from_section(section)
        .map_err(|error| ModuleError::config(section.name(), error))?;
    Ok(Linelog {
        config,
        section: section.clone(),
        output: None,
    })
}

fn instantiate(linelog: &mut Linelog, section: &ConfigSection) -> Result<(), ModuleError> {
    let name = section.name();
    let config = &linelog.config;
    let Some(filename) = config.filename.as_deref() else {
        return Err(ModuleError::config(
            name,
            ConfigError::missing_item(name, "filename"),
        ));
    };
    if config.format.is_none() && config.reference.is_none() {
        return Err(ModuleError::lifecycle(
            name,
            LifecyclePhase::Instantiate,
            "must specify a log format, or reference",
        ));
    }

    let facility = config
        .syslog_facility
        .as_deref()
        .map(|value| {
            value.parse::<Facility>().map_err(|_| {
                ConfigError::invalid_value(name, "syslog_facility", value, "unknown facility")
            })
        })
        .transpose()
        .map_err(|error| ModuleError::config(name, error))?;
    let severity = config.syslog_severity.parse::<Severity>().map_err(|_| {
        ModuleError::config(
            name,
            ConfigError::invalid_value(
                name,
                "syslog_severity",
                &config.syslog_severity,
                "unknown severity",
            ),
        )
    })?;

    let output = if config.is_syslog() {
        Output::Syslog(Priority::new(facility, severity))
    } else {
        let group = config
            .group
            .as_deref()
            .map(|group| file::resolve_group(name, group))
            .transpose()
            .map_err(|error| ModuleError::config(name, error))?;
        Output::File {
            template: filename.to_owned(),
            files: ExFile::new(MAX_OPEN_FILES, MAX_IDLE, true),
            group,
        }
    };
    linelog.output = Some(output);
    Ok(())
}

fn log_request(ctx: &mut MethodCtx<'_, Linelog, ()>, request: &mut Request) -> Rcode {
    match ctx.instance().log(request) {
        Ok(rcode) => rcode,
        Err(error) => {
            warn!(
                target: LINELOG_TARGET,
                instance = ctx.name(),
                request = request.number(),
                error = %error,
                "linelog failed"
            );
            Rcode::Fail
        }
    }
}

/// Describes the `linelog` module for registration with a
/// [`ModuleRegistry`](rad_server::ModuleRegistry).
///
/// Every section except `session` logs.
#[must_use]
pub fn module() -> ModuleDescriptor<Linelog, ()> {
    Section::ALL
        .into_iter()
        .filter(|section| *section != Section::Session)
        .fold(
            ModuleDescriptor::new(MODULE_NAME, bootstrap).with_instantiate(instantiate),
            |descriptor, section| descriptor.with_method(section, log_request),
        )
}
