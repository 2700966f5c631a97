//! Syslog output.

use std::ffi::CString;

use libc::c_int;
use strum::{EnumString, IntoStaticStr};

use crate::LinelogError;

/// Syslog facilities accepted by `syslog_facility`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Facility {
    /// Kernel messages.
    Kern,
    /// User-level messages.
    User,
    /// Mail system.
    Mail,
    /// System daemons.
    Daemon,
    /// Security and authorisation messages.
    Auth,
    /// Line printer subsystem.
    Lpr,
    /// Network news subsystem.
    News,
    /// UUCP subsystem.
    Uucp,
    /// Clock daemon.
    Cron,
    /// Private security and authorisation messages.
    Authpriv,
    /// FTP daemon.
    Ftp,
    /// Local use 0.
    Local0,
    /// Local use 1.
    Local1,
    /// Local use 2.
    Local2,
    /// Local use 3.
    Local3,
    /// Local use 4.
    Local4,
    /// Local use 5.
    Local5,
    /// Local use 6.
    Local6,
    /// Local use 7.
    Local7,
}

impl Facility {
    /// The libc facility code.
    #[must_use]
    pub const fn code(self) -> c_int {
        match self {
            Self::Kern => libc::LOG_KERN,
            Self::User => libc::LOG_USER,
            Self::Mail => libc::LOG_MAIL,
            Self::Daemon => libc::LOG_DAEMON,
            Self::Auth => libc::LOG_AUTH,
            Self::Lpr => libc::LOG_LPR,
            Self::News => libc::LOG_NEWS,
            Self::Uucp => libc::LOG_UUCP,
            Self::Cron => libc::LOG_CRON,
            Self::Authpriv => libc::LOG_AUTHPRIV,
            Self::Ftp => libc::LOG_FTP,
            Self::Local0 => libc::LOG_LOCAL0,
            Self::Local1 => libc::LOG_LOCAL1,
            Self::Local2 => libc::LOG_LOCAL2,
            Self::Local3 => libc::LOG_LOCAL3,
            Self::Local4 => libc::LOG_LOCAL4,
            Self::Local5 => libc::LOG_LOCAL5,
            Self::Local6 => libc::LOG_LOCAL6,
            Self::Local7 => libc::LOG_LOCAL7,
        }
    }
}

/// Syslog severities accepted by `syslog_severity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr)]
#[strum(ascii_case_insensitive)]
pub enum Severity {
    /// System is unusable.
    #[strum(serialize = "emerg", serialize = "emergency")]
    Emergency,
    /// Action must be taken immediately.
    #[strum(serialize = "alert")]
    Alert,
    /// Critical conditions.
    #[strum(serialize = "crit", serialize = "critical")]
    Critical,
    /// Error conditions.
    #[strum(serialize = "err", serialize = "error")]
    Error,
    /// Warning conditions.
    #[strum(serialize = "warning", serialize = "warn")]
    Warning,
    /// Normal but significant condition.
    #[strum(serialize = "notice")]
    Notice,
    /// Informational.
    #[strum(serialize = "info")]
    Info,
    /// Debug-level messages.
    #[strum(serialize = "debug")]
    Debug,
}

impl Severity {
    /// The libc level code.
    #[must_use]
    pub const fn code(self) -> c_int {
        match self {
            Self::Emergency => libc::LOG_EMERG,
            Self::Alert => libc::LOG_ALERT,
            Self::Critical => libc::LOG_CRIT,
            Self::Error => libc::LOG_ERR,
            Self::Warning => libc::LOG_WARNING,
            Self::Notice => libc::LOG_NOTICE,
            Self::Info => libc::LOG_INFO,
            Self::Debug => libc::LOG_DEBUG,
        }
    }
}

/// Facility and severity combined into a syslog priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority {
    facility: Option<Facility>,
    severity: Severity,
}

impl Priority {
    /// Combines `facility` (the process default when `None`) with
    /// `severity`.
    #[must_use]
    pub const fn new(facility: Option<Facility>, severity: Severity) -> Self {
        Self { facility, severity }
    }

    /// The value passed to `syslog(3)`.
    #[must_use]
    pub const fn code(self) -> c_int {
        let facility = match self.facility {
            Some(facility) => facility.code(),
            None => 0,
        };
        facility | self.severity.code()
    }

    /// Sends one line.
    ///
    /// # Errors
    ///
    /// Returns [`LinelogError::Syslog`] when the line contains a NUL byte.
    pub fn send(self, line: &str) -> Result<(), LinelogError> {
        let message = CString::new(line).map_err(|_| LinelogError::Syslog)?;
        unsafe { libc::syslog(self.code(), c"%s".as_ptr(), message.as_ptr()) };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::lower("local3", Facility::Local3)]
    #[case::upper("DAEMON", Facility::Daemon)]
    #[case::authpriv("authpriv", Facility::Authpriv)]
    fn parses_facilities(#[case] name: &str, #[case] expected: Facility) {
        assert_eq!(name.parse::<Facility>(), Ok(expected));
    }

    #[rstest]
    #[case::short("emerg", Severity::Emergency)]
    #[case::long("emergency", Severity::Emergency)]
    #[case::crit("crit", Severity::Critical)]
    #[case::err("err", Severity::Error)]
    #[case::warn("warn", Severity::Warning)]
    #[case::mixed_case("Info", Severity::Info)]
    fn parses_severities(#[case] name: &str, #[case] expected: Severity) {
        assert_eq!(name.parse::<Severity>(), Ok(expected));
    }

    #[rstest]
    #[case::facility("local8")]
    #[case::blank("")]
    fn rejects_unknown_facilities(#[case] name: &str) {
        assert!(name.parse::<Facility>().is_err());
    }

    #[test]
    fn priority_combines_facility_and_severity() {
        let priority = Priority::new(Some(Facility::Local2), Severity::Notice);
        assert_eq!(priority.code(), libc::LOG_LOCAL2 | libc::LOG_NOTICE);
        assert_eq!(
            Priority::new(None, Severity::Debug).code(),
            libc::LOG_DEBUG
        );
    }

    #[test]
    fn interior_nul_cannot_be_sent() {
        let priority = Priority::new(None, Severity::Info);
        assert!(matches!(
            priority.send("bad\0line"),
            Err(LinelogError::Syslog)
        ));
    }
}
