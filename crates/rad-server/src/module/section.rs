//! Protocol processing sections that modules bind methods to.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Named phase of protocol processing.
///
/// Sections parse from and print as their configuration names
/// (`authorize`, `pre-proxy`, `recv-coa`, ...).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum Section {
    /// Verify credentials.
    Authenticate,
    /// Decide how the request is authenticated and which policies apply.
    Authorize,
    /// Pre-process accounting packets.
    Preacct,
    /// Record accounting packets.
    Accounting,
    /// Check simultaneous use.
    #[strum(to_string = "session", serialize = "checksimul")]
    Session,
    /// Before a request is proxied.
    PreProxy,
    /// After a proxied request is answered.
    PostProxy,
    /// After authentication, before the reply is sent.
    PostAuth,
    /// Inbound change-of-authorisation packets.
    RecvCoa,
    /// Outbound change-of-authorisation packets.
    SendCoa,
}

impl Section {
    /// Number of sections; the size of every method table.
    pub const COUNT: usize = 10;

    /// Every section, in method-table order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Authenticate,
        Self::Authorize,
        Self::Preacct,
        Self::Accounting,
        Self::Session,
        Self::PreProxy,
        Self::PostProxy,
        Self::PostAuth,
        Self::RecvCoa,
        Self::SendCoa,
    ];

    /// Position of the section in a method table.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Name of the attribute that selects a sub-section of this section.
    #[must_use]
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::Authenticate => "Auth-Type",
            Self::Authorize => "Autz-Type",
            Self::Preacct => "Pre-Acct-Type",
            Self::Accounting => "Acct-Type",
            Self::Session => "Session-Type",
            Self::PreProxy => "Pre-Proxy-Type",
            Self::PostProxy => "Post-Proxy-Type",
            Self::PostAuth => "Post-Auth-Type",
            Self::RecvCoa => "Recv-CoA-Type",
            Self::SendCoa => "Send-CoA-Type",
        }
    }
}
