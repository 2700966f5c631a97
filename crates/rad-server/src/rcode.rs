//! Module result codes.
//!
//! Every section method answers with an [`Rcode`]. The interpreter merges
//! the codes of sibling instructions by [`Rcode::priority`] and stops a list
//! early on codes where [`Rcode::returns_early`] holds.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Result of a module call or an interpreted instruction.
///
/// # Example
///
/// ```
/// use rad_server::Rcode;
///
/// let code: Rcode = "notfound".parse().expect("known rcode");
/// assert_eq!(code, Rcode::Notfound);
/// assert_eq!(Rcode::Userlock.to_string(), "userlock");
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Rcode {
    /// Immediately reject the request.
    Reject,
    /// Module failed, don't reply.
    Fail,
    /// The module is OK, continue.
    Ok,
    /// The module handled the request, so stop.
    Handled,
    /// The module considers the request invalid.
    Invalid,
    /// Reject the request (user is locked out).
    Userlock,
    /// User not found.
    Notfound,
    /// Module succeeded without doing anything.
    Noop,
    /// OK (pairs modified).
    Updated,
    /// The call suspended and must be resumed later.
    Yield,
}

impl Rcode {
    /// Every result code, in table order.
    pub const ALL: [Self; 10] = [
        Self::Reject,
        Self::Fail,
        Self::Ok,
        Self::Handled,
        Self::Invalid,
        Self::Userlock,
        Self::Notfound,
        Self::Noop,
        Self::Updated,
        Self::Yield,
    ];

    /// Returns `true` for codes that end the enclosing instruction list.
    #[must_use]
    pub const fn returns_early(self) -> bool {
        matches!(
            self,
            Self::Reject | Self::Fail | Self::Handled | Self::Invalid | Self::Userlock
        )
    }

    /// Priority used when a later sibling's result competes with the
    /// current one. Higher wins; ties go to the later result.
    #[must_use]
    pub const fn priority(self) -> u8 {
        match self {
            Self::Yield => 0,
            Self::Noop => 1,
            Self::Notfound => 2,
            Self::Ok => 3,
            Self::Updated => 4,
            Self::Reject | Self::Fail | Self::Handled | Self::Invalid | Self::Userlock => 5,
        }
    }

    /// Merges `next` into `self`, keeping the higher-priority result.
    #[must_use]
    pub const fn merge(self, next: Self) -> Self {
        if next.priority() >= self.priority() {
            next
        } else {
            self
        }
    }
}
