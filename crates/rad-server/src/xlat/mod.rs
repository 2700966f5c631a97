//! Attribute expansion for module format strings.
//!
//! `%{Name}` expands to the first value of `Name` in the request list,
//! `%{reply:Name}` and `%{control:Name}` (or `%{request:Name}`) select a
//! list explicitly, and `%%` is a literal percent sign. Missing attributes
//! expand to nothing.

use thiserror::Error;

use crate::request::{PairList, Request};

/// Escapes one substituted value into the output.
pub type Escape<'a> = &'a dyn Fn(&str, &mut String);

/// Errors raised while expanding a format string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XlatError {
    /// A `%{` was never closed.
    #[error("unterminated expansion starting at offset {offset}")]
    Unterminated {
        /// Byte offset of the `%`.
        offset: usize,
    },
    /// An expansion named no attribute.
    #[error("empty expansion at offset {offset}")]
    Empty {
        /// Byte offset of the `%`.
        offset: usize,
    },
    /// An expansion named a list that does not exist.
    #[error("unknown attribute list '{list}'")]
    UnknownList {
        /// List qualifier as written.
        list: String,
    },
}

/// Expands `format` against `request`, passing substituted values (never
/// literal text) through `escape`.
///
/// # Errors
///
/// Returns an [`XlatError`] for malformed expansions.
///
/// # Example
///
/// ```
/// use rad_server::{EventLoop, Request, xlat};
///
/// let el = EventLoop::new(0);
/// let mut request = Request::new(1, &el);
/// request.packet_mut().add("User-Name", "bob");
/// let line = xlat::expand("user=%{User-Name} 100%%", &request, None).expect("expand");
/// assert_eq!(line, "user=bob 100%");
/// ```
pub fn expand(
    format: &str,
    request: &Request,
    escape: Option<Escape<'_>>,
) -> Result<String, XlatError> {
    let mut out = String::with_capacity(format.len());
    let mut chars = format.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek().map(|&(_, next)| next) {
            Some('%') => {
                chars.next();
                out.push('%');
            }
            Some('{') => {
                chars.next();
                let mut reference = String::new();
                let mut closed = false;
                for (_, next) in chars.by_ref() {
                    if next == '}' {
                        closed = true;
                        break;
                    }
                    reference.push(next);
                }
                if !closed {
                    return Err(XlatError::Unterminated { offset });
                }
                let value = lookup(request, &reference, offset)?;
                match escape {
                    Some(escape_fn) => escape_fn(value, &mut out),
                    None => out.push_str(value),
                }
            }
            _ => out.push('%'),
        }
    }
    Ok(out)
}

fn lookup<'r>(request: &'r Request, reference: &str, offset: usize) -> Result<&'r str, XlatError> {
    let (list, attribute) = match reference.split_once(':') {
        Some((qualifier, attribute)) => (select_list(request, qualifier)?, attribute),
        None => (request.packet(), reference),
    };
    let name = attribute.trim();
    if name.is_empty() {
        return Err(XlatError::Empty { offset });
    }
    Ok(list.get(name).unwrap_or_default())
}

fn select_list<'r>(request: &'r Request, qualifier: &str) -> Result<&'r PairList, XlatError> {
    match qualifier.trim().to_ascii_lowercase().as_str() {
        "request" | "packet" => Ok(request.packet()),
        "reply" => Ok(request.reply()),
        "control" | "config" => Ok(request.control()),
        _ => Err(XlatError::UnknownList {
            list: qualifier.to_owned(),
        }),
    }
}
