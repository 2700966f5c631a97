//! File output through the shared exclusive-file table.

use std::fs::DirBuilder;
use std::io::{self, Write};
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;

use nix::unistd::{Gid, Group, chown};
use rad_config::ConfigError;
use rad_server::exfile::ExFile;
use tracing::debug;

use crate::{LINELOG_TARGET, LinelogError};

/// Resolves a `group` setting given as a name or a numeric id.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] when no such group exists.
pub fn resolve_group(section: &str, group: &str) -> Result<Gid, ConfigError> {
    if let Ok(raw) = group.parse() {
        return Ok(Gid::from_raw(raw));
    }
    match Group::from_name(group) {
        Ok(Some(found)) => Ok(found.gid),
        Ok(None) => Err(ConfigError::invalid_value(
            section,
            "group",
            group,
            "no such group",
        )),
        Err(errno) => Err(ConfigError::invalid_value(
            section,
            "group",
            group,
            errno.desc(),
        )),
    }
}

/// Appends `line` plus a newline to `path`, creating missing parent
/// directories with mode `0700` and the file itself with `permissions`.
pub(crate) fn append(
    files: &ExFile,
    path: &Path,
    permissions: u32,
    group: Option<Gid>,
    line: &str,
) -> Result<(), LinelogError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        let mut builder = DirBuilder::new();
        builder.recursive(true).mode(0o700);
        if let Err(source) = builder.create(parent)
            && source.kind() != io::ErrorKind::AlreadyExists
        {
            return Err(LinelogError::CreateDir {
                path: parent.to_path_buf(),
                source,
            });
        }
    }

    let mut handle = files.open(path, permissions, true)?;
    if let Some(gid) = group
        && let Err(errno) = chown(path, None, Some(gid))
    {
        debug!(
            target: LINELOG_TARGET,
            path = %path.display(),
            gid = gid.as_raw(),
            error = %errno,
            "unable to change log file group"
        );
    }

    let written = writeln!(handle, "{line}").map_err(|source| LinelogError::Write {
        path: path.to_path_buf(),
        source,
    });
    files.close(handle);
    written
}
