//! Exclusive access to append-only files shared across workers.
//!
//! An [`ExFile`] keeps a bounded table of open files keyed by path. Opening
//! a path marks its entry busy until the returned handle is closed, so two
//! workers never interleave writes to the same file. With locking enabled
//! the handle also holds an `fs2` advisory lock, which serialises writers in
//! other processes.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, trace};

const EXFILE_TARGET: &str = "rad_server::exfile";

/// Errors raised by [`ExFile`].
#[derive(Debug, Clone, Error)]
pub enum ExFileError {
    /// Every table entry is in use.
    #[error("all {max} file entries are in use")]
    Full {
        /// Table capacity.
        max: usize,
    },
    /// The file could not be opened.
    #[error("failed to open '{}': {source}", path.display())]
    Open {
        /// Path being opened.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// The advisory lock could not be taken.
    #[error("failed to lock '{}': {source}", path.display())]
    Lock {
        /// Path being locked.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
}

#[derive(Debug)]
struct Entry {
    path: PathBuf,
    file: Option<File>,
    busy: bool,
    last_used: Instant,
}

impl Entry {
    fn is_stale(&self, now: Instant, max_idle: Duration) -> bool {
        !self.busy && now.saturating_duration_since(self.last_used) > max_idle
    }
}

/// Table of exclusively held, append-mode files.
#[derive(Debug)]
pub struct ExFile {
    max_entries: usize,
    max_idle: Duration,
    locking: bool,
    entries: Mutex<Vec<Entry>>,
    released: Condvar,
}

impl ExFile {
    /// Creates a table holding at most `max_entries` files, closing files
    /// unused for longer than `max_idle`.
    #[must_use]
    pub fn new(max_entries: usize, max_idle: Duration, locking: bool) -> Self {
        Self {
            max_entries: max_entries.max(1),
            max_idle,
            locking,
            entries: Mutex::new(Vec::new()),
            released: Condvar::new(),
        }
    }

    /// Number of files currently held open.
    #[must_use]
    pub fn open_files(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens `path` for appending and claims it exclusively.
    ///
    /// Blocks while another handle holds the same path. A new file is
    /// created with `permissions` only when `create` is set.
    ///
    /// # Errors
    ///
    /// Returns [`ExFileError::Full`] when the table is full of busy entries,
    /// or an open or lock failure.
    pub fn open(
        &self,
        path: &Path,
        permissions: u32,
        create: bool,
    ) -> Result<ExFileHandle<'_>, ExFileError> {
        let mut entries = self.lock();
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|entry| !entry.is_stale(now, self.max_idle));
        if entries.len() != before {
            trace!(
                target: EXFILE_TARGET,
                closed = before - entries.len(),
                "closed idle files"
            );
        }

        loop {
            match entries.iter().position(|entry| entry.path == path) {
                Some(index) => {
                    let busy = entries.get(index).is_some_and(|entry| entry.busy);
                    if busy {
                        entries = self
                            .released
                            .wait(entries)
                            .unwrap_or_else(PoisonError::into_inner);
                        continue;
                    }
                    let cached = entries.get_mut(index).and_then(|entry| {
                        entry.busy = true;
                        entry.file.take()
                    });
                    drop(entries);
                    let file = match cached.filter(|file| still_linked(path, file)) {
                        Some(file) => file,
                        None => open_append(path, permissions, create)
                            .inspect_err(|_| self.release(path, None))?,
                    };
                    return self.claim(path, file);
                }
                None => {
                    if entries.len() >= self.max_entries {
                        let idle = entries.iter().position(|entry| !entry.busy);
                        match idle {
                            Some(index) => {
                                entries.remove(index);
                            }
                            None => {
                                return Err(ExFileError::Full {
                                    max: self.max_entries,
                                });
                            }
                        }
                    }
                    entries.push(Entry {
                        path: path.to_path_buf(),
                        file: None,
                        busy: true,
                        last_used: now,
                    });
                    drop(entries);
                    let file = open_append(path, permissions, create)
                        .inspect_err(|_| self.forget(path))?;
                    debug!(target: EXFILE_TARGET, path = %path.display(), "opened file");
                    return self.claim(path, file);
                }
            }
        }
    }

    fn claim(&self, path: &Path, file: File) -> Result<ExFileHandle<'_>, ExFileError> {
        if self.locking {
            if let Err(source) = fs2::FileExt::lock_exclusive(&file) {
                self.release(path, None);
                return Err(ExFileError::Lock {
                    path: path.to_path_buf(),
                    source: Arc::new(source),
                });
            }
        }
        Ok(ExFileHandle {
            owner: self,
            path: path.to_path_buf(),
            file: Some(file),
        })
    }

    /// Releases a handle, keeping its file open for reuse.
    pub fn close(&self, handle: ExFileHandle<'_>) {
        drop(handle);
    }

    fn release(&self, path: &Path, file: Option<File>) {
        let mut entries = self.lock();
        if let Some(entry) = entries.iter_mut().find(|entry| entry.path == path) {
            entry.busy = false;
            entry.last_used = Instant::now();
            entry.file = file;
        }
        drop(entries);
        self.released.notify_all();
    }

    fn forget(&self, path: &Path) {
        self.lock().retain(|entry| entry.path != path);
        self.released.notify_all();
    }
}

fn open_append(path: &Path, permissions: u32, create: bool) -> Result<File, ExFileError> {
    OpenOptions::new()
        .append(true)
        .create(create)
        .mode(permissions)
        .open(path)
        .map_err(|source| ExFileError::Open {
            path: path.to_path_buf(),
            source: Arc::new(source),
        })
}

/// A cached descriptor is only reused while `path` still names its inode;
/// rotated or deleted files are reopened.
fn still_linked(path: &Path, file: &File) -> bool {
    match (std::fs::metadata(path), file.metadata()) {
        (Ok(on_disk), Ok(held)) => on_disk.ino() == held.ino() && on_disk.dev() == held.dev(),
        _ => false,
    }
}

/// Exclusive claim on one file of an [`ExFile`] table.
#[derive(Debug)]
pub struct ExFileHandle<'a> {
    owner: &'a ExFile,
    path: PathBuf,
    file: Option<File>,
}

impl ExFileHandle<'_> {
    /// Path the handle was opened for.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The underlying file.
    #[must_use]
    pub const fn file(&self) -> Option<&File> {
        self.file.as_ref()
    }
}

impl Write for ExFileHandle<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.write(buf),
            None => Err(io::Error::from(io::ErrorKind::NotConnected)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.as_mut().map_or(Ok(()), Write::flush)
    }
}

impl Drop for ExFileHandle<'_> {
    fn drop(&mut self) {
        let file = self.file.take();
        if self.owner.locking {
            if let Some(held) = file.as_ref() {
                if let Err(error) = fs2::FileExt::unlock(held) {
                    debug!(
                        target: EXFILE_TARGET,
                        path = %self.path.display(),
                        %error,
                        "failed to release file lock"
                    );
                }
            }
        }
        self.owner.release(&self.path, file);
    }
}

#[cfg(test)]
mod tests;
