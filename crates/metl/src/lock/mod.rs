//! Host-wide job lock file.
//!
//! One line per running job, `name|unix-epoch-start`. Every read-modify-write
//! happens under an exclusive `flock` on the file. `unlock` rewrites the file
//! through a temp file and an atomic rename, so a process that was waiting on
//! the old inode re-opens the path once it gets the lock.
//!
//! A process that dies between `lock` and `unlock` leaves its line behind;
//! `metl unlock <job>` clears it.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::config::{create_private_dir, validate_job_name, Settings};
use crate::error::{MetlError, Result};

/// A job believed to be running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockEntry {
    pub name: String,
    pub since: DateTime<Utc>,
}

/// Exclusive `flock` on an open file, released on drop.
pub(crate) struct FlockGuard {
    file: File,
}

impl FlockGuard {
    /// Open `path` and take the exclusive lock, retrying if the path was
    /// replaced by a concurrent rewrite while waiting. Returns `None` when
    /// the file does not exist and `create` is false.
    pub(crate) fn open(path: &Path, create: bool) -> Result<Option<Self>> {
        loop {
            let opened = OpenOptions::new()
                .read(true)
                .append(true)
                .create(create)
                .mode(0o640)
                .open(path);
            let file = match opened {
                Ok(file) => file,
                Err(e) if !create && e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => {
                    return Err(MetlError::Lock(format!(
                        "unable to open {}: {}",
                        path.display(),
                        e
                    )))
                }
            };

            let guard = Self::acquire(file)?;
            let held = guard.file.metadata()?;
            match std::fs::metadata(path) {
                Ok(current) if current.dev() == held.dev() && current.ino() == held.ino() => {
                    return Ok(Some(guard));
                }
                _ => debug!(file = %path.display(), "File replaced while waiting for lock, retrying"),
            }
        }
    }

    fn acquire(file: File) -> Result<Self> {
        loop {
            // SAFETY: the descriptor is owned by `file` and open for the call.
            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
            if rc == 0 {
                return Ok(Self { file });
            }
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                return Err(MetlError::Lock(format!("failed to lock file: {}", err)));
            }
        }
    }

    pub(crate) fn read_all(&mut self) -> Result<String> {
        let mut contents = String::new();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_string(&mut contents)?;
        Ok(contents)
    }

    /// Append to the locked file.
    pub(crate) fn append(&mut self, data: &str) -> Result<()> {
        self.file
            .write_all(data.as_bytes())
            .and_then(|_| self.file.sync_data())
            .map_err(|e| MetlError::Lock(format!("unable to append: {}", e)))
    }

    /// Atomically replace the file at `path` (the one this guard holds) with
    /// `contents`, via a temp file in the same directory.
    pub(crate) fn replace(&self, path: &Path, contents: &str) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)
            .map_err(|e| MetlError::Lock(format!("unable to create temporary file: {}", e)))?;
        tmp.write_all(contents.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| MetlError::Lock(format!("unable to write temporary file: {}", e)))?;
        if let Ok(meta) = self.file.metadata() {
            let _ = tmp.as_file().set_permissions(meta.permissions());
        }
        tmp.persist(path)
            .map_err(|e| MetlError::Lock(format!("failed to replace {}: {}", path.display(), e.error)))?;
        Ok(())
    }
}

impl Drop for FlockGuard {
    fn drop(&mut self) {
        // SAFETY: as above; the file is closed right after.
        let rc = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
        if rc != 0 {
            warn!(error = %std::io::Error::last_os_error(), "Failed to release file lock");
        }
    }
}

/// Job lock backed by a single shared file.
#[derive(Debug, Clone)]
pub struct JobLock {
    path: PathBuf,
}

impl JobLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.lock_file())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record `name` as running. Fails with [`MetlError::AlreadyRunning`]
    /// if it already has an entry.
    pub fn lock(&self, name: &str) -> Result<()> {
        validate_job_name(name)?;
        info!(job = %name, "Locking job");

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_private_dir(parent)?;
        }

        let mut guard = FlockGuard::open(&self.path, true)?.ok_or_else(|| {
            MetlError::Lock(format!("lock file {} vanished", self.path.display()))
        })?;
        let contents = guard.read_all()?;

        if contents.lines().any(|line| line_name(line) == name) {
            return Err(MetlError::AlreadyRunning(name.to_string()));
        }

        let mut line = String::new();
        if !contents.is_empty() && !contents.ends_with('\n') {
            line.push('\n');
        }
        line.push_str(&format!("{}|{}\n", name, Utc::now().timestamp()));

        guard.append(&line)
    }

    /// Remove `name`'s entry. A missing file or missing entry is a no-op.
    pub fn unlock(&self, name: &str) -> Result<()> {
        info!(job = %name, "Unlocking job");

        let Some(mut guard) = FlockGuard::open(&self.path, false)? else {
            debug!(file = %self.path.display(), "No lock file, nothing to unlock");
            return Ok(());
        };
        let contents = guard.read_all()?;

        let mut kept = String::with_capacity(contents.len());
        let mut removed = 0;
        for line in contents.lines() {
            if line_name(line) == name {
                removed += 1;
            } else if !line.is_empty() {
                kept.push_str(line);
                kept.push('\n');
            }
        }
        if removed == 0 {
            debug!(job = %name, "Job was not locked");
            return Ok(());
        }

        guard.replace(&self.path, &kept)?;
        drop(guard);
        Ok(())
    }

    /// Jobs currently recorded as running. Lock-free; malformed lines are
    /// skipped.
    pub fn status(&self) -> Result<Vec<LockEntry>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for line in contents.lines().filter(|l| !l.trim().is_empty()) {
            let Some((name, epoch)) = parse_line(line) else {
                warn!(line = %line, "Skipping malformed lock entry");
                continue;
            };
            let Some(since) = DateTime::from_timestamp(epoch, 0) else {
                warn!(line = %line, "Skipping lock entry with invalid timestamp");
                continue;
            };
            entries.push(LockEntry {
                name: name.to_string(),
                since,
            });
        }
        Ok(entries)
    }
}

/// Owner of a line: the text before the first `|`, whether or not the
/// rest is a valid timestamp.
fn line_name(line: &str) -> &str {
    line.split('|').next().unwrap_or_default()
}

/// Split a `name|epoch` line.
fn parse_line(line: &str) -> Option<(&str, i64)> {
    let (name, epoch) = line.split_once('|')?;
    if name.is_empty() {
        return None;
    }
    Some((name, epoch.trim().parse().ok()?))
}
