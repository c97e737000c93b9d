//! Host-wide settings shared by the lock, schedule and run components.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;

const LOCK_FILE: &str = "state.lock";
const CRONTAB_FILE: &str = "crontab";
const DOWNLOAD_DIR: &str = "downloads";

/// Paths and commands shared by every component on this host.
///
/// Built once by the command layer and passed by reference; nothing in the
/// library reads the environment on its own.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root for downloaded files, the lock file and the schedule file.
    pub local_storage: PathBuf,

    /// Directory containing `<job>.yaml` files.
    pub job_files: PathBuf,

    /// Directory that scheduled runs append their output to.
    pub log_dir: PathBuf,

    /// Command prefix written into the schedule file.
    pub run_command: String,
}

impl Settings {
    /// Create settings rooted at `local_storage`, reading jobs from `job_files`.
    pub fn new(local_storage: impl Into<PathBuf>, job_files: impl Into<PathBuf>) -> Self {
        Self {
            local_storage: local_storage.into(),
            job_files: job_files.into(),
            log_dir: PathBuf::from("/var/log/metl"),
            run_command: "/usr/bin/env metl".to_string(),
        }
    }

    /// Override the log directory used in schedule entries.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    /// Override the command prefix used in schedule entries.
    pub fn with_run_command(mut self, command: impl Into<String>) -> Self {
        self.run_command = command.into();
        self
    }

    /// Path of the host-wide lock file.
    pub fn lock_file(&self) -> PathBuf {
        self.local_storage.join(LOCK_FILE)
    }

    /// Path of the schedule (crontab) file.
    pub fn crontab_file(&self) -> PathBuf {
        self.local_storage.join(CRONTAB_FILE)
    }

    /// Staging directory for a job's fetched input.
    pub fn download_dir(&self, job: &str) -> PathBuf {
        self.local_storage.join(DOWNLOAD_DIR).join(job)
    }

    /// Path of a job's definition file.
    pub fn job_file(&self, job: &str) -> PathBuf {
        self.job_files.join(format!("{}.yaml", job))
    }

    /// Create the local storage directory if it is missing.
    pub fn ensure_storage(&self) -> Result<()> {
        debug!(dir = %self.local_storage.display(), "Checking local storage directory");
        create_private_dir(&self.local_storage)
    }
}

/// Create a directory tree readable only by owner and group.
pub(crate) fn create_private_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o750)
            .create(dir)?;
    }
    #[cfg(not(unix))]
    std::fs::create_dir_all(dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_paths() {
        let settings = Settings::new("/srv/metl", "/etc/metl/jobs");
        assert_eq!(settings.lock_file(), PathBuf::from("/srv/metl/state.lock"));
        assert_eq!(settings.crontab_file(), PathBuf::from("/srv/metl/crontab"));
        assert_eq!(
            settings.download_dir("orders"),
            PathBuf::from("/srv/metl/downloads/orders")
        );
        assert_eq!(
            settings.job_file("orders"),
            PathBuf::from("/etc/metl/jobs/orders.yaml")
        );
    }

    #[test]
    fn test_ensure_storage_creates_nested_dir() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("a").join("b");
        let settings = Settings::new(&root, dir.path());
        settings.ensure_storage().unwrap();
        assert!(root.is_dir());
        // idempotent
        settings.ensure_storage().unwrap();
    }
}
