//! Schedule registry: the crontab file jobs are added to.
//!
//! Entries are written to `<local_storage>/crontab`; installing that file
//! into the system crontab is left to the operator.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::{create_private_dir, validate_job_name, JobDefinition, Settings};
use crate::error::{MetlError, Result};
use crate::lock::FlockGuard;

/// Append-once registry of scheduled jobs.
#[derive(Debug, Clone)]
pub struct CronRegistry {
    path: PathBuf,
    log_dir: PathBuf,
    run_command: String,
}

impl CronRegistry {
    pub fn new(path: impl Into<PathBuf>, log_dir: impl Into<PathBuf>, run_command: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            log_dir: log_dir.into(),
            run_command: run_command.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.crontab_file(),
            &settings.log_dir,
            settings.run_command.clone(),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The line registering `job`.
    pub fn entry_for(&self, job: &JobDefinition) -> String {
        format!(
            "{} {} run {} >> {}",
            job.schedule,
            self.run_command,
            job.name,
            self.log_dir.join(format!("{}.log", job.name)).display()
        )
    }

    /// Register `job`. Fails with [`MetlError::AlreadyRegistered`] if a line
    /// already runs it.
    pub fn add(&self, job: &JobDefinition) -> Result<()> {
        validate_job_name(&job.name)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_private_dir(parent)?;
        }

        let mut guard = FlockGuard::open(&self.path, true)?.ok_or_else(|| {
            MetlError::Lock(format!("schedule file {} vanished", self.path.display()))
        })?;
        let contents = guard.read_all()?;

        if contents.lines().filter_map(scheduled_job).any(|n| n == job.name) {
            return Err(MetlError::AlreadyRegistered(job.name.clone()));
        }

        let mut updated = String::with_capacity(contents.len() + 128);
        for line in contents.lines() {
            updated.push_str(line);
            updated.push('\n');
        }
        updated.push_str(&self.entry_for(job));
        updated.push('\n');

        guard.replace(&self.path, &updated)?;
        info!(job = %job.name, schedule = %job.schedule, file = %self.path.display(), "Job added to schedule");
        Ok(())
    }

    /// Names of the jobs registered in the file, in file order.
    pub fn registered(&self) -> Result<Vec<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(contents
                .lines()
                .filter_map(scheduled_job)
                .map(str::to_string)
                .collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

/// The job name in a schedule line: the token following `run`.
fn scheduled_job(line: &str) -> Option<&str> {
    let mut tokens = line.split_whitespace();
    tokens.by_ref().find(|t| *t == "run")?;
    tokens.next()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(name: &str) -> JobDefinition {
        JobDefinition::from_yaml(&format!(
            "name: {}\nschedule: \"0 3 * * *\"\njob:\n  fetching:\n    file: file:///tmp/in.csv\n  parsing:\n    engine: csv\n  outputting:\n    engine: stdout\n",
            name
        ))
        .unwrap()
    }

    fn registry(dir: &tempfile::TempDir) -> CronRegistry {
        CronRegistry::new(dir.path().join("crontab"), "/var/log/metl", "/usr/bin/env metl")
    }

    #[test]
    fn test_entry_format() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            registry(&dir).entry_for(&job("orders")),
            "0 3 * * * /usr/bin/env metl run orders >> /var/log/metl/orders.log"
        );
    }

    #[test]
    fn test_add_once() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir);
        registry.add(&job("orders")).unwrap();
        registry.add(&job("users")).unwrap();

        let err = registry.add(&job("orders")).unwrap_err();
        assert_eq!(err.to_string(), "Job orders is already added");
        assert_eq!(registry.registered().unwrap(), vec!["orders", "users"]);
    }

    #[test]
    fn test_prefix_names_are_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir);
        registry.add(&job("orders_full")).unwrap();
        registry.add(&job("orders")).unwrap();
        assert_eq!(registry.registered().unwrap().len(), 2);
    }

    #[test]
    fn test_foreign_lines_are_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir);
        std::fs::write(registry.path(), "# managed by ops\nMAILTO=ops@example.com\n").unwrap();
        registry.add(&job("orders")).unwrap();

        let contents = std::fs::read_to_string(registry.path()).unwrap();
        assert!(contents.starts_with("# managed by ops\nMAILTO=ops@example.com\n"));
        assert_eq!(registry.registered().unwrap(), vec!["orders"]);
    }

    #[test]
    fn test_registered_without_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(registry(&dir).registered().unwrap().is_empty());
    }
}
