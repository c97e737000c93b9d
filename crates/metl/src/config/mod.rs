//! Configuration loading and validation.

mod settings;
mod types;
mod validation;

pub(crate) use settings::create_private_dir;
pub use settings::Settings;
pub use types::*;
pub use validation::validate_job_name;

use crate::error::Result;
use std::path::Path;
use tracing::{info, warn};

impl JobDefinition {
    /// Load a job definition from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(file = %path.display(), "Opening job file");
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a job definition from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let job: JobDefinition = serde_yaml::from_str(yaml)?;
        job.validate()?;
        Ok(job)
    }

    /// Validate the job definition.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

/// Load every `*.yaml` job definition in `dir`, sorted by name.
///
/// Files that fail to load or validate are skipped with a warning.
pub fn discover_jobs(dir: &Path) -> Result<Vec<JobDefinition>> {
    let mut jobs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_yaml = path
            .extension()
            .map_or(false, |ext| ext == "yaml" || ext == "yml");
        if !is_yaml || !path.is_file() {
            continue;
        }
        match std::fs::read_to_string(&path)
            .map_err(Into::into)
            .and_then(|content| JobDefinition::from_yaml(&content))
        {
            Ok(job) => jobs.push(job),
            Err(e) => warn!(file = %path.display(), error = %e, "Skipping unreadable job file"),
        }
    }
    jobs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(jobs)
}
