//! Job definition validation.

use super::JobDefinition;
use crate::error::{MetlError, Result};
use crate::fetch::Locator;

/// Validate a job definition.
pub fn validate(job: &JobDefinition) -> Result<()> {
    validate_job_name(&job.name)?;

    if job.job.fetching.file.is_empty() {
        return Err(MetlError::Config("job.fetching.file is required".into()));
    }
    Locator::parse(&job.job.fetching.file)?;

    if job.job.parsing.engine.is_empty() {
        return Err(MetlError::Config("job.parsing.engine is required".into()));
    }
    if job.job.outputting.engine.is_empty() {
        return Err(MetlError::Config("job.outputting.engine is required".into()));
    }

    if job.job.processing.workers == 0 {
        return Err(MetlError::Config(
            "job.processing.workers must be at least 1".into(),
        ));
    }

    for column in &job.job.processing.columns {
        column.validate()?;
    }

    Ok(())
}

/// Job names end up in the `name|epoch` lock file format.
pub fn validate_job_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MetlError::Config("job name is required".into()));
    }
    if name.contains('|') || name.contains('\n') || name.contains('\r') {
        return Err(MetlError::Config(format!(
            "job name '{}' must not contain '|' or line breaks",
            name.escape_default()
        )));
    }
    Ok(())
}
