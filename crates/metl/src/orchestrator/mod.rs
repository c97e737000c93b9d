//! Job run orchestrator: lock, fetch, pipeline, unlock.

use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{JobDefinition, Settings};
use crate::error::{MetlError, Result};
use crate::fetch::fetch;
use crate::lock::JobLock;
use crate::notify::notifiers_from;
use crate::pipeline::{PipelineEngine, RunSummary};
use crate::sink::sink_for;
use crate::source::source_for;

/// Runs one job end to end.
pub struct Orchestrator<'a> {
    settings: &'a Settings,
    job: JobDefinition,
    workers: Option<usize>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(settings: &'a Settings, job: JobDefinition) -> Self {
        Self {
            settings,
            job,
            workers: None,
        }
    }

    /// Load `<job_files>/<name>.yaml` and build an orchestrator for it.
    pub fn load(settings: &'a Settings, name: &str) -> Result<Self> {
        let job = JobDefinition::load(settings.job_file(name))?;
        if job.name != name {
            warn!(file = %name, job = %job.name, "Job file name differs from job name");
        }
        Ok(Self::new(settings, job))
    }

    /// Override the configured worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn job(&self) -> &JobDefinition {
        &self.job
    }

    /// Run the job. The lock taken at the start is released on success and
    /// on every error; only a hard crash leaves it behind.
    pub async fn run(self, cancel: CancellationToken) -> Result<RunSummary> {
        let started = Instant::now();
        let name = self.job.name.clone();

        self.settings.ensure_storage()?;
        let lock = JobLock::from_settings(self.settings);
        lock.lock(&name)?;

        let result = self.run_locked(started, cancel).await;

        match (lock.unlock(&name), &result) {
            (Err(e), Ok(_)) => return Err(e),
            (Err(e), Err(_)) => warn!(job = %name, error = %e, "Failed to release job lock"),
            _ => {}
        }
        result
    }

    async fn run_locked(&self, started: Instant, cancel: CancellationToken) -> Result<RunSummary> {
        let job = &self.job;
        let mut processing = job.job.processing.clone();
        if let Some(workers) = self.workers {
            processing.workers = workers;
        }

        let engine = PipelineEngine::from_config(&job.name, &processing)?
            .with_notifiers(notifiers_from(&job.notifications))
            .started_at(started);
        let source = source_for(&job.job.parsing)?;
        let sink = sink_for(&job.job.outputting)?;

        let download_dir = self.settings.download_dir(&job.name);
        let input = tokio::select! {
            _ = cancel.cancelled() => return Err(MetlError::Cancelled),
            input = fetch(&job.job.fetching.file, &download_dir) => input?,
        };

        info!(
            job = %job.name,
            parser = source.name(),
            output = sink.name(),
            workers = engine.workers(),
            "Running job"
        );
        engine.run(source, input, sink, cancel).await
    }
}
