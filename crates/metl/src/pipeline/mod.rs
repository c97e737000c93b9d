//! Row pipeline: one reader, W transformer workers, one writer.
//!
//! ```text
//! RowSource ──raw queue──▶ worker × W ──processed queue──▶ RowSink
//! ```
//!
//! The reader runs on a blocking thread because sources are synchronous.
//! Workers share an immutable [`ColumnRules`] and the [`RunStats`] counters.
//! The processed queue is closed by a barrier task once every worker has
//! finished, so the writer drains everything before it sees end of input.
//! Row order across workers is not preserved. A failed or cancelled run
//! aborts the sink instead of closing it, so buffered rows are not committed.

mod stats;

pub use stats::{RunStats, RunSummary};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::future::try_join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ProcessingConfig;
use crate::core::{ProcessedRow, RawRow};
use crate::error::{MetlError, Result};
use crate::notify::{notify_all, Message, Notifier};
use crate::rules::ColumnRules;
use crate::sink::RowSink;
use crate::source::RowSource;
use crate::transform;

/// Queue slots per worker.
const QUEUE_DEPTH_PER_WORKER: usize = 64;

/// Runs one job's rows from a source to a sink.
pub struct PipelineEngine {
    job: String,
    rules: Arc<ColumnRules>,
    workers: usize,
    add_columns: Arc<Vec<String>>,
    notifiers: Vec<Arc<dyn Notifier>>,
    started: Option<Instant>,
}

impl PipelineEngine {
    pub fn new(job: impl Into<String>, rules: ColumnRules, workers: usize) -> Self {
        Self {
            job: job.into(),
            rules: Arc::new(rules),
            workers: workers.max(1),
            add_columns: Arc::new(Vec::new()),
            notifiers: Vec::new(),
            started: None,
        }
    }

    /// Build an engine from a job's processing section.
    pub fn from_config(job: impl Into<String>, config: &ProcessingConfig) -> Result<Self> {
        let rules = ColumnRules::new(config.columns.iter().cloned(), config.allow_empty)?;
        Ok(Self::new(job, rules, config.workers).with_add_columns(config.add_columns.clone()))
    }

    /// Columns appended, empty, to every raw row before transformation.
    pub fn with_add_columns(mut self, columns: Vec<String>) -> Self {
        self.add_columns = Arc::new(columns);
        self
    }

    pub fn with_notifiers(mut self, notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        self.notifiers = notifiers;
        self
    }

    /// Measure elapsed time from `started` instead of from the call to `run`.
    pub fn started_at(mut self, started: Instant) -> Self {
        self.started = Some(started);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run the pipeline to completion and notify on success.
    ///
    /// Fatal errors (source open, template render, sink open) close both
    /// queues so every stage winds down, then surface here. Cancellation
    /// yields [`MetlError::Cancelled`] and sends no notifications.
    pub async fn run(
        &self,
        source: Box<dyn RowSource>,
        input: PathBuf,
        sink: Box<dyn RowSink>,
        cancel: CancellationToken,
    ) -> Result<RunSummary> {
        let started = self.started.unwrap_or_else(Instant::now);
        let stats = Arc::new(RunStats::new());
        let capacity = self.workers * QUEUE_DEPTH_PER_WORKER;
        let (raw_tx, raw_rx) = async_channel::bounded::<RawRow>(capacity);
        let (processed_tx, processed_rx) = async_channel::bounded::<ProcessedRow>(capacity);

        info!(
            job = %self.job,
            workers = self.workers,
            rules = self.rules.len(),
            "Starting row pipeline"
        );

        let failed = cancel.child_token();
        let reader = self.spawn_reader(
            source,
            input,
            raw_tx,
            stats.clone(),
            cancel.clone(),
            failed.clone(),
        );

        let workers: Vec<JoinHandle<Result<()>>> = (0..self.workers)
            .map(|worker_id| {
                spawn_worker(
                    worker_id,
                    self.rules.clone(),
                    raw_rx.clone(),
                    processed_tx.clone(),
                    stats.clone(),
                    cancel.clone(),
                    failed.clone(),
                )
            })
            .collect();
        drop(raw_rx);

        let barrier_failed = failed.clone();
        let barrier = tokio::spawn(async move {
            let futures = workers.into_iter().map(|handle| async move {
                match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(MetlError::pipeline("worker", e)),
                }
            });
            let result = try_join_all(futures).await;
            if result.is_err() {
                barrier_failed.cancel();
            }
            processed_tx.close();
            result.map(|_| ())
        });

        let writer = spawn_writer(sink, processed_rx, failed);

        let (reader, barrier, writer) = tokio::join!(reader, barrier, writer);
        let reader = reader.map_err(|e| MetlError::pipeline("reader", e))?;
        let barrier = barrier.map_err(|e| MetlError::pipeline("barrier", e))?;
        let writer = writer.map_err(|e| MetlError::pipeline("writer", e))?;

        if cancel.is_cancelled() {
            return Err(MetlError::Cancelled);
        }
        reader?;
        barrier?;
        writer?;

        let summary = stats.summary(&self.job, started.elapsed());
        info!(
            job = %self.job,
            rows = summary.rows,
            accepted = summary.accepted,
            rejected = summary.rejected,
            elapsed = ?summary.elapsed,
            "Row pipeline finished"
        );

        if !self.notifiers.is_empty() {
            let message = Message {
                job: summary.job.clone(),
                status: "OK".to_string(),
                elapsed: summary.elapsed,
                rows: summary.rows,
                accepted: summary.accepted,
                rejected: summary.rejected,
            };
            notify_all(&self.notifiers, &message).await;
        }

        Ok(summary)
    }

    fn spawn_reader(
        &self,
        mut source: Box<dyn RowSource>,
        input: PathBuf,
        raw_tx: async_channel::Sender<RawRow>,
        stats: Arc<RunStats>,
        cancel: CancellationToken,
        failed: CancellationToken,
    ) -> JoinHandle<Result<()>> {
        let add_columns = self.add_columns.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = source.open(&input) {
                failed.cancel();
                raw_tx.close();
                return Err(e);
            }
            debug!(parser = source.name(), file = %input.display(), "Reading rows");

            while let Some(mut row) = source.next_row() {
                if cancel.is_cancelled() {
                    break;
                }
                for column in add_columns.iter() {
                    row.add_column(column);
                }
                if raw_tx.send_blocking(row).is_err() {
                    debug!("Raw row queue closed, reader stopping");
                    break;
                }
                stats.record_seen();
            }

            source.close();
            raw_tx.close();
            Ok(())
        })
    }
}

fn spawn_worker(
    worker_id: usize,
    rules: Arc<ColumnRules>,
    raw_rx: async_channel::Receiver<RawRow>,
    processed_tx: async_channel::Sender<ProcessedRow>,
    stats: Arc<RunStats>,
    cancel: CancellationToken,
    failed: CancellationToken,
) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        loop {
            let raw = tokio::select! {
                _ = cancel.cancelled() => {
                    raw_rx.close();
                    return Err(MetlError::Cancelled);
                }
                raw = raw_rx.recv() => match raw {
                    Ok(raw) => raw,
                    Err(_) => break,
                },
            };

            match transform::process(raw, &rules) {
                Ok(Some(row)) => {
                    if processed_tx.send(row).await.is_err() {
                        debug!(worker_id, "Processed row queue closed, worker stopping");
                        raw_rx.close();
                        break;
                    }
                    stats.record_accepted();
                }
                Ok(None) => {}
                Err(e) => {
                    failed.cancel();
                    raw_rx.close();
                    processed_tx.close();
                    return Err(e);
                }
            }
        }
        Ok(())
    })
}

fn spawn_writer(
    mut sink: Box<dyn RowSink>,
    processed_rx: async_channel::Receiver<ProcessedRow>,
    failed: CancellationToken,
) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        if let Err(e) = sink.open().await {
            processed_rx.close();
            return Err(e);
        }

        let mut written = 0u64;
        while let Ok(row) = processed_rx.recv().await {
            if failed.is_cancelled() {
                processed_rx.close();
                break;
            }
            match sink.write(row).await {
                Ok(()) => written += 1,
                Err(e) => warn!(output = sink.name(), error = %e, "Dropping row, sink write failed"),
            }
        }

        if failed.is_cancelled() {
            warn!(output = sink.name(), written, "Run failed, aborting sink without final flush");
            if let Err(e) = sink.abort().await {
                warn!(output = sink.name(), error = %e, "Sink abort failed");
            }
            return Ok(());
        }
        if let Err(e) = sink.close().await {
            warn!(output = sink.name(), error = %e, "Sink close failed");
        }
        debug!(output = sink.name(), written, "Sink drained");
        Ok(())
    })
}
