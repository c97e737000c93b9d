//! Row sinks: buffered write targets for processed rows.

mod console;
mod mysql;

pub use console::ConsoleSink;
pub use mysql::{MysqlOptions, MysqlSink};

use async_trait::async_trait;

use crate::config::EngineConfig;
use crate::core::ProcessedRow;
use crate::error::{MetlError, Result};

/// Write target for processed rows.
///
/// `write` errors are per-row: the pipeline logs them, drops the row and
/// keeps going. `open` errors are fatal to the run.
#[async_trait]
pub trait RowSink: Send {
    /// Prepare the sink for writing.
    async fn open(&mut self) -> Result<()>;

    /// Write (or buffer) one row.
    async fn write(&mut self, row: ProcessedRow) -> Result<()>;

    /// Flush anything buffered and release resources.
    async fn close(&mut self) -> Result<()>;

    /// Release resources after a failed or cancelled run without committing
    /// buffered rows. Sinks that do not buffer can rely on `close`.
    async fn abort(&mut self) -> Result<()> {
        self.close().await
    }

    /// Engine name for logging.
    fn name(&self) -> &'static str;
}

/// Build the sink selected by the job's output engine.
pub fn sink_for(config: &EngineConfig) -> Result<Box<dyn RowSink>> {
    match config.engine.as_str() {
        "stdout" => Ok(Box::new(ConsoleSink::stdout())),
        "mysql" => Ok(Box::new(MysqlSink::new(config.options_as()?)?)),
        other => Err(MetlError::Config(format!(
            "output engine '{}' does not exist",
            other
        ))),
    }
}
