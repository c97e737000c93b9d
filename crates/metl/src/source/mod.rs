//! Row sources: open a staged input file and yield raw rows.

mod csv;

pub use self::csv::{CsvOptions, CsvSource};

use std::path::Path;

use crate::config::EngineConfig;
use crate::core::RawRow;
use crate::error::{MetlError, Result};

/// Yields raw rows from an opened resource.
///
/// Sources are synchronous; the pipeline drives them from a blocking task.
/// `advance` returns `false` on exhaustion and also on a read error, which
/// the source logs itself. Only `open` failures are fatal.
pub trait RowSource: Send {
    /// Open the resource at `path`.
    fn open(&mut self, path: &Path) -> Result<()>;

    /// Move to the next record.
    fn advance(&mut self) -> bool;

    /// Take the current record. Valid once after each successful `advance`.
    fn row(&mut self) -> RawRow;

    /// Release the resource.
    fn close(&mut self) {}

    /// Engine name for logging.
    fn name(&self) -> &'static str;

    /// Advance and take the next record in one step.
    fn next_row(&mut self) -> Option<RawRow> {
        if self.advance() {
            Some(self.row())
        } else {
            None
        }
    }
}

/// Build the source selected by the job's parsing engine.
pub fn source_for(config: &EngineConfig) -> Result<Box<dyn RowSource>> {
    match config.engine.as_str() {
        "csv" => Ok(Box::new(CsvSource::new(config.options_as()?))),
        other => Err(MetlError::Config(format!(
            "parse engine '{}' does not exist",
            other
        ))),
    }
}
