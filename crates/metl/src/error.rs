//! Error types for the metl library.

use thiserror::Error;

/// Main error type for job operations.
///
/// Only configuration, transport and lock errors ever surface from a run.
/// Per-record validation failures, sink write failures and notifier failures
/// are absorbed where they happen and show up in counters and logs.
#[derive(Error, Debug)]
pub enum MetlError {
    /// Configuration error (malformed job file, unknown engine, bad rule)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input artifact could not be fetched or opened
    #[error("Transport error for {locator}: {message}")]
    Transport { locator: String, message: String },

    /// Transform template failed to compile or render
    #[error("Template error in column {column}: {message}")]
    Template { column: String, message: String },

    /// Advisory lock or lock file manipulation failed
    #[error("Lock error: {0}")]
    Lock(String),

    /// Another instance of the job holds the lock
    #[error("Job {0} is already running")]
    AlreadyRunning(String),

    /// Job already present in the schedule file
    #[error("Job {0} is already added")]
    AlreadyRegistered(String),

    /// Output sink rejected a row or failed to write
    #[error("Sink error: {0}")]
    Sink(String),

    /// A notifier failed to deliver its message
    #[error("Notification error: {0}")]
    Notify(String),

    /// A pipeline stage task panicked or was aborted
    #[error("Pipeline failed in {stage}: {message}")]
    Pipeline { stage: String, message: String },

    /// Run was cancelled (SIGINT, SIGTERM)
    #[error("Job cancelled")]
    Cancelled,

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MySQL driver error
    #[error("MySQL error: {0}")]
    Mysql(#[from] mysql_async::Error),
}

impl MetlError {
    /// Create a Transport error for the given locator.
    pub fn transport(locator: impl Into<String>, message: impl ToString) -> Self {
        MetlError::Transport {
            locator: locator.into(),
            message: message.to_string(),
        }
    }

    /// Create a Template error for the given column.
    pub fn template(column: impl Into<String>, message: impl ToString) -> Self {
        MetlError::Template {
            column: column.into(),
            message: message.to_string(),
        }
    }

    /// Create a Pipeline error for a stage task that did not finish.
    pub fn pipeline(stage: impl Into<String>, message: impl ToString) -> Self {
        MetlError::Pipeline {
            stage: stage.into(),
            message: message.to_string(),
        }
    }

    /// Process exit code for this error. Every fatal condition maps to 1.
    pub fn exit_code(&self) -> u8 {
        1
    }

    /// Render the error as a single diagnostic line, flattening any source chain.
    pub fn one_line(&self) -> String {
        let mut output = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            let cause = err.to_string();
            if !output.contains(&cause) {
                output.push_str(": ");
                output.push_str(&cause);
            }
            source = err.source();
        }
        output.replace('\n', " ")
    }
}

/// Result type alias for metl operations.
pub type Result<T> = std::result::Result<T, MetlError>;
