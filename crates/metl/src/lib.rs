//! # metl
//!
//! Declarative batch row-transformation engine.
//!
//! A job fetches one input file, parses it into rows, validates, transforms
//! and renames each row's fields according to column rules, and writes the
//! surviving rows to an output sink:
//!
//! - **Fetching** from `file://` and `http(s)://` locators, staged atomically
//! - **Parsing** CSV with optional preamble skip and header row
//! - **Processing** on a pool of parallel workers with exact row counters
//! - **Outputting** to stdout (JSON lines) or a MySQL table
//! - **Job locking** through a host-wide `flock`ed lock file
//! - **Notifications** to the log and to webhooks on completion
//!
//! ## Example
//!
//! ```rust,no_run
//! use metl::{Orchestrator, Settings};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> metl::Result<()> {
//!     let settings = Settings::new("/var/lib/metl", "/etc/metl/jobs");
//!     let summary = Orchestrator::load(&settings, "orders")?
//!         .run(CancellationToken::new())
//!         .await?;
//!     println!("accepted {} of {} rows", summary.accepted, summary.rows);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod fetch;
pub mod lock;
pub mod notify;
pub mod orchestrator;
pub mod pipeline;
pub mod rules;
pub mod schedule;
pub mod sink;
pub mod source;
pub mod transform;

// Re-exports for convenient access
pub use config::{discover_jobs, JobDefinition, Settings};
pub use crate::core::{ProcessedRow, RawRow};
pub use error::{MetlError, Result};
pub use lock::{JobLock, LockEntry};
pub use notify::{Message, Notifier};
pub use orchestrator::Orchestrator;
pub use pipeline::{PipelineEngine, RunStats, RunSummary};
pub use rules::{ColumnRule, ColumnRules, ColumnType, FailurePolicy};
pub use schedule::CronRegistry;
pub use transform::process;
