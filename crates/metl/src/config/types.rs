//! Job definition types, deserialized from a job's YAML file.

use serde::{Deserialize, Serialize};

use crate::rules::ColumnRule;

/// Root of a job file. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    /// Job name; also the key in the lock file. Must not contain `|`.
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub author: String,

    /// Cron expression used when the job is added to the schedule file.
    #[serde(default = "default_schedule")]
    pub schedule: String,

    /// Completion notification targets.
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// The fetch/parse/process/output stages.
    pub job: StagesConfig,
}

/// Completion notification targets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Emit the completion message through the log.
    #[serde(default)]
    pub log: bool,

    /// Webhook URLs that receive a JSON POST on completion.
    #[serde(default)]
    pub webhooks: Vec<String>,
}

/// The four stages of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagesConfig {
    pub fetching: FetchingConfig,
    pub parsing: EngineConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    pub outputting: EngineConfig,
}

/// Where the input artifact comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchingConfig {
    /// Scheme-prefixed locator: `file:///data/in.csv`, `https://host/in.csv`.
    pub file: String,
}

/// An engine selected by name plus its free-form options.
///
/// Options are decoded into the engine's typed option struct when the
/// engine is resolved, so unknown engines and bad options fail there.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: String,

    #[serde(default)]
    pub options: serde_yaml::Mapping,
}

impl EngineConfig {
    /// Decode the options map into a typed options struct.
    pub fn options_as<T: serde::de::DeserializeOwned>(&self) -> crate::Result<T> {
        let value = serde_yaml::Value::Mapping(self.options.clone());
        serde_yaml::from_value(value).map_err(|e| {
            crate::MetlError::Config(format!("invalid options for engine '{}': {}", self.engine, e))
        })
    }
}

/// Row processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Number of parallel transformer workers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Columns appended (empty) to every raw row before transformation.
    #[serde(default)]
    pub add_columns: Vec<String>,

    /// Ignore type-check failures for every column.
    #[serde(default)]
    pub allow_empty: bool,

    /// Ordered column rules.
    #[serde(default)]
    pub columns: Vec<ColumnRule>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            add_columns: Vec::new(),
            allow_empty: false,
            columns: Vec::new(),
        }
    }
}

fn default_workers() -> usize {
    1
}

fn default_schedule() -> String {
    "@daily".to_string()
}
