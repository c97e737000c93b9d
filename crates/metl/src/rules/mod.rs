//! Column rules: per-field validation, transform and rename settings.
//!
//! A [`ColumnRules`] set is built once per run, validated, and then shared
//! read-only by every transformer worker.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{MetlError, Result};
use crate::transform::Templates;

/// Declared type of a column value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    String,
    Int,
    Bool,
    Float,
    /// No type checking.
    #[default]
    Variable,
}

/// What happens to a row when one of its fields fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Drop the entire row.
    Reject,
    /// Keep the row; see the transformer for per-check field handling.
    /// Any value other than `reject` means keep.
    #[default]
    #[serde(other)]
    Keep,
}

/// Rule for one source field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnRule {
    /// Source field name.
    pub name: String,

    /// Target field name; empty keeps the source name.
    #[serde(default)]
    pub mapping: String,

    #[serde(default, rename = "type")]
    pub column_type: ColumnType,

    /// Handlebars template applied to the value after validation.
    #[serde(default)]
    pub transform: Option<String>,

    #[serde(default)]
    pub discard: bool,

    #[serde(default)]
    pub failure: FailurePolicy,

    #[serde(default)]
    pub allow_empty: bool,

    /// Exact length in characters; 0 means unconstrained.
    #[serde(default)]
    pub length: usize,

    /// Inclusive `[low, high]` bounds; only the first character of each is used.
    #[serde(default)]
    pub character_range: Vec<String>,

    /// Reserved.
    #[serde(default)]
    pub precision: u32,
}

impl ColumnRule {
    /// Create a pass-through rule for `name` with the given type.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            ..Default::default()
        }
    }

    pub fn mapped_to(mut self, target: impl Into<String>) -> Self {
        self.mapping = target.into();
        self
    }

    pub fn with_failure(mut self, failure: FailurePolicy) -> Self {
        self.failure = failure;
        self
    }

    pub fn with_transform(mut self, template: impl Into<String>) -> Self {
        self.transform = Some(template.into());
        self
    }

    pub fn with_length(mut self, length: usize) -> Self {
        self.length = length;
        self
    }

    pub fn with_range(mut self, low: impl Into<String>, high: impl Into<String>) -> Self {
        self.character_range = vec![low.into(), high.into()];
        self
    }

    pub fn allowing_empty(mut self) -> Self {
        self.allow_empty = true;
        self
    }

    pub fn discarded(mut self) -> Self {
        self.discard = true;
        self
    }

    /// Name the value is stored under in the processed row.
    pub fn target_name<'a>(&'a self, source: &'a str) -> &'a str {
        if self.mapping.is_empty() {
            source
        } else {
            &self.mapping
        }
    }

    /// Inclusive character bounds, if a range is configured.
    pub fn range_bounds(&self) -> Option<(char, char)> {
        match self.character_range.as_slice() {
            [low, high] => Some((low.chars().next()?, high.chars().next()?)),
            _ => None,
        }
    }

    /// The transform template, if one is set and non-empty.
    pub fn template(&self) -> Option<&str> {
        self.transform.as_deref().filter(|t| !t.is_empty())
    }

    /// Check the rule for construction-time errors.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(MetlError::Config("column rule name is required".into()));
        }
        match self.character_range.as_slice() {
            [] => {}
            [low, high] if !low.is_empty() && !high.is_empty() => {}
            other => {
                return Err(MetlError::Config(format!(
                    "column {}: character_range needs two non-empty bounds, got {:?}",
                    self.name, other
                )))
            }
        }
        Ok(())
    }
}

/// Validated, indexed rule set shared by all transformer workers.
#[derive(Debug)]
pub struct ColumnRules {
    rules: HashMap<String, ColumnRule>,
    default_rule: ColumnRule,
    templates: Templates,
}

impl ColumnRules {
    /// Build a rule set. `allow_empty` is the job-level flag and is applied
    /// to every rule on top of the rule's own setting.
    pub fn new(columns: impl IntoIterator<Item = ColumnRule>, allow_empty: bool) -> Result<Self> {
        let mut rules = HashMap::new();
        let mut templates = Templates::new();

        for mut rule in columns {
            rule.validate()?;
            rule.allow_empty |= allow_empty;

            debug!(
                name = %rule.name,
                mapping = %rule.mapping,
                column_type = ?rule.column_type,
                discard = rule.discard,
                transform = ?rule.transform,
                "Loading column processing rules"
            );

            if let Some(template) = rule.template() {
                templates.register(&rule.name, template)?;
            }
            if let Some(previous) = rules.insert(rule.name.clone(), rule) {
                warn!(name = %previous.name, "Duplicate column rule, last definition wins");
            }
        }

        Ok(Self {
            rules,
            default_rule: ColumnRule::default(),
            templates,
        })
    }

    /// An empty rule set: every field passes through unchanged.
    pub fn pass_through() -> Self {
        Self {
            rules: HashMap::new(),
            default_rule: ColumnRule::default(),
            templates: Templates::new(),
        }
    }

    /// Rule for a source field. Unknown names get the default pass-through
    /// rule (type `variable`, no rename, no transform).
    pub fn get(&self, source: &str) -> &ColumnRule {
        self.rules.get(source).unwrap_or(&self.default_rule)
    }

    /// Whether an explicit rule exists for this source name.
    pub fn contains(&self, source: &str) -> bool {
        self.rules.contains_key(source)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub(crate) fn templates(&self) -> &Templates {
        &self.templates
    }
}
