//! Transform templates compiled once per rule set.
//!
//! The render context is the current field value, so a template refers to
//! it as `{{this}}`. Helpers: `toUpper`, `toLower`, and `now "<strftime>"`.

use std::fmt::Write as _;

use chrono::Local;
use handlebars::{
    handlebars_helper, no_escape, Context, Handlebars, Helper, HelperResult, Output,
    RenderContext, RenderErrorReason,
};

use crate::error::{MetlError, Result};

const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

handlebars_helper!(to_upper: |s: str| s.to_uppercase());
handlebars_helper!(to_lower: |s: str| s.to_lowercase());

fn now_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let format = h
        .param(0)
        .and_then(|p| p.value().as_str())
        .unwrap_or(DEFAULT_TIME_FORMAT);

    let mut rendered = String::new();
    write!(rendered, "{}", Local::now().format(format))
        .map_err(|_| RenderErrorReason::Other(format!("invalid time format '{}'", format)))?;
    out.write(&rendered)?;
    Ok(())
}

/// Compiled transform templates keyed by source column name.
pub struct Templates {
    registry: Handlebars<'static>,
}

impl Templates {
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(false);
        registry.register_escape_fn(no_escape);
        registry.register_helper("toUpper", Box::new(to_upper));
        registry.register_helper("toLower", Box::new(to_lower));
        registry.register_helper("now", Box::new(now_helper));
        Self { registry }
    }

    /// Compile and register the template for a column.
    pub fn register(&mut self, column: &str, template: &str) -> Result<()> {
        self.registry
            .register_template_string(column, template)
            .map_err(|e| MetlError::template(column, e))
    }

    /// Render the column's template with `value` as context.
    pub fn render(&self, column: &str, value: &str) -> Result<String> {
        self.registry
            .render(column, &value)
            .map_err(|e| MetlError::template(column, e))
    }
}

impl Default for Templates {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Templates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.registry.get_templates().keys().collect();
        names.sort();
        f.debug_struct("Templates").field("columns", &names).finish()
    }
}
