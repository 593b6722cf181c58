use std::path::Path;

use anyhow::{Context, Result};
use minijinja::Environment;

pub const CHECK_RUN: &str = "check_run.md";

const CHECK_RUN_SOURCE: &str = include_str!("../templates/check_run.md");

/// Feedback templates, parsed once at startup.
pub struct Templates {
    env: Environment<'static>,
}

impl Templates {
    /// Loads the built-in templates, replacing the check run body with `check_run` when given.
    pub fn new(check_run: Option<&Path>) -> Result<Self> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_filter("short_sha", short_sha);
        let source = match check_run {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read template {}", path.display()))?,
            None => CHECK_RUN_SOURCE.to_string(),
        };
        env.add_template_owned(CHECK_RUN, source).context("Failed to parse check run template")?;
        Ok(Self { env })
    }

    pub fn render<S>(&self, template_name: &str, context: S) -> Result<String>
    where S: serde::Serialize {
        let template = self.env.get_template(template_name).context("Failed to get template")?;
        template.render(context).context("Failed to render template")
    }
}

fn short_sha(value: String) -> String { value.chars().take(7).collect() }
