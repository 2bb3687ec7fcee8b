//! Prompt renderer
//!
//! Loads templates from an override directory or falls back to the embedded
//! defaults, then renders them with handlebars.

use std::path::{Path, PathBuf};

use handlebars::{Handlebars, no_escape};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::embedded;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Prompt template not found: {0}")]
    NotFound(String),

    #[error("Failed to read prompt {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to render template {name}: {message}")]
    Render { name: String, message: String },
}

/// Loads and renders prompt templates
pub struct PromptRenderer {
    hbs: Handlebars<'static>,
    /// Override directory holding `{name}.pmt` files
    dir: Option<PathBuf>,
}

impl std::fmt::Debug for PromptRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptRenderer").field("dir", &self.dir).finish()
    }
}

impl Default for PromptRenderer {
    fn default() -> Self {
        Self::embedded_only()
    }
}

impl PromptRenderer {
    /// Renderer that prefers templates found in `dir`
    pub fn new(dir: Option<&Path>) -> Self {
        debug!(?dir, "PromptRenderer::new: called");
        let dir = dir.filter(|d| d.exists()).map(Path::to_path_buf);
        if dir.is_none() {
            debug!("PromptRenderer::new: no override directory");
        }
        Self { hbs: engine(), dir }
    }

    /// Renderer that only uses embedded prompts
    pub fn embedded_only() -> Self {
        debug!("PromptRenderer::embedded_only: called");
        Self { hbs: engine(), dir: None }
    }

    fn load_template(&self, name: &str) -> Result<String, PromptError> {
        debug!(%name, "PromptRenderer::load_template: called");
        if let Some(dir) = &self.dir {
            let path = dir.join(format!("{}.pmt", name));
            if path.exists() {
                debug!(?path, "PromptRenderer::load_template: found override");
                return std::fs::read_to_string(&path).map_err(|source| PromptError::Read { path, source });
            }
        }

        embedded::get_embedded(name)
            .map(str::to_string)
            .ok_or_else(|| PromptError::NotFound(name.to_string()))
    }

    /// Render a template with the given context
    pub fn render<T: Serialize>(&self, name: &str, context: &T) -> Result<String, PromptError> {
        debug!(%name, "PromptRenderer::render: called");
        let template = self.load_template(name)?;
        self.hbs
            .render_template(&template, context)
            .map_err(|e| PromptError::Render {
                name: name.to_string(),
                message: e.to_string(),
            })
    }
}

fn engine() -> Handlebars<'static> {
    let mut hbs = Handlebars::new();
    hbs.register_escape_fn(no_escape);
    hbs
}
