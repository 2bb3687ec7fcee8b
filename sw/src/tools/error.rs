//! Tool error types

use thiserror::Error;

/// Errors a tool registry can report for a call
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {name}")]
    UnknownTool { name: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{message}")]
    Failed { message: String },

    #[error("Tool provider unavailable: {0}")]
    Unavailable(String),
}

impl ToolError {
    pub fn failed(message: impl Into<String>) -> Self {
        ToolError::Failed {
            message: message.into(),
        }
    }
}
