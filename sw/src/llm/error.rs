//! Text generation error types

use std::time::Duration;
use thiserror::Error;

/// Errors a text generator can report
///
/// Implementations map provider failures onto these; the engine only
/// distinguishes [`LlmError::Cancelled`] from everything else.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Provider returned {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Generation cancelled")]
    Cancelled,

    #[error("Text generator unavailable: {0}")]
    Unavailable(String),
}

impl LlmError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LlmError::Cancelled)
    }
}
