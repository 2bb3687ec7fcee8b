//! Placeholder replacement errors

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a placeholder could not be replaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlaceholderErrorKind {
    /// Referenced step has no result yet
    NotExecuted,
    /// Referenced step failed without a usable fallback
    StepFailed,
    /// Referenced field is absent from the recorded output
    FieldMissing,
    /// Referenced step was skipped and its fallback cannot supply the field
    MissingDependency,
    /// Nested or indexed paths are not addressable
    UnsupportedPath,
    /// Array narrowed to a scalar was empty
    EmptyArray,
}

/// A placeholder that could not be substituted from prior results
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct PlaceholderReplacementError {
    /// The placeholder as written, e.g. `{{s1.results}}`
    pub placeholder: String,
    /// Fields available on the referenced step's output (empty when it has none)
    pub available_fields: Vec<String>,
    /// Human-readable explanation
    pub message: String,
    pub kind: PlaceholderErrorKind,
}

impl PlaceholderReplacementError {
    pub fn new(
        kind: PlaceholderErrorKind,
        placeholder: impl Into<String>,
        available_fields: Vec<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            placeholder: placeholder.into(),
            available_fields,
            message: message.into(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_message() {
        let err = PlaceholderReplacementError::new(
            PlaceholderErrorKind::FieldMissing,
            "{{s1.urls}}",
            vec!["results".to_string()],
            "Field 'urls' not found in output of step s1",
        );
        assert_eq!(err.to_string(), "Field 'urls' not found in output of step s1");
        assert_eq!(err.available_fields, vec!["results"]);
    }
}
