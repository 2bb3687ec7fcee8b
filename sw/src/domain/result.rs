//! ExecutionResult and the append-only result log

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::error::{StepError, StepErrorKind, StepFailure};

/// Immutable record of one step's outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub step_id: String,
    pub tool_name: String,
    /// Input after placeholder resolution (and content generation); `Null` when resolution failed
    pub resolved_input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepFailure>,
    pub success: bool,
    #[serde(default)]
    pub skipped: bool,
    /// Output substituted for downstream references to a skipped step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<Value>,
    /// Attempts made before this outcome (1 for first-try success)
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn success(step_id: &str, tool_name: &str, resolved_input: Value, output: Value) -> Self {
        debug!(%step_id, %tool_name, "ExecutionResult::success: called");
        Self {
            step_id: step_id.to_string(),
            tool_name: tool_name.to_string(),
            resolved_input,
            output: Some(output),
            error: None,
            success: true,
            skipped: false,
            fallback: None,
            attempts: 1,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(step_id: &str, tool_name: &str, resolved_input: Value, error: &StepError) -> Self {
        debug!(%step_id, %tool_name, %error, "ExecutionResult::failure: called");
        Self {
            step_id: step_id.to_string(),
            tool_name: tool_name.to_string(),
            resolved_input,
            output: None,
            error: Some(error.into()),
            success: false,
            skipped: false,
            fallback: None,
            attempts: 1,
            timestamp: Utc::now(),
        }
    }

    pub fn skipped(
        step_id: &str,
        tool_name: &str,
        resolved_input: Value,
        error: &StepError,
        fallback: Option<Value>,
    ) -> Self {
        debug!(%step_id, has_fallback = fallback.is_some(), "ExecutionResult::skipped: called");
        Self {
            skipped: true,
            fallback,
            ..Self::failure(step_id, tool_name, resolved_input, error)
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// True when the step was aborted by the shared cancellation signal
    pub fn is_aborted(&self) -> bool {
        self.error.as_ref().is_some_and(|e| e.kind == StepErrorKind::Aborted)
    }

    /// Whether downstream steps may consume this result
    ///
    /// Successful results always qualify; skips qualify only with a fallback.
    pub fn satisfies_dependents(&self) -> bool {
        self.success || (self.skipped && self.fallback.is_some())
    }

    /// Field names of the output object (or of the fallback, for skips)
    pub fn available_fields(&self) -> Vec<String> {
        let source = if self.success {
            self.output.as_ref()
        } else {
            self.fallback.as_ref()
        };
        source
            .and_then(Value::as_object)
            .map(|obj| obj.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Error)]
#[error("Step {0} already has a recorded result")]
pub struct DuplicateResult(pub String);

/// Ordered, append-only log of execution results, at most one per step
#[derive(Debug, Clone, Default)]
pub struct ResultLog {
    results: Vec<ExecutionResult>,
    index: HashMap<String, usize>,
}

impl ResultLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a result; rejects a second result for the same step
    pub fn append(&mut self, result: ExecutionResult) -> Result<(), DuplicateResult> {
        debug!(step_id = %result.step_id, success = result.success, "ResultLog::append: called");
        if self.index.contains_key(&result.step_id) {
            debug!(step_id = %result.step_id, "ResultLog::append: duplicate");
            return Err(DuplicateResult(result.step_id));
        }
        self.index.insert(result.step_id.clone(), self.results.len());
        self.results.push(result);
        Ok(())
    }

    pub fn get(&self, step_id: &str) -> Option<&ExecutionResult> {
        self.index.get(step_id).map(|&idx| &self.results[idx])
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.index.contains_key(step_id)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &ExecutionResult> {
        self.results.iter()
    }

    /// Output of the most recently completed successful step
    pub fn last_success_output(&self) -> Option<&Value> {
        self.results.iter().rev().find(|r| r.success).and_then(|r| r.output.as_ref())
    }

    /// Step ids in append (completion) order
    pub fn step_ids(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.step_id.as_str()).collect()
    }

    pub fn into_vec(self) -> Vec<ExecutionResult> {
        self.results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool_error() -> StepError {
        StepError::ToolExecution {
            tool: "search".to_string(),
            message: "boom".to_string(),
        }
    }

    #[test]
    fn test_append_rejects_duplicates() {
        let mut log = ResultLog::new();
        log.append(ExecutionResult::success("s1", "search", json!({}), json!({"results": []})))
            .unwrap();
        let dup = log.append(ExecutionResult::success("s1", "search", json!({}), json!({})));
        assert!(dup.is_err());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_last_success_output_skips_failures() {
        let mut log = ResultLog::new();
        log.append(ExecutionResult::success("s1", "a", json!({}), json!({"x": 1})))
            .unwrap();
        log.append(ExecutionResult::failure("s2", "b", json!({}), &tool_error()))
            .unwrap();
        assert_eq!(log.last_success_output(), Some(&json!({"x": 1})));
        assert_eq!(log.step_ids(), vec!["s1", "s2"]);
    }

    #[test]
    fn test_iter_walks_both_directions() {
        let mut log = ResultLog::new();
        for id in ["s1", "s2", "s3"] {
            log.append(ExecutionResult::success(id, "a", json!({}), json!({}))).unwrap();
        }
        let newest_first: Vec<&str> = log.iter().rev().map(|r| r.step_id.as_str()).collect();
        assert_eq!(newest_first, vec!["s3", "s2", "s1"]);
    }

    #[test]
    fn test_skip_satisfies_dependents_only_with_fallback() {
        let bare = ExecutionResult::skipped("s1", "a", json!({}), &tool_error(), None);
        assert!(bare.skipped);
        assert!(!bare.success);
        assert!(!bare.satisfies_dependents());

        let with_fallback = ExecutionResult::skipped("s1", "a", json!({}), &tool_error(), Some(json!({"title": "t"})));
        assert!(with_fallback.satisfies_dependents());
        assert_eq!(with_fallback.available_fields(), vec!["title"]);
    }

    #[test]
    fn test_aborted_detection() {
        let aborted = ExecutionResult::failure(
            "s1",
            "a",
            json!(null),
            &StepError::Aborted {
                step_id: "s1".to_string(),
            },
        );
        assert!(aborted.is_aborted());
        assert!(!ExecutionResult::failure("s1", "a", json!(null), &tool_error()).is_aborted());
    }
}
