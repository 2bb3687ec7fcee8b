//! PlaceholderResolver - substitutes prior step outputs into a step's input

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::domain::ResultLog;
use crate::tools::ToolDescriptor;

use super::error::{PlaceholderErrorKind, PlaceholderReplacementError};
use super::reference::{PlaceholderReference, exact_reference, scan_str};

/// What to do when an array lands in a parameter declared as scalar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrayPolicy {
    /// Take the first element
    #[default]
    First,
    /// One invocation per element when the tool is batched, else first element
    Iterate,
}

/// One invocation per element of an array bound to a scalar parameter
#[derive(Debug, Clone, PartialEq)]
pub struct FanOut {
    pub parameter: String,
    pub values: Vec<Value>,
}

/// Fully substituted step input
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedInput {
    /// Input as recorded on the result (fan-out parameter keeps its array)
    pub value: Value,
    pub fan_out: Option<FanOut>,
}

impl ResolvedInput {
    pub fn plain(value: Value) -> Self {
        Self { value, fan_out: None }
    }

    /// Concrete argument objects to pass to the tool, one per call
    pub fn invocations(&self) -> Vec<Value> {
        match &self.fan_out {
            None => vec![self.value.clone()],
            Some(fan_out) => fan_out
                .values
                .iter()
                .map(|element| {
                    let mut args = self.value.clone();
                    if let Some(obj) = args.as_object_mut() {
                        obj.insert(fan_out.parameter.clone(), element.clone());
                    }
                    args
                })
                .collect(),
        }
    }
}

/// Resolves `{{stepN.field}}` references against the result log
///
/// Pure: reads recorded results only and never invokes tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderResolver {
    policy: ArrayPolicy,
}

impl PlaceholderResolver {
    pub fn new(policy: ArrayPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ArrayPolicy {
        self.policy
    }

    /// Substitute every placeholder in `raw_input`
    ///
    /// `tool` supplies the input schema used for array-to-scalar narrowing;
    /// without it arrays are passed through untouched.
    pub fn resolve(
        &self,
        raw_input: &Value,
        results: &ResultLog,
        tool: Option<&ToolDescriptor>,
    ) -> Result<ResolvedInput, PlaceholderReplacementError> {
        debug!(policy = ?self.policy, has_tool = tool.is_some(), "PlaceholderResolver::resolve: called");
        let mut value = substitute(raw_input, results)?;
        let mut fan_out = None;

        let (Some(tool), Some(raw_params)) = (tool, raw_input.as_object()) else {
            return Ok(ResolvedInput { value, fan_out });
        };

        for (param, raw_param) in raw_params {
            let Some(reference) = raw_param.as_str().and_then(exact_reference) else {
                continue;
            };
            if !tool.expects_scalar(param) {
                continue;
            }
            let Some(Value::Array(items)) = value.get(param).cloned() else {
                continue;
            };
            if items.is_empty() {
                return Err(PlaceholderReplacementError::new(
                    PlaceholderErrorKind::EmptyArray,
                    &reference.raw,
                    Vec::new(),
                    format!(
                        "{} resolved to an empty array but '{}' expects a single value",
                        reference.raw, param
                    ),
                ));
            }

            if self.policy == ArrayPolicy::Iterate && tool.batched && fan_out.is_none() {
                info!(tool = %tool.name, %param, count = items.len(), "Fanning out array over batched tool");
                fan_out = Some(FanOut {
                    parameter: param.clone(),
                    values: items,
                });
                continue;
            }

            if self.policy == ArrayPolicy::Iterate {
                warn!(tool = %tool.name, %param, "Tool is not batched; narrowing array to its first element");
            }
            let Some(first) = items.into_iter().next() else {
                continue;
            };
            info!(tool = %tool.name, %param, placeholder = %reference.raw, "Narrowed array to first element");
            if let Some(obj) = value.as_object_mut() {
                obj.insert(param.clone(), first);
            }
        }

        Ok(ResolvedInput { value, fan_out })
    }
}

fn substitute(value: &Value, results: &ResultLog) -> Result<Value, PlaceholderReplacementError> {
    match value {
        Value::String(text) => substitute_str(text, results),
        Value::Array(items) => items
            .iter()
            .map(|item| substitute(item, results))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                out.insert(key.clone(), substitute(item, results)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn substitute_str(text: &str, results: &ResultLog) -> Result<Value, PlaceholderReplacementError> {
    if let Some(reference) = exact_reference(text) {
        return lookup(&reference, results);
    }

    let found = scan_str(text);
    if found.is_empty() {
        return Ok(Value::String(text.to_string()));
    }

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for placeholder in found {
        let Some(reference) = placeholder.reference else {
            continue;
        };
        out.push_str(&text[cursor..placeholder.range.start]);
        out.push_str(&textual(&lookup(&reference, results)?));
        cursor = placeholder.range.end;
    }
    out.push_str(&text[cursor..]);
    Ok(Value::String(out))
}

/// Textual form of a value spliced into a longer string
fn textual(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn lookup(reference: &PlaceholderReference, results: &ResultLog) -> Result<Value, PlaceholderReplacementError> {
    let step_id = &reference.source_step_id;
    debug!(%step_id, field = %reference.field_path, "lookup: called");

    let Some(result) = results.get(step_id) else {
        return Err(PlaceholderReplacementError::new(
            PlaceholderErrorKind::NotExecuted,
            &reference.raw,
            Vec::new(),
            format!("Step {} has not produced a result yet", step_id),
        ));
    };
    let available = result.available_fields();

    if !reference.is_direct_field() {
        return Err(PlaceholderReplacementError::new(
            PlaceholderErrorKind::UnsupportedPath,
            &reference.raw,
            available,
            format!(
                "Nested path '{}' is not supported; reference output fields directly, e.g. {}",
                reference.field_path,
                reference.flattened()
            ),
        ));
    }

    let source = if result.success {
        result.output.as_ref()
    } else if result.skipped {
        match result.fallback.as_ref() {
            Some(fallback) => {
                debug!(%step_id, "lookup: reading from skip fallback");
                Some(fallback)
            }
            None => {
                return Err(PlaceholderReplacementError::new(
                    PlaceholderErrorKind::MissingDependency,
                    &reference.raw,
                    available,
                    format!("Step {} was skipped without a fallback value", step_id),
                ));
            }
        }
    } else {
        return Err(PlaceholderReplacementError::new(
            PlaceholderErrorKind::StepFailed,
            &reference.raw,
            available,
            format!("Step {} failed and has no usable output", step_id),
        ));
    };

    match source.and_then(|out| out.get(&reference.field_path)) {
        Some(found) => Ok(found.clone()),
        None => {
            let kind = if result.skipped {
                PlaceholderErrorKind::MissingDependency
            } else {
                PlaceholderErrorKind::FieldMissing
            };
            Err(PlaceholderReplacementError::new(
                kind,
                &reference.raw,
                available.clone(),
                format!(
                    "Field '{}' not found in output of step {} (available: {})",
                    reference.field_path,
                    step_id,
                    if available.is_empty() {
                        "none".to_string()
                    } else {
                        available.join(", ")
                    }
                ),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExecutionResult;
    use crate::error::StepError;
    use serde_json::json;

    fn log_with(results: Vec<ExecutionResult>) -> ResultLog {
        let mut log = ResultLog::new();
        for r in results {
            log.append(r).unwrap();
        }
        log
    }

    fn search_result() -> ExecutionResult {
        ExecutionResult::success(
            "s1",
            "search",
            json!({"q": "x"}),
            json!({"results": ["http://a"], "title": "Rust", "count": 1}),
        )
    }

    fn failed(step_id: &str) -> StepError {
        StepError::ToolExecution {
            tool: "t".to_string(),
            message: format!("{} broke", step_id),
        }
    }

    #[test]
    fn test_resolves_typed_value() {
        let log = log_with(vec![search_result()]);
        let resolved = PlaceholderResolver::default()
            .resolve(&json!({"urls": "{{s1.results}}"}), &log, None)
            .unwrap();
        assert_eq!(resolved.value, json!({"urls": ["http://a"]}));
        assert!(resolved.fan_out.is_none());
    }

    #[test]
    fn test_embedded_placeholder_is_stringified() {
        let log = log_with(vec![search_result()]);
        let resolved = PlaceholderResolver::default()
            .resolve(
                &json!({"text": "About {{s1.title}}: {{s1.count}} hit(s) {{not-a-ref}}"}),
                &log,
                None,
            )
            .unwrap();
        assert_eq!(resolved.value["text"], "About Rust: 1 hit(s) {{not-a-ref}}");
    }

    #[test]
    fn test_missing_step_fails() {
        let err = PlaceholderResolver::default()
            .resolve(&json!({"urls": "{{s1.results}}"}), &ResultLog::new(), None)
            .unwrap_err();
        assert_eq!(err.kind, PlaceholderErrorKind::NotExecuted);
        assert_eq!(err.placeholder, "{{s1.results}}");
    }

    #[test]
    fn test_missing_field_lists_available() {
        let log = log_with(vec![search_result()]);
        let err = PlaceholderResolver::default()
            .resolve(&json!({"urls": "{{s1.links}}"}), &log, None)
            .unwrap_err();
        assert_eq!(err.kind, PlaceholderErrorKind::FieldMissing);
        assert_eq!(err.available_fields, vec!["count", "results", "title"]);
        assert!(err.message.contains("links"));
    }

    #[test]
    fn test_output_wrapper_path_is_rejected() {
        let log = log_with(vec![search_result()]);
        let err = PlaceholderResolver::default()
            .resolve(&json!({"urls": "{{s1.output.results}}"}), &log, None)
            .unwrap_err();
        assert_eq!(err.kind, PlaceholderErrorKind::UnsupportedPath);
        assert!(err.message.contains("{{s1.results}}"));
    }

    #[test]
    fn test_failed_step_is_not_usable() {
        let log = log_with(vec![ExecutionResult::failure("s1", "search", json!({}), &failed("s1"))]);
        let err = PlaceholderResolver::default()
            .resolve(&json!({"q": "{{s1.results}}"}), &log, None)
            .unwrap_err();
        assert_eq!(err.kind, PlaceholderErrorKind::StepFailed);
    }

    #[test]
    fn test_skip_fallback_and_missing_dependency() {
        let log = log_with(vec![ExecutionResult::skipped(
            "s1",
            "search",
            json!({}),
            &failed("s1"),
            Some(json!({"title": "fallback"})),
        )]);
        let resolver = PlaceholderResolver::default();

        let ok = resolver.resolve(&json!({"t": "{{s1.title}}"}), &log, None).unwrap();
        assert_eq!(ok.value, json!({"t": "fallback"}));

        let err = resolver.resolve(&json!({"r": "{{s1.results}}"}), &log, None).unwrap_err();
        assert_eq!(err.kind, PlaceholderErrorKind::MissingDependency);

        let bare = log_with(vec![ExecutionResult::skipped("s1", "search", json!({}), &failed("s1"), None)]);
        let err = resolver.resolve(&json!({"t": "{{s1.title}}"}), &bare, None).unwrap_err();
        assert_eq!(err.kind, PlaceholderErrorKind::MissingDependency);
    }

    fn fetch_tool() -> ToolDescriptor {
        ToolDescriptor::new("fetch", "Fetch one URL").with_input_schema(json!({
            "type": "object",
            "properties": { "url": { "type": "string" }, "urls": { "type": "array" } }
        }))
    }

    #[test]
    fn test_first_policy_narrows_scalar_params_only() {
        let log = log_with(vec![ExecutionResult::success(
            "s1",
            "search",
            json!({}),
            json!({"results": ["http://a", "http://b"]}),
        )]);
        let resolved = PlaceholderResolver::new(ArrayPolicy::First)
            .resolve(
                &json!({"url": "{{s1.results}}", "urls": "{{s1.results}}"}),
                &log,
                Some(&fetch_tool()),
            )
            .unwrap();
        assert_eq!(resolved.value["url"], "http://a");
        assert_eq!(resolved.value["urls"], json!(["http://a", "http://b"]));
        assert_eq!(resolved.invocations().len(), 1);
    }

    #[test]
    fn test_first_policy_empty_array_fails() {
        let log = log_with(vec![ExecutionResult::success("s1", "search", json!({}), json!({"results": []}))]);
        let err = PlaceholderResolver::new(ArrayPolicy::First)
            .resolve(&json!({"url": "{{s1.results}}"}), &log, Some(&fetch_tool()))
            .unwrap_err();
        assert_eq!(err.kind, PlaceholderErrorKind::EmptyArray);
    }

    #[test]
    fn test_iterate_policy_empty_array_fails_without_fan_out() {
        let log = log_with(vec![ExecutionResult::success("s1", "search", json!({}), json!({"results": []}))]);
        let err = PlaceholderResolver::new(ArrayPolicy::Iterate)
            .resolve(&json!({"url": "{{s1.results}}"}), &log, Some(&fetch_tool().batched()))
            .unwrap_err();
        assert_eq!(err.kind, PlaceholderErrorKind::EmptyArray);
        assert!(err.message.contains("'url'"));
    }

    #[test]
    fn test_iterate_policy_fans_out_for_batched_tools() {
        let log = log_with(vec![ExecutionResult::success(
            "s1",
            "search",
            json!({}),
            json!({"results": ["http://a", "http://b"]}),
        )]);
        let raw = json!({"url": "{{s1.results}}", "depth": 1});

        let batched = PlaceholderResolver::new(ArrayPolicy::Iterate)
            .resolve(&raw, &log, Some(&fetch_tool().batched()))
            .unwrap();
        let calls = batched.invocations();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], json!({"url": "http://a", "depth": 1}));
        assert_eq!(calls[1], json!({"url": "http://b", "depth": 1}));
        assert_eq!(batched.value["url"], json!(["http://a", "http://b"]));

        let unbatched = PlaceholderResolver::new(ArrayPolicy::Iterate)
            .resolve(&raw, &log, Some(&fetch_tool()))
            .unwrap();
        assert!(unbatched.fan_out.is_none());
        assert_eq!(unbatched.value["url"], "http://a");
    }
}
