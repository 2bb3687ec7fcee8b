//! Placeholder parsing
//!
//! A placeholder is a `{{stepId.field}}` expression embedded in a step's raw
//! input. Parsing happens once, up front; nothing downstream re-scans strings
//! to discover dependencies.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

/// Anything between double braces. Parsed further by [`PlaceholderReference::parse`].
static CANDIDATE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{([^{}]*)\}\}").expect("valid regex"));

/// `stepId.path`, where path may contain dots and brackets (rejected later as nested)
static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z0-9_][A-Za-z0-9_\-]*)\.([A-Za-z0-9_\-]+(?:(?:\.[A-Za-z0-9_\-]+)|(?:\[[0-9]+\]))*)\s*$")
        .expect("valid regex")
});

/// A parsed `{{stepN.fieldPath}}` expression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlaceholderReference {
    /// Step whose output is referenced
    pub source_step_id: String,
    /// Field path after the step id (`results`, or `output.results` when nested)
    pub field_path: String,
    /// The placeholder exactly as written, braces included
    pub raw: String,
}

impl PlaceholderReference {
    /// Parse the inner text of a placeholder (without braces)
    pub fn parse(inner: &str) -> Option<Self> {
        let caps = REFERENCE.captures(inner)?;
        Some(Self {
            source_step_id: caps[1].to_string(),
            field_path: caps[2].to_string(),
            raw: format!("{{{{{}}}}}", inner),
        })
    }

    /// True when the path is a single field name on the step's output
    pub fn is_direct_field(&self) -> bool {
        !self.field_path.contains('.') && !self.field_path.contains('[')
    }

    /// Last segment of the path, used to suggest the flat form of a nested reference
    pub fn leaf_field(&self) -> &str {
        let last = self.field_path.rsplit('.').next().unwrap_or(&self.field_path);
        last.split('[').next().unwrap_or(last)
    }

    /// The flat `{{step.field}}` form of this reference
    pub fn flattened(&self) -> String {
        format!("{{{{{}.{}}}}}", self.source_step_id, self.leaf_field())
    }
}

/// One `{{...}}` occurrence in a string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    /// Byte range of the whole expression, braces included
    pub range: Range<usize>,
    /// The expression as written
    pub raw: String,
    /// Parsed reference, `None` when the expression is malformed
    pub reference: Option<PlaceholderReference>,
}

/// Find every placeholder expression in a string
pub fn scan_str(text: &str) -> Vec<Placeholder> {
    CANDIDATE
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(Placeholder {
                range: whole.range(),
                raw: whole.as_str().to_string(),
                reference: PlaceholderReference::parse(&caps[1]),
            })
        })
        .collect()
}

/// Parse a string that consists of exactly one placeholder (surrounding whitespace allowed)
pub fn exact_reference(text: &str) -> Option<PlaceholderReference> {
    let trimmed = text.trim();
    let found = scan_str(trimmed);
    match found.as_slice() {
        [only] if only.range == (0..trimmed.len()) => only.reference.clone(),
        _ => None,
    }
}

/// Walk a JSON value and visit every string leaf
fn visit_strings<'a>(value: &'a Value, visit: &mut dyn FnMut(&'a str)) {
    match value {
        Value::String(s) => visit(s),
        Value::Array(items) => items.iter().for_each(|item| visit_strings(item, visit)),
        Value::Object(map) => map.values().for_each(|item| visit_strings(item, visit)),
        _ => {}
    }
}

/// Every placeholder expression in a JSON value, in document order
pub fn scan_value(value: &Value) -> Vec<Placeholder> {
    let mut found = Vec::new();
    visit_strings(value, &mut |s| found.extend(scan_str(s)));
    found
}

/// Every well-formed reference in a JSON value
pub fn references_in(value: &Value) -> Vec<PlaceholderReference> {
    let refs: Vec<PlaceholderReference> = scan_value(value).into_iter().filter_map(|p| p.reference).collect();
    debug!(count = refs.len(), "references_in: scanned");
    refs
}

/// Strings that contain a placeholder alongside other text
pub fn embedded_placeholders(value: &Value) -> Vec<String> {
    let mut found = Vec::new();
    visit_strings(value, &mut |s| {
        if !scan_str(s).is_empty() && exact_reference(s).is_none() {
            found.push(s.to_string());
        }
    });
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_direct_reference() {
        let r = PlaceholderReference::parse("s1.results").unwrap();
        assert_eq!(r.source_step_id, "s1");
        assert_eq!(r.field_path, "results");
        assert_eq!(r.raw, "{{s1.results}}");
        assert!(r.is_direct_field());
    }

    #[test]
    fn test_parse_nested_reference() {
        let r = PlaceholderReference::parse(" s1.output.results ").unwrap();
        assert_eq!(r.field_path, "output.results");
        assert!(!r.is_direct_field());
        assert_eq!(r.flattened(), "{{s1.results}}");

        let indexed = PlaceholderReference::parse("step2.items[0]").unwrap();
        assert!(!indexed.is_direct_field());
        assert_eq!(indexed.leaf_field(), "items");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(PlaceholderReference::parse("s1").is_none());
        assert!(PlaceholderReference::parse("s1.").is_none());
        assert!(PlaceholderReference::parse(".field").is_none());
        assert!(PlaceholderReference::parse("s1 results").is_none());
    }

    #[test]
    fn test_scan_str_finds_all() {
        let found = scan_str("see {{s1.title}} and {{s2.body}} plus {{oops}}");
        assert_eq!(found.len(), 3);
        assert_eq!(found[0].reference.as_ref().unwrap().source_step_id, "s1");
        assert_eq!(found[1].reference.as_ref().unwrap().field_path, "body");
        assert!(found[2].reference.is_none());
        assert_eq!(found[2].raw, "{{oops}}");
    }

    #[test]
    fn test_exact_reference() {
        assert!(exact_reference("{{s1.results}}").is_some());
        assert!(exact_reference("  {{s1.results}} ").is_some());
        assert!(exact_reference("urls: {{s1.results}}").is_none());
        assert!(exact_reference("{{s1.a}}{{s1.b}}").is_none());
    }

    #[test]
    fn test_references_in_nested_value() {
        let input = json!({
            "q": "plain",
            "urls": "{{s1.results}}",
            "nested": { "list": ["{{s2.first}}", 3, "x {{s3.name}}"] }
        });
        let mut ids: Vec<String> = references_in(&input).into_iter().map(|r| r.source_step_id).collect();
        ids.sort();
        assert_eq!(ids, vec!["s1", "s2", "s3"]);
    }

    #[test]
    fn test_embedded_placeholders() {
        let input = json!({"a": "{{s1.x}}", "b": "Summary of {{s1.x}}"});
        assert_eq!(embedded_placeholders(&input), vec!["Summary of {{s1.x}}".to_string()]);
    }
}
