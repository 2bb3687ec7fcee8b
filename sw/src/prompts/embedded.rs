//! Embedded prompts
//!
//! Compiled into the binary from the `.pmt` files under `sw/prompts/`.

use tracing::debug;

/// Initial plan request
pub const PLAN: &str = include_str!("../../prompts/plan.pmt");

/// Single-step replacement after a failure
pub const REGENERATE_STEP: &str = include_str!("../../prompts/regenerate_step.pmt");

/// Content-generation sub-step
pub const CONTENT: &str = include_str!("../../prompts/content.pmt");

/// Final answer synthesis
pub const FINAL_ANSWER: &str = include_str!("../../prompts/final_answer.pmt");

/// Get the embedded prompt by name
pub fn get_embedded(name: &str) -> Option<&'static str> {
    debug!(%name, "get_embedded: called");
    match name {
        "plan" => Some(PLAN),
        "regenerate_step" => Some(REGENERATE_STEP),
        "content" => Some(CONTENT),
        "final_answer" => Some(FINAL_ANSWER),
        _ => {
            debug!("get_embedded: no match found");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_embedded_known() {
        for name in ["plan", "regenerate_step", "content", "final_answer"] {
            assert!(get_embedded(name).is_some(), "{name}");
        }
        assert!(get_embedded("plan").unwrap().contains("{{goal}}"));
    }

    #[test]
    fn test_get_embedded_unknown() {
        assert!(get_embedded("unknown-template").is_none());
    }
}
