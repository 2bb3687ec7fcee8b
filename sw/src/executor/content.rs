//! Content-generation sub-step

use std::time::Instant;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::domain::{ResultLog, Step};
use crate::error::StepError;
use crate::llm::{GenerationRequest, LlmError, stream_with_cancel};
use crate::placeholder::ResolvedInput;
use crate::prompts::{ContentContext, PriorOutput};
use crate::synthesis::TagScanner;
use crate::tracker::{StepPhase, ToolCallRecord};

use super::{AttemptContext, StepExecutor};

/// Tool name recorded for generation calls on the tracker
pub const GENERATION_CALL: &str = "text-generation";

/// Recent outputs shown when the step has no explicit dependencies
const RECENT_OUTPUTS: usize = 3;

impl StepExecutor {
    /// Generate the text for `content_field` and write it into `input`
    pub(super) async fn generate_content(
        &self,
        step: &Step,
        content_field: &str,
        input: &mut ResolvedInput,
        results: &ResultLog,
        ctx: &AttemptContext<'_>,
    ) -> Result<(), StepError> {
        debug!(step_id = %step.step_id, %content_field, "StepExecutor::generate_content: called");
        let generation_error = |message: String| StepError::Generation {
            step_id: step.step_id.clone(),
            message,
        };
        let Some(generator) = &self.generator else {
            return Err(generation_error("no text generator configured".to_string()));
        };

        self.reporter.phase(&step.step_id, StepPhase::GeneratingContent).await;
        let context = ContentContext {
            goal: ctx.goal.to_string(),
            reason: step.reason.clone(),
            tool: step.tool.clone(),
            content_field: content_field.to_string(),
            input: serde_json::to_string_pretty(&input.value).unwrap_or_default(),
            prior_outputs: self.prior_outputs(results, ctx.depends_on),
            open_tag: self.config.content_open_tag.clone(),
            close_tag: self.config.content_close_tag.clone(),
        };
        let prompt = self
            .renderer
            .render("content", &context)
            .map_err(|e| generation_error(e.to_string()))?;
        let request = GenerationRequest::new(prompt).with_max_tokens(self.config.generation_max_tokens);

        let mut scanner = TagScanner::new(&self.config.content_open_tag, &self.config.content_close_tag);
        let started_at = Utc::now();
        let started = Instant::now();
        let streamed = stream_with_cancel(generator.as_ref(), request, ctx.cancel, |delta| {
            scanner.push(delta);
            self.reporter.content_token(&step.step_id, delta);
        })
        .await;

        let record = |success: bool, error: Option<String>| ToolCallRecord {
            tool: GENERATION_CALL.to_string(),
            input: json!({ "content_field": content_field }),
            success,
            error,
            duration_ms: started.elapsed().as_millis() as u64,
            started_at,
        };

        let text = match streamed {
            Ok(text) => text,
            Err(LlmError::Cancelled) => {
                info!(step_id = %step.step_id, "Content generation aborted");
                self.reporter
                    .tool_call(&step.step_id, record(false, Some("aborted".to_string())))
                    .await;
                return Err(StepError::Aborted {
                    step_id: step.step_id.clone(),
                });
            }
            Err(e) => {
                warn!(step_id = %step.step_id, error = %e, "Content generation failed");
                self.reporter
                    .tool_call(&step.step_id, record(false, Some(e.to_string())))
                    .await;
                return Err(generation_error(e.to_string()));
            }
        };
        self.reporter.tool_call(&step.step_id, record(true, None)).await;

        let content = extract_content(scanner, &text);
        info!(step_id = %step.step_id, chars = content.len(), "Generated step content");
        if let Some(obj) = input.value.as_object_mut() {
            obj.insert(content_field.to_string(), Value::String(content));
        } else {
            let mut obj = serde_json::Map::new();
            obj.insert(content_field.to_string(), Value::String(content));
            input.value = Value::Object(obj);
        }
        Ok(())
    }

    fn prior_outputs(&self, results: &ResultLog, depends_on: &[String]) -> Vec<PriorOutput> {
        let max_chars = self.config.max_context_chars;
        if !depends_on.is_empty() {
            return depends_on
                .iter()
                .filter_map(|id| results.get(id))
                .filter_map(|r| PriorOutput::from_result(r, max_chars))
                .collect();
        }
        let mut recent: Vec<PriorOutput> = results
            .iter()
            .rev()
            .filter(|r| r.success)
            .take(RECENT_OUTPUTS)
            .filter_map(|r| PriorOutput::from_result(r, max_chars))
            .collect();
        recent.reverse();
        recent
    }
}

/// Closed tag content, else whatever was inside an unclosed tag, else the whole text
fn extract_content(scanner: TagScanner, text: &str) -> String {
    if scanner.is_closed() {
        return scanner.content().trim().to_string();
    }
    if scanner.is_open() {
        debug!("extract_content: unterminated content tag");
        return scanner.into_partial().trim().to_string();
    }
    text.trim().to_string()
}
