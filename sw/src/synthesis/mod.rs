//! Final answer synthesis
//!
//! Streams the final-answer prompt through the text generator and extracts
//! the text between the configured markers as it arrives. The answer is only
//! finalized once the closing marker has been observed.

mod scanner;

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SynthesisConfig;
use crate::domain::ResultLog;
use crate::llm::{GenerationRequest, LlmError, TextGenerator, stream_with_cancel};
use crate::prompts::{FinalAnswerContext, PromptError, PromptRenderer, ResultSummary};

pub use scanner::{ScanState, TagScanner};

/// The extracted answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalAnswer {
    pub text: String,
    /// Text the model produced after the closing marker
    pub trailing: String,
}

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("Generated text never opened the answer with {marker}")]
    MissingOpenMarker { marker: String },

    #[error("Generated text ended before the closing {marker}")]
    Unterminated { marker: String },

    #[error("Synthesis aborted")]
    Aborted,

    #[error("Generation failed: {0}")]
    Generation(LlmError),

    #[error(transparent)]
    Prompt(#[from] PromptError),
}

pub struct FinalAnswerSynthesizer {
    generator: Arc<dyn TextGenerator>,
    renderer: Arc<PromptRenderer>,
    config: SynthesisConfig,
}

impl FinalAnswerSynthesizer {
    pub fn new(generator: Arc<dyn TextGenerator>, renderer: Arc<PromptRenderer>, config: SynthesisConfig) -> Self {
        Self {
            generator,
            renderer,
            config,
        }
    }

    /// Stream an answer for `goal` from the result log
    ///
    /// `on_progress` receives the full inner text available so far each time
    /// it grows.
    pub async fn synthesize<F>(
        &self,
        goal: &str,
        results: &ResultLog,
        mut on_progress: F,
        cancel: &CancellationToken,
    ) -> Result<FinalAnswer, SynthesisError>
    where
        F: FnMut(&str) + Send,
    {
        debug!(%goal, result_count = results.len(), "FinalAnswerSynthesizer::synthesize: called");
        let context = FinalAnswerContext {
            goal: goal.to_string(),
            results: results
                .iter()
                .map(|r| ResultSummary::from_result(r, self.config.max_result_chars))
                .collect(),
            open_marker: self.config.open_marker.clone(),
            close_marker: self.config.close_marker.clone(),
        };
        let prompt = self.renderer.render("final_answer", &context)?;
        let request = GenerationRequest::new(prompt).with_max_tokens(self.config.max_tokens);

        let mut scanner = TagScanner::new(&self.config.open_marker, &self.config.close_marker);
        let streamed = stream_with_cancel(self.generator.as_ref(), request, cancel, |delta| {
            if scanner.push(delta) {
                on_progress(scanner.content());
            }
        })
        .await;

        match streamed {
            Ok(_) => {}
            Err(LlmError::Cancelled) => {
                info!("Final answer synthesis aborted");
                return Err(SynthesisError::Aborted);
            }
            Err(e) => {
                warn!(error = %e, "Final answer generation failed");
                return Err(SynthesisError::Generation(e));
            }
        }

        match scanner.state() {
            ScanState::Closed => {
                info!(chars = scanner.content().len(), "Final answer complete");
                Ok(FinalAnswer {
                    text: scanner.content().trim().to_string(),
                    trailing: scanner.trailing().trim().to_string(),
                })
            }
            ScanState::Inside => {
                warn!("Final answer stream ended without closing marker");
                Err(SynthesisError::Unterminated {
                    marker: self.config.close_marker.clone(),
                })
            }
            ScanState::Outside => {
                warn!("Final answer stream never opened the answer");
                Err(SynthesisError::MissingOpenMarker {
                    marker: self.config.open_marker.clone(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExecutionResult;
    use crate::error::StepError;
    use crate::llm::mock::{ScriptedGenerator, StalledGenerator};
    use serde_json::json;

    fn synthesizer(generator: Arc<dyn TextGenerator>) -> FinalAnswerSynthesizer {
        FinalAnswerSynthesizer::new(
            generator,
            Arc::new(PromptRenderer::embedded_only()),
            SynthesisConfig::default(),
        )
    }

    fn results() -> ResultLog {
        let mut log = ResultLog::new();
        log.append(ExecutionResult::success("s1", "search", json!({}), json!({"results": ["http://a"]})))
            .unwrap();
        let err = StepError::ToolExecution {
            tool: "fetch".to_string(),
            message: "HTTP 404".to_string(),
        };
        log.append(ExecutionResult::skipped("s2", "fetch", json!({}), &err, None)).unwrap();
        log
    }

    #[tokio::test]
    async fn test_synthesize_extracts_answer_and_trailing() {
        let generator = Arc::new(
            ScriptedGenerator::new(vec!["Let me think. <final_answer>Found http://a.</final_answer> (sources above)"])
                .with_chunk_size(5),
        );
        let mut progress = Vec::new();
        let answer = synthesizer(generator.clone())
            .synthesize("find a", &results(), |p| progress.push(p.to_string()), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(answer.text, "Found http://a.");
        assert_eq!(answer.trailing, "(sources above)");
        assert!(!progress.is_empty());
        assert!(progress.windows(2).all(|w| w[1].starts_with(&w[0])));
        assert_eq!(progress.last().unwrap(), "Found http://a.");

        let prompt = &generator.requests()[0].prompt;
        assert!(prompt.contains("HTTP 404"));
        assert!(prompt.contains("skipped"));
    }

    #[tokio::test]
    async fn test_unterminated_is_not_finalized() {
        let generator = Arc::new(ScriptedGenerator::new(vec!["<final_answer>Half an ans"]));
        let err = synthesizer(generator)
            .synthesize("g", &results(), |_| {}, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SynthesisError::Unterminated { .. }));
    }

    #[tokio::test]
    async fn test_missing_open_marker() {
        let generator = Arc::new(ScriptedGenerator::new(vec!["Just an answer without markers"]));
        let err = synthesizer(generator)
            .synthesize("g", &results(), |_| {}, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SynthesisError::MissingOpenMarker { .. }));
    }

    #[tokio::test]
    async fn test_cancel_discards_stream() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let err = synthesizer(Arc::new(StalledGenerator))
            .synthesize("g", &results(), |_| {}, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SynthesisError::Aborted));
    }
}
