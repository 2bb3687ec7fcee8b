//! TextGenerator trait definition

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{GenerationRequest, LlmError, StreamChunk};

/// Stateless text generation capability
///
/// Each request is independent; no conversation state is kept between calls.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate the full text for a request
    async fn generate(&self, request: GenerationRequest) -> Result<String, LlmError>;

    /// Streaming generation
    ///
    /// Sends `TextDelta` chunks to the channel as they arrive and returns the
    /// complete text.
    async fn generate_streaming(
        &self,
        request: GenerationRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<String, LlmError>;
}

/// Stream a request, forwarding each text delta to `on_delta`
///
/// Observes `cancel` between chunks; a cancelled stream returns
/// [`LlmError::Cancelled`] and the caller must discard any partial text.
pub async fn stream_with_cancel<F>(
    generator: &dyn TextGenerator,
    request: GenerationRequest,
    cancel: &CancellationToken,
    mut on_delta: F,
) -> Result<String, LlmError>
where
    F: FnMut(&str) + Send,
{
    debug!(prompt_len = request.prompt.len(), "stream_with_cancel: called");
    let (chunk_tx, mut chunk_rx) = mpsc::channel(64);
    let generation = generator.generate_streaming(request, chunk_tx);
    tokio::pin!(generation);

    let mut finished: Option<Result<String, LlmError>> = None;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("stream_with_cancel: cancelled");
                return Err(LlmError::Cancelled);
            }
            chunk = chunk_rx.recv() => match chunk {
                Some(StreamChunk::TextDelta(text)) => on_delta(&text),
                Some(StreamChunk::Done) => {}
                Some(StreamChunk::Error(message)) => {
                    debug!(%message, "stream_with_cancel: stream error");
                    return Err(LlmError::InvalidResponse(message));
                }
                None => break,
            },
            result = &mut generation, if finished.is_none() => {
                finished = Some(result);
            }
        }
    }

    match finished {
        Some(result) => result,
        None => generation.await,
    }
}
