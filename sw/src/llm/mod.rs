//! Text generation capability
//!
//! The engine never talks to a model provider directly; planning, content
//! generation and answer synthesis all go through [`TextGenerator`].

mod error;
mod generator;
mod types;

#[cfg(test)]
pub use generator::mock;
pub use error::LlmError;
pub use generator::{TextGenerator, stream_with_cancel};
pub use types::{GenerationRequest, StreamChunk};
