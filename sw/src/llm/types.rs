//! Request and stream types for text generation

use serde::{Deserialize, Serialize};

/// One stateless generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    #[serde(default)]
    pub system_prompt: String,
    pub prompt: String,
    pub max_tokens: u32,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: String::new(),
            prompt: prompt.into(),
            max_tokens: 4096,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Chunks sent during streaming generation
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// Text being generated
    TextDelta(String),

    /// Generation complete
    Done,

    /// Error during streaming
    Error(String),
}
