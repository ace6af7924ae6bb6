//! Request and event types for the LLM dispatch layer.

use serde::{Deserialize, Serialize};

use hive_types::{Academy, LlmRequestId};

/// Sampling parameters forwarded to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Softmax temperature.
    pub temperature: f64,
    /// Top-k cutoff; 0 disables.
    pub top_k: u32,
    /// Nucleus sampling mass.
    pub top_p: f64,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_k: 40,
            top_p: 0.9,
            max_tokens: 512,
        }
    }
}

/// One generation request submitted to the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmRequest {
    /// Model name; empty string means the configured default model.
    #[serde(default)]
    pub model: String,
    /// The prompt text.
    pub prompt: String,
    /// Optional system prompt.
    #[serde(default)]
    pub system: Option<String>,
    /// Sampling parameters.
    #[serde(default)]
    pub params: SamplingParams,
    /// Whether to stream partial chunks back.
    #[serde(default)]
    pub stream: bool,
    /// Academy tag used as a selection hint, not a hard constraint.
    #[serde(default)]
    pub academy: Option<Academy>,
}

impl LlmRequest {
    /// A plain non-streaming request for `prompt`.
    pub fn new(prompt: &str) -> Self {
        Self {
            model: String::new(),
            prompt: prompt.to_owned(),
            system: None,
            params: SamplingParams::default(),
            stream: false,
            academy: None,
        }
    }
}

/// Events delivered to the submitter over its per-request channel.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmEvent {
    /// A partial chunk of streamed text.
    Chunk {
        /// The request this chunk belongs to.
        request_id: LlmRequestId,
        /// The partial text.
        text: String,
    },
    /// Generation finished.
    Completed {
        /// The finished request.
        request_id: LlmRequestId,
        /// Full concatenated response text.
        text: String,
        /// Tokens generated, when the backend reports them.
        tokens: u64,
        /// Wall-clock time from dispatch to completion.
        elapsed_ms: u64,
    },
    /// Generation failed permanently.
    Failed {
        /// The failed request.
        request_id: LlmRequestId,
        /// Terminal error.
        error: crate::error::LlmError,
    },
}

/// One entry in the merged model catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model name as reported by the backend.
    pub name: String,
    /// Id of a backend serving this model.
    pub backend_id: String,
}
