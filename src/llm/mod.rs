//! Language model client abstractions.
//!
//! This module houses the provider-agnostic chat client, an OpenAI-backed
//! provider powered by the `async-openai` crate, and the [`LlmInference`]
//! seam the handlers call.

pub mod client;
pub mod error;
pub mod inference;
pub mod openai;
pub mod prompts;
pub mod provider;

pub use client::{ChatCompletionOptions, StagehandLlmClient};
pub use error::StagehandLlmError;
pub use inference::{
    ChatInference, ExtractInferenceRequest, InferenceError, InferenceUsage, LlmInference,
    ObserveInferenceRequest, ObserveInferenceResponse,
};
pub use openai::OpenAiChatProvider;
pub use provider::ChatCompletionProvider;
