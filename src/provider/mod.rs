//! Completion service contract
//!
//! A provider turns one system prompt + user prompt into a stream of text
//! deltas closed by a `Finished` event. Errors may arrive before the stream
//! exists (request rejected) or in the middle of it.

mod openai;

pub use openai::{validate_api_key, OpenAiCompletionService, DEFAULT_BASE_URL, DEFAULT_MODEL};

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub model: String,
    pub stream: bool,
}

/// Token accounting reported with the final event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionEvent {
    Delta(String),
    Finished(Option<Usage>),
}

pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<CompletionEvent>> + Send>>;

#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Start generating. Resolves once the provider has accepted the request.
    async fn generate(&self, request: CompletionRequest) -> Result<CompletionStream>;
}
