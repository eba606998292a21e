//! LLM provider abstraction.
//!
//! A provider turns an [`LlmRequest`] (conversation contents, system
//! instruction, tool declarations) into a stream of [`LlmResponse`]s in the
//! pipeline's own content representation. Every failure crosses this boundary
//! as an [`EncodedError`], whose message is a JSON error object.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use triad_core::types::{Content, ToolDeclaration};

pub mod azure;
pub mod error;
pub mod sse;

pub use error::{EncodedError, ErrorBody, ProviderError};

/// A request for one model turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    #[serde(default)]
    pub tools: Vec<ToolDeclaration>,
}

/// One response from the model, possibly an incremental streaming chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: Option<Content>,
    /// More chunks follow; `content` holds the text accumulated so far.
    pub partial: bool,
    pub turn_complete: bool,
}

impl LlmResponse {
    pub fn complete(content: Content) -> Self {
        Self {
            content: Some(content),
            partial: false,
            turn_complete: true,
        }
    }
}

pub type LlmResponseStream = Pin<Box<dyn Stream<Item = Result<LlmResponse, EncodedError>> + Send>>;

/// The core LLM provider trait.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier (e.g., "azure_openai").
    fn id(&self) -> &str;

    /// Model label reported to the runtime (e.g., "azure/gpt-chat").
    fn model(&self) -> &str;

    /// Generate a response. With `stream == false` the stream yields exactly
    /// one complete response.
    async fn generate(&self, request: &LlmRequest, stream: bool) -> Result<LlmResponseStream, EncodedError>;

    /// Open a live bidirectional connection. Not supported by default.
    async fn connect(&self, _request: &LlmRequest) -> Result<LlmResponseStream, EncodedError> {
        Err(ProviderError::Unsupported(format!(
            "{} does not support live connections",
            self.id()
        ))
        .into())
    }
}
