//! Provider errors and their JSON wire encoding.
//!
//! The pipeline runtime reads a provider failure by parsing the error message
//! as `{"error": {"code": "...", "message": "..."}}`. [`EncodedError`] is the
//! only error type that leaves a provider, and it always has that shape.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Everything that can go wrong while talking to a model provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Azure OpenAI API error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("SSE stream error: {0}")]
    Stream(String),

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("{0}")]
    Unsupported(String),
}

impl ProviderError {
    /// Error code carried in the encoded payload.
    pub fn code(&self) -> String {
        match self {
            ProviderError::Http { status, .. } => status.to_string(),
            _ => "500".to_string(),
        }
    }
}

/// Structured `code`/`message` pair inside an encoded error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    error: ErrorBody,
}

/// A provider error whose `Display` is the JSON envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{payload}")]
pub struct EncodedError {
    payload: String,
}

impl EncodedError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        let payload = serde_json::json!({
            "error": { "code": code.into(), "message": message.into() }
        })
        .to_string();
        Self { payload }
    }

    /// The raw JSON text.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Parse an error message produced by [`EncodedError`].
    pub fn decode(message: &str) -> Option<ErrorBody> {
        serde_json::from_str::<Envelope>(message)
            .ok()
            .map(|e| e.error)
    }

    pub fn body(&self) -> ErrorBody {
        Self::decode(&self.payload).unwrap_or_else(|| ErrorBody {
            code: "500".into(),
            message: self.payload.clone(),
        })
    }
}

impl From<ProviderError> for EncodedError {
    fn from(err: ProviderError) -> Self {
        EncodedError::new(err.code(), err.to_string())
    }
}
