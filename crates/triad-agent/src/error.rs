use thiserror::Error;

use triad_core::error::TriadError;
use triad_providers::EncodedError;

/// Errors surfaced by a pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// A model call failed. `code`/`message` come from the adapter's JSON error.
    #[error("{message}")]
    Model { code: String, message: String },

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Agent {agent} exceeded {limit} tool iterations")]
    MaxIterations { agent: String, limit: u32 },

    #[error("Invocation cancelled")]
    Cancelled,

    #[error("Session error: {0}")]
    Session(String),
}

impl From<EncodedError> for AgentError {
    fn from(err: EncodedError) -> Self {
        let body = err.body();
        AgentError::Model {
            code: body.code,
            message: body.message,
        }
    }
}

impl From<TriadError> for AgentError {
    fn from(err: TriadError) -> Self {
        AgentError::Session(err.to_string())
    }
}
