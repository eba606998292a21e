//! Pipeline events: one per model turn, tool response, or user message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Content;

/// Author name used for events carrying the user's message.
pub const USER_AUTHOR: &str = "user";

/// An event produced during a pipeline invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub invocation_id: String,
    /// `"user"` or the name of the agent that produced the event.
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    /// True for incremental streaming chunks that will be superseded.
    #[serde(default)]
    pub partial: bool,
    #[serde(default)]
    pub turn_complete: bool,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(invocation_id: impl Into<String>, author: impl Into<String>, content: Option<Content>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            invocation_id: invocation_id.into(),
            author: author.into(),
            content,
            partial: false,
            turn_complete: false,
            timestamp: Utc::now(),
        }
    }

    /// Concatenated text of the event, empty when there is none.
    pub fn text(&self) -> String {
        self.content.as_ref().map(Content::text).unwrap_or_default()
    }

    /// Whether this event is an agent's complete output for the current turn.
    ///
    /// Partial chunks, tool calls, and tool responses are never final.
    pub fn is_final_response(&self) -> bool {
        if self.partial {
            return false;
        }
        match &self.content {
            Some(content) => !content.has_function_calls() && !content.has_function_responses(),
            None => true,
        }
    }
}
