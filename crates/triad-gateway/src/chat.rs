//! `POST /api/chat`: run the pipeline to completion and return the final text.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use triad_agent::AgentError;
use triad_core::types::Content;

use crate::error::ApiError;
use crate::state::{GatewayState, resolve_ids};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTraceEntry {
    pub agent: String,
    pub content: String,
    pub timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub response: String,
    pub session_id: String,
    pub user_id: String,
    pub agent_trace: Vec<AgentTraceEntry>,
}

/// Validate the message: present, and non-empty once trimmed.
fn validate_message(message: Option<String>) -> Result<String, ApiError> {
    let message = message.ok_or_else(|| ApiError::Validation("message is required".into()))?;
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return Err(ApiError::Validation("Message cannot be empty".into()));
    }
    Ok(trimmed.to_string())
}

pub async fn chat_handler(
    State(state): State<Arc<GatewayState>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = payload?;
    let message = validate_message(request.message)?;
    let (session_id, user_id) = resolve_ids(request.session_id, request.user_id);

    info!(session_id = %session_id, user_id = %user_id, "Chat request");

    // Dropping the handler (client gone) or timing out cancels the run.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let run = run_to_completion(&state, &user_id, &session_id, message, cancel.clone());
    let (response, agent_trace) = match tokio::time::timeout(state.pipeline_timeout, run).await {
        Ok(result) => result?,
        Err(_) => {
            warn!(session_id = %session_id, "Chat pipeline timed out");
            return Err(ApiError::Pipeline(format!(
                "Pipeline timed out after {}s",
                state.pipeline_timeout.as_secs()
            )));
        }
    };

    Ok(Json(ChatResponse {
        response,
        session_id,
        user_id,
        agent_trace,
    }))
}

/// Drain the run. The reply is the last final-response text, or failing
/// that the last traced text.
async fn run_to_completion(
    state: &GatewayState,
    user_id: &str,
    session_id: &str,
    message: String,
    cancel: CancellationToken,
) -> Result<(String, Vec<AgentTraceEntry>), AgentError> {
    state.ensure_session(user_id, session_id).await?;
    let mut events = state
        .runner
        .run(user_id, session_id, Content::user_text(message), cancel)
        .await?;

    let mut trace = Vec::new();
    let mut final_response = String::new();
    while let Some(event) = events.next().await {
        let event = event?;
        let text = event.text();
        if text.is_empty() {
            continue;
        }
        if event.is_final_response() {
            final_response = text.clone();
        }
        trace.push(AgentTraceEntry {
            agent: event.author,
            content: text,
            timestamp: Utc::now().timestamp_millis(),
        });
    }

    if final_response.is_empty() {
        if let Some(last) = trace.last() {
            final_response = last.content.clone();
        }
    }
    Ok((final_response, trace))
}
