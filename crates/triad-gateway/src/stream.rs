//! `GET /api/stream`: relay the pipeline as Server-Sent Events.
//!
//! Event types: `agent_status {agent, status}`, `agent_text {agent, content}`,
//! `done {sessionId}` and `error {error}`; every payload carries a
//! millisecond `timestamp`.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderName, HeaderValue, header};
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures::Stream;
use pin_project_lite::pin_project;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use triad_agent::AgentError;
use triad_core::types::Content;

use crate::error::ApiError;
use crate::stage::{StageTracker, Transition};
use crate::state::{GatewayState, resolve_ids};

const SSE_BUFFER: usize = 64;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuery {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

struct StreamRequest {
    message: String,
    session_id: String,
    user_id: String,
}

pin_project! {
    /// Cancels the run when the response body is dropped.
    struct CancelOnDrop<S> {
        #[pin]
        inner: S,
        _guard: DropGuard,
    }
}

impl<S: Stream> Stream for CancelOnDrop<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<S::Item>> {
        self.project().inner.poll_next(cx)
    }
}

fn frame(kind: &str, mut payload: Value) -> SseEvent {
    payload["timestamp"] = json!(Utc::now().timestamp_millis());
    SseEvent::default().event(kind).data(payload.to_string())
}

fn status_frame(transition: Transition) -> SseEvent {
    frame(
        "agent_status",
        json!({ "agent": transition.stage.as_str(), "status": transition.status.as_str() }),
    )
}

pub async fn stream_handler(
    State(state): State<Arc<GatewayState>>,
    query: Result<Query<StreamQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
    let message = query
        .message
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .ok_or_else(|| ApiError::Validation("Missing required query param: message".into()))?;
    let (session_id, user_id) = resolve_ids(query.session_id, query.user_id);

    info!(session_id = %session_id, user_id = %user_id, "Stream request");

    let (tx, rx) = mpsc::channel(SSE_BUFFER);
    let cancel = CancellationToken::new();
    let request = StreamRequest {
        message,
        session_id,
        user_id,
    };
    tokio::spawn(relay(state, request, tx, cancel.clone()));

    let body = CancelOnDrop {
        inner: ReceiverStream::new(rx).map(Ok::<_, Infallible>),
        _guard: cancel.drop_guard(),
    };
    let headers = [
        (header::CONNECTION, HeaderValue::from_static("keep-alive")),
        (HeaderName::from_static("x-accel-buffering"), HeaderValue::from_static("no")),
    ];
    Ok((headers, Sse::new(body)).into_response())
}

/// Run the pipeline and translate its events into SSE frames. Always ends
/// with exactly one `done` or `error` frame unless the client went away.
async fn relay(
    state: Arc<GatewayState>,
    request: StreamRequest,
    tx: mpsc::Sender<SseEvent>,
    cancel: CancellationToken,
) {
    let timeout = state.pipeline_timeout;
    let drive = forward_events(&state, &request, &tx, cancel.clone());

    let (kind, error) = match tokio::time::timeout(timeout, drive).await {
        Ok(Ok(())) if cancel.is_cancelled() => {
            debug!(session_id = %request.session_id, "Client disconnected");
            return;
        }
        Ok(Ok(())) => {
            let _ = tx
                .send(frame("done", json!({ "sessionId": request.session_id })))
                .await;
            info!(session_id = %request.session_id, "Stream complete");
            return;
        }
        Ok(Err(AgentError::Cancelled)) => {
            debug!(session_id = %request.session_id, "Stream cancelled");
            return;
        }
        Ok(Err(e)) => ("pipeline", e.to_string()),
        Err(_) => {
            cancel.cancel();
            ("timeout", format!("Pipeline timed out after {}s", timeout.as_secs()))
        }
    };

    warn!(session_id = %request.session_id, kind, error = %error, "Stream failed");
    #[cfg(feature = "metrics")]
    crate::metrics::record_error(kind);
    let _ = tx.send(frame("error", json!({ "error": error }))).await;
}

async fn forward_events(
    state: &GatewayState,
    request: &StreamRequest,
    tx: &mpsc::Sender<SseEvent>,
    cancel: CancellationToken,
) -> Result<(), AgentError> {
    let send = |event: SseEvent| async move {
        tx.send(event).await.map_err(|_| AgentError::Cancelled)
    };

    state.ensure_session(&request.user_id, &request.session_id).await?;

    let mut tracker = StageTracker::new();
    send(status_frame(tracker.start())).await?;

    let mut events = state
        .runner
        .run(
            &request.user_id,
            &request.session_id,
            Content::user_text(request.message.clone()),
            cancel,
        )
        .await?;

    while let Some(event) = events.next().await {
        let event = event?;

        for transition in tracker.enter(&event.author) {
            send(status_frame(transition)).await?;
        }

        let text = event.text();
        if !text.is_empty() {
            let agent = tracker.current().as_str();
            send(frame("agent_text", json!({ "agent": agent, "content": text }))).await?;
        }

        if event.is_final_response() {
            if let Some(transition) = tracker.complete() {
                send(status_frame(transition)).await?;
            }
        }
    }
    Ok(())
}
