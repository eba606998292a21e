//! Runner: drives an agent against a stored session and streams its events.

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use triad_core::event::{Event, USER_AUTHOR};
use triad_core::session::{SessionHandle, SessionKey, SessionService};
use triad_core::types::Content;

use crate::Agent;
use crate::context::{InvocationContext, RunConfig};
use crate::error::AgentError;

const EVENT_BUFFER: usize = 64;

pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event, AgentError>> + Send>>;

pub struct Runner {
    app_name: String,
    agent: Arc<dyn Agent>,
    session_service: Arc<dyn SessionService>,
    run_config: RunConfig,
}

impl Runner {
    pub fn new(
        app_name: impl Into<String>,
        agent: Arc<dyn Agent>,
        session_service: Arc<dyn SessionService>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            agent,
            session_service,
            run_config: RunConfig::default(),
        }
    }

    pub fn with_run_config(mut self, run_config: RunConfig) -> Self {
        self.run_config = run_config;
        self
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }

    pub fn session_service(&self) -> &Arc<dyn SessionService> {
        &self.session_service
    }

    pub fn session_key(&self, user_id: &str, session_id: &str) -> SessionKey {
        SessionKey::new(&self.app_name, user_id, session_id)
    }

    /// Submit one user turn and stream the resulting events.
    ///
    /// The session must already exist. The agent runs on its own task and
    /// stops when `cancel` fires or the returned stream is dropped. Partial
    /// events are streamed but not recorded in the session. A failure ends
    /// the stream with one `Err` item.
    pub async fn run(
        &self,
        user_id: &str,
        session_id: &str,
        new_message: Content,
        cancel: CancellationToken,
    ) -> Result<EventStream, AgentError> {
        let key = self.session_key(user_id, session_id);
        let handle = self
            .session_service
            .get_session(&key)
            .await?
            .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))?;

        let invocation_id = format!("e-{}", uuid::Uuid::new_v4());
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let agent = self.agent.clone();
        let run_config = self.run_config;

        info!(
            invocation_id = %invocation_id,
            session_id = %session_id,
            user_id = %user_id,
            agent = %agent.name(),
            "Starting invocation"
        );

        tokio::spawn(async move {
            let events = tx.clone();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(AgentError::Cancelled),
                _ = events.closed() => Err(AgentError::Cancelled),
                result = invoke(agent, handle, invocation_id.clone(), new_message, tx.clone(), run_config) => result,
            };

            match outcome {
                Ok(()) => debug!(invocation_id = %invocation_id, "Invocation complete"),
                Err(AgentError::Cancelled) => {
                    info!(invocation_id = %invocation_id, "Invocation cancelled");
                }
                Err(e) => {
                    warn!(invocation_id = %invocation_id, error = %e, "Invocation failed");
                    let _ = tx.send(Err(e)).await;
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

async fn invoke(
    agent: Arc<dyn Agent>,
    handle: SessionHandle,
    invocation_id: String,
    new_message: Content,
    events: mpsc::Sender<Result<Event, AgentError>>,
    run_config: RunConfig,
) -> Result<(), AgentError> {
    // Held until the invocation ends; a second run on this session waits here.
    let session = handle.lock_owned().await;
    let mut ctx = InvocationContext::new(invocation_id.clone(), session, events, run_config);
    ctx.record(Event::new(invocation_id, USER_AUTHOR, Some(new_message)));
    agent.run(&mut ctx).await
}
