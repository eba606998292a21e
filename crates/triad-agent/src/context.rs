//! Per-invocation state shared by the agents of one run.

use tokio::sync::OwnedMutexGuard;
use tokio::sync::mpsc;

use triad_core::config::Config;
use triad_core::event::Event;
use triad_core::session::{Session, SessionState};

use crate::error::AgentError;

/// Knobs for a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunConfig {
    pub max_tool_iterations: u32,
    /// Ask the model for incremental (partial) responses.
    pub streaming: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: triad_core::config::DEFAULT_MAX_TOOL_ITERATIONS,
            streaming: false,
        }
    }
}

impl RunConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_tool_iterations: config.max_tool_iterations(),
            streaming: config.streaming(),
        }
    }
}

pub type EventSender = mpsc::Sender<Result<Event, AgentError>>;

/// Everything an agent needs while it runs: the locked session, the event
/// channel back to the caller, and the run configuration.
///
/// The session lock is held for the lifetime of the context, so two
/// invocations on the same session never interleave.
pub struct InvocationContext {
    invocation_id: String,
    session: OwnedMutexGuard<Session>,
    events: EventSender,
    run_config: RunConfig,
}

impl InvocationContext {
    pub fn new(
        invocation_id: impl Into<String>,
        session: OwnedMutexGuard<Session>,
        events: EventSender,
        run_config: RunConfig,
    ) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            session,
            events,
            run_config,
        }
    }

    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> &SessionState {
        &self.session.state
    }

    pub fn set_state(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.session.set_state(key, value);
    }

    pub fn run_config(&self) -> RunConfig {
        self.run_config
    }

    /// Record an event in the session history without emitting it.
    pub fn record(&mut self, event: Event) {
        self.session.append_event(event);
    }

    /// Record an event and send it to the caller.
    ///
    /// Fails with [`AgentError::Cancelled`] once the caller has stopped
    /// listening.
    pub async fn emit(&mut self, event: Event) -> Result<(), AgentError> {
        self.session.append_event(event.clone());
        self.events
            .send(Ok(event))
            .await
            .map_err(|_| AgentError::Cancelled)
    }
}
