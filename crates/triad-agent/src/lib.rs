//! Pipeline runtime: agents, sequential composition, and the runner.
//!
//! An [`Agent`] runs inside an [`InvocationContext`] that owns the locked
//! session and the channel back to the caller. [`LlmAgent`] talks to a model
//! and runs tools; [`SequentialAgent`] chains agents; [`Runner`] ties an
//! agent to a session store and exposes the run as a stream of events.

use async_trait::async_trait;

pub mod context;
pub mod error;
pub mod instruction;
pub mod llm_agent;
pub mod pipeline;
pub mod runner;
pub mod sequential;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use context::{InvocationContext, RunConfig};
pub use error::AgentError;
pub use llm_agent::LlmAgent;
pub use pipeline::{build_pipeline, build_runner};
pub use runner::{EventStream, Runner};
pub use sequential::SequentialAgent;

#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Run to completion, emitting events through the context.
    async fn run(&self, ctx: &mut InvocationContext) -> Result<(), AgentError>;
}
