use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::Agent;
use crate::context::InvocationContext;
use crate::error::AgentError;

/// Runs its sub-agents one after another within the same invocation.
pub struct SequentialAgent {
    name: String,
    description: String,
    sub_agents: Vec<Arc<dyn Agent>>,
}

impl SequentialAgent {
    pub fn new(name: impl Into<String>, sub_agents: Vec<Arc<dyn Agent>>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            sub_agents,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn sub_agents(&self) -> &[Arc<dyn Agent>] {
        &self.sub_agents
    }
}

#[async_trait]
impl Agent for SequentialAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn run(&self, ctx: &mut InvocationContext) -> Result<(), AgentError> {
        for agent in &self.sub_agents {
            info!(pipeline = %self.name, agent = %agent.name(), "Running sub-agent");
            agent.run(ctx).await?;
        }
        Ok(())
    }
}
