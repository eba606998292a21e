//! An agent backed by one model: instruction, tools, and a tool-calling loop.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use triad_core::event::{Event, USER_AUTHOR};
use triad_core::types::{Content, Part, Role};
use triad_providers::{LlmProvider, LlmRequest};
use triad_tools::{ToolError, ToolRegistry};

use crate::context::InvocationContext;
use crate::error::AgentError;
use crate::instruction::render_instruction;
use crate::Agent;

pub struct LlmAgent {
    name: String,
    description: String,
    instruction: String,
    model: Arc<dyn LlmProvider>,
    tools: ToolRegistry,
    output_key: Option<String>,
}

impl LlmAgent {
    pub fn new(name: impl Into<String>, model: Arc<dyn LlmProvider>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            instruction: String::new(),
            model,
            tools: ToolRegistry::new(),
            output_key: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Store the agent's final text under `key` in session state.
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    pub fn output_key(&self) -> Option<&str> {
        self.output_key.as_deref()
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.list()
    }

    /// Conversation history as this agent sees it.
    ///
    /// The user's turns and this agent's own turns are kept as they are.
    /// Turns by other agents become user-role context.
    fn history(&self, events: &[Event]) -> Vec<Content> {
        events
            .iter()
            .filter_map(|event| {
                let content = event.content.as_ref()?;
                if content.parts.is_empty() {
                    return None;
                }
                if event.author == USER_AUTHOR || event.author == self.name {
                    Some(content.clone())
                } else {
                    foreign_context(&event.author, content)
                }
            })
            .collect()
    }

    fn build_request(&self, ctx: &InvocationContext) -> LlmRequest {
        let instruction = render_instruction(&self.instruction, ctx.state());
        LlmRequest {
            contents: self.history(&ctx.session().events),
            system_instruction: (!instruction.is_empty()).then_some(instruction),
            tools: self.tools.declarations(),
        }
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<Value, AgentError> {
        match self.tools.call(name, args).await {
            Ok(value) => Ok(value),
            Err(ToolError::Unknown(tool)) => Err(AgentError::Tool(format!(
                "Function {tool} is not found in the tools of {}",
                self.name
            ))),
            Err(e) => {
                warn!(agent = %self.name, tool = %name, error = %e, "Tool call failed");
                Ok(json!({ "error": e.to_string() }))
            }
        }
    }
}

/// Reframe another agent's turn as context for this one.
fn foreign_context(author: &str, content: &Content) -> Option<Content> {
    let lines: Vec<String> = content
        .parts
        .iter()
        .filter_map(|part| match part {
            Part::Text { text } if text.is_empty() => None,
            Part::Text { text } => Some(format!("[{author}] said: {text}")),
            Part::FunctionCall { name, args, .. } => {
                Some(format!("[{author}] called tool `{name}` with parameters: {args}"))
            }
            Part::FunctionResponse { name, response, .. } => {
                Some(format!("[{author}] `{name}` tool returned result: {response}"))
            }
        })
        .collect();
    if lines.is_empty() {
        return None;
    }
    Some(Content::user_text(format!("For context: {}", lines.join("\n"))))
}

/// Give every function call an id so calls and responses can be paired.
fn assign_call_ids(content: &mut Content) {
    for part in &mut content.parts {
        if let Part::FunctionCall { id, .. } = part {
            if id.is_none() {
                *id = Some(format!("call_{}", uuid::Uuid::new_v4().simple()));
            }
        }
    }
}

#[async_trait]
impl Agent for LlmAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn run(&self, ctx: &mut InvocationContext) -> Result<(), AgentError> {
        let run_config = ctx.run_config();

        for iteration in 0..run_config.max_tool_iterations {
            debug!(agent = %self.name, iteration, "Agent loop iteration");

            let request = self.build_request(ctx);
            let mut stream = self.model.generate(&request, run_config.streaming).await?;

            let mut last_partial: Option<Content> = None;
            let mut final_response = None;
            while let Some(item) = stream.next().await {
                let response = item?;
                if response.partial {
                    let mut event = Event::new(ctx.invocation_id(), &self.name, response.content.clone());
                    event.partial = true;
                    ctx.emit(event).await?;
                    last_partial = response.content;
                    continue;
                }
                final_response = Some(response);
                break;
            }

            let (content, turn_complete) = match final_response {
                Some(r) => (r.content, r.turn_complete),
                None => (last_partial, true),
            };
            let mut content = content.unwrap_or_else(|| Content::model_text(""));
            assign_call_ids(&mut content);

            let mut event = Event::new(ctx.invocation_id(), &self.name, Some(content.clone()));
            event.turn_complete = turn_complete;
            ctx.emit(event).await?;

            if !content.has_function_calls() {
                if let Some(key) = &self.output_key {
                    ctx.set_state(key.clone(), Value::String(content.text()));
                }
                info!(agent = %self.name, iterations = iteration + 1, "Agent finished");
                return Ok(());
            }

            let mut responses = Vec::new();
            for (id, name, args) in content.function_calls() {
                let response = self.call_tool(name, args.clone()).await?;
                responses.push(Part::FunctionResponse {
                    id: id.clone(),
                    name: name.to_string(),
                    response,
                });
            }
            let event = Event::new(ctx.invocation_id(), &self.name, Some(Content::new(Role::User, responses)));
            ctx.emit(event).await?;
        }

        warn!(agent = %self.name, limit = run_config.max_tool_iterations, "Tool iteration limit reached");
        Err(AgentError::MaxIterations {
            agent: self.name.clone(),
            limit: run_config.max_tool_iterations,
        })
    }
}
