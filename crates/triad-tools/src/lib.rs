//! Tools exposed to the model during agent runs.
//!
//! Each tool implements [`Tool`]. Most tools are easier to write against
//! [`TypedTool`], which decodes arguments into a struct and serialises the
//! output, and are registered through the [`Typed`] adapter.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use triad_core::types::ToolDeclaration;

pub mod calculate;
pub mod fetch_data;

pub use calculate::CalculateTool;
pub use fetch_data::FetchDataTool;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    Unknown(String),

    #[error("Invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("Tool execution failed: {0}")]
    Execution(#[from] anyhow::Error),
}

/// The core tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name as exposed to the LLM (e.g., "fetch_data").
    fn name(&self) -> &str;

    /// Human-readable description for the LLM.
    fn description(&self) -> &str;

    /// JSON Schema describing the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, args: Value) -> Result<Value, ToolError>;

    fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: Some(self.parameters_schema()),
        }
    }
}

/// A tool with typed arguments and output.
#[async_trait]
pub trait TypedTool: Send + Sync + 'static {
    type Args: DeserializeOwned + Send;
    type Output: Serialize + Send;

    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;

    async fn call(&self, args: Self::Args) -> Result<Self::Output, ToolError>;
}

/// Adapts a [`TypedTool`] to the untyped [`Tool`] interface.
///
/// Arguments are checked against the schema's `required` list, then decoded.
pub struct Typed<T>(pub T);

impl<T: TypedTool> Typed<T> {
    fn invalid(&self, message: impl Into<String>) -> ToolError {
        ToolError::InvalidArguments {
            tool: self.0.name().to_string(),
            message: message.into(),
        }
    }

    fn check_required(&self, args: &Value) -> Result<(), ToolError> {
        let Some(obj) = args.as_object() else {
            return Err(self.invalid("arguments must be a JSON object"));
        };
        let schema = self.0.parameters_schema();
        let missing: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .filter(|field| obj.get(*field).is_none_or(Value::is_null))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(self.invalid(format!("missing required field(s): {}", missing.join(", "))))
        }
    }
}

#[async_trait]
impl<T: TypedTool> Tool for Typed<T> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn description(&self) -> &str {
        self.0.description()
    }

    fn parameters_schema(&self) -> Value {
        self.0.parameters_schema()
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        self.check_required(&args)?;
        let decoded: T::Args = serde_json::from_value(args).map_err(|e| self.invalid(e.to_string()))?;
        let output = self.0.call(decoded).await?;
        serde_json::to_value(output).map_err(|e| ToolError::Execution(e.into()))
    }
}

/// Registry of available tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A tool with the same name replaces the earlier one.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().find(|t| t.name() == name).map(|t| t.as_ref())
    }

    pub fn list(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Declarations advertised to the model.
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.tools.iter().map(|t| t.declaration()).collect()
    }

    /// Look up a tool by name and run it.
    pub async fn call(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        let tool = self.get(name).ok_or_else(|| ToolError::Unknown(name.to_string()))?;
        info!(tool = %name, "Executing tool");
        debug!(tool = %name, %args, "Tool arguments");
        tool.execute(args).await
    }
}

/// Register the executor's tools: `fetch_data` and `calculate`.
pub fn register_builtin_tools(registry: &mut ToolRegistry) {
    registry.register(Box::new(Typed(FetchDataTool)));
    registry.register(Box::new(Typed(CalculateTool)));
}
