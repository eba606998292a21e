//! The planner → executor → reviewer pipeline.

use std::sync::Arc;

use triad_core::session::SessionService;
use triad_providers::LlmProvider;
use triad_tools::{ToolRegistry, register_builtin_tools};

use crate::Agent;
use crate::context::RunConfig;
use crate::llm_agent::LlmAgent;
use crate::runner::Runner;
use crate::sequential::SequentialAgent;

pub const APP_NAME: &str = "my-multi-agent-app";
pub const PIPELINE_NAME: &str = "multi_agent_pipeline";

pub const PLANNER: &str = "planner_agent";
pub const EXECUTOR: &str = "executor_agent";
pub const REVIEWER: &str = "reviewer_agent";

/// State key the planner writes and the executor and reviewer read.
pub const PLAN_KEY: &str = "execution_plan";
/// State key the executor writes and the reviewer reads.
pub const RESULT_KEY: &str = "execution_result";

const PLANNER_INSTRUCTION: &str = "\
You are a strategic planner. Your job is to analyze user requests and break them down into clear, actionable steps.

When given a user request:
1. Identify the main goal and any sub-goals
2. List the specific steps needed to accomplish the goal
3. Identify what information or tools might be needed
4. Estimate complexity (simple/medium/complex)

Format your plan as a structured list. Be concise but thorough.
Always end with \"PLAN COMPLETE\" on a new line.";

const EXECUTOR_INSTRUCTION: &str = "\
You are a precise executor. You receive a plan and carry it out step by step.

The execution plan is:
{execution_plan}

For each step in the plan:
1. Execute the step using available tools if needed
2. Record the result of each step
3. If a step fails, note the failure and continue with remaining steps

Use the fetch_data tool to retrieve information when needed.
Use the calculate tool for any math operations.

Report your execution results clearly, showing what was accomplished in each step.
End your response with \"EXECUTION COMPLETE\" on a new line.";

const REVIEWER_INSTRUCTION: &str = "\
You are a skilled reviewer and communicator. Your job is to synthesize the work done by the planning and execution stages into a clear, helpful response for the user.

The original plan was:
{execution_plan}

The execution results are:
{execution_result}

Review the above and create a final response that:
1. Directly answers the user's original request
2. Summarizes key findings or results clearly
3. Highlights any important caveats or limitations
4. Is written in a friendly, conversational tone
5. Is concise; avoid repeating everything from the execution log

Do NOT include \"PLAN COMPLETE\" or \"EXECUTION COMPLETE\" in your response.
Write as if speaking directly to the user.";

pub fn planner_agent(model: Arc<dyn LlmProvider>) -> LlmAgent {
    LlmAgent::new(PLANNER, model)
        .with_description("Analyzes user requests and creates structured execution plans")
        .with_instruction(PLANNER_INSTRUCTION)
        .with_output_key(PLAN_KEY)
}

pub fn executor_agent(model: Arc<dyn LlmProvider>) -> LlmAgent {
    let mut tools = ToolRegistry::new();
    register_builtin_tools(&mut tools);
    LlmAgent::new(EXECUTOR, model)
        .with_description("Executes plans step by step, using tools when needed")
        .with_instruction(EXECUTOR_INSTRUCTION)
        .with_tools(tools)
        .with_output_key(RESULT_KEY)
}

pub fn reviewer_agent(model: Arc<dyn LlmProvider>) -> LlmAgent {
    LlmAgent::new(REVIEWER, model)
        .with_description("Reviews execution results and synthesizes a final user-friendly response")
        .with_instruction(REVIEWER_INSTRUCTION)
}

/// Build the three-stage pipeline. All stages share one model instance.
pub fn build_pipeline(model: Arc<dyn LlmProvider>) -> SequentialAgent {
    let stages: Vec<Arc<dyn Agent>> = vec![
        Arc::new(planner_agent(model.clone())),
        Arc::new(executor_agent(model.clone())),
        Arc::new(reviewer_agent(model)),
    ];
    tracing::info!(pipeline = %PIPELINE_NAME, "Pipeline: planner -> executor -> reviewer");
    SequentialAgent::new(PIPELINE_NAME, stages)
        .with_description("Sequential multi-agent pipeline: planner -> executor -> reviewer")
}

/// Build the runner for the pipeline. Call once at startup and share it.
pub fn build_runner(
    model: Arc<dyn LlmProvider>,
    session_service: Arc<dyn SessionService>,
    run_config: RunConfig,
) -> Runner {
    Runner::new(APP_NAME, Arc::new(build_pipeline(model)), session_service).with_run_config(run_config)
}
