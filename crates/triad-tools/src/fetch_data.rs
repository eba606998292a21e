//! fetch_data tool: mock data retrieval.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::{ToolError, TypedTool};

const DEFAULT_SOURCE: &str = "default";
const SIMULATED_LATENCY: Duration = Duration::from_millis(80);

pub struct FetchDataTool;

#[derive(Debug, Deserialize)]
pub struct FetchDataArgs {
    pub query: String,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchDataOutput {
    pub query: String,
    pub source: String,
    pub results: Vec<FetchResult>,
    pub retrieved_at: String,
    pub total_count: usize,
}

#[derive(Debug, Serialize)]
pub struct FetchResult {
    pub id: u32,
    pub title: String,
    pub relevance: f64,
    pub summary: String,
}

#[async_trait]
impl TypedTool for FetchDataTool {
    type Args = FetchDataArgs;
    type Output = FetchDataOutput;

    fn name(&self) -> &str {
        "fetch_data"
    }

    fn description(&self) -> &str {
        "Fetches relevant data or information based on a search query."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query to fetch data for"
                },
                "source": {
                    "type": "string",
                    "description": "The data source to query (optional, defaults to \"default\")"
                }
            },
            "required": ["query"]
        })
    }

    async fn call(&self, args: FetchDataArgs) -> Result<FetchDataOutput, ToolError> {
        let query = args.query;
        let source = args
            .source
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SOURCE.to_string());
        info!(%query, %source, "Fetching data");

        tokio::time::sleep(SIMULATED_LATENCY).await;

        let results = vec![
            FetchResult {
                id: 1,
                title: format!("Top result for \"{query}\""),
                relevance: 0.95,
                summary: format!("Primary information about {query}."),
            },
            FetchResult {
                id: 2,
                title: format!("Secondary result for \"{query}\""),
                relevance: 0.82,
                summary: format!("Additional context for {query} from {source}."),
            },
        ];

        Ok(FetchDataOutput {
            total_count: results.len(),
            query,
            source,
            results,
            retrieved_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        })
    }
}
