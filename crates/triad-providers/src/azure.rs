//! Azure OpenAI Chat Completions provider.
//!
//! Talks to `{endpoint}/openai/deployments/{deployment}/chat/completions` and
//! translates between the pipeline's [`Content`] turns and OpenAI chat
//! messages. Reasoning-class deployments reject `temperature`, so the request
//! body has no such field.

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_stream::StreamExt;
use tracing::{debug, trace, warn};

use triad_core::config::{AzureSettings, Config};
use triad_core::types::{Content, Part, Role, ToolDeclaration};

use crate::error::{EncodedError, ProviderError};
use crate::sse::{SseEvent, parse_sse_response};
use crate::{LlmProvider, LlmRequest, LlmResponse, LlmResponseStream};

pub struct AzureOpenAiProvider {
    settings: AzureSettings,
    model_label: String,
    client: reqwest::Client,
}

impl AzureOpenAiProvider {
    pub fn new(settings: AzureSettings) -> Self {
        Self {
            model_label: format!("azure/{}", settings.deployment),
            settings,
            client: reqwest::Client::new(),
        }
    }

    /// Build from config, failing fast when endpoint, key or deployment is missing.
    pub fn from_config(config: &Config) -> triad_core::error::Result<Self> {
        Ok(Self::new(config.azure_settings()?))
    }

    pub fn deployment(&self) -> &str {
        &self.settings.deployment
    }

    pub fn completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.settings.endpoint, self.settings.deployment, self.settings.api_version
        )
    }

    async fn send(&self, request: &LlmRequest, stream: bool) -> Result<reqwest::Response, ProviderError> {
        let tools = format_tools(&request.tools);
        let body = ChatRequest {
            model: self.settings.deployment.clone(),
            messages: build_messages(request),
            max_completion_tokens: self.settings.max_completion_tokens,
            tool_choice: (!tools.is_empty()).then_some("auto"),
            tools: (!tools.is_empty()).then_some(tools),
            stream,
        };

        debug!(
            deployment = %self.settings.deployment,
            messages = body.messages.len(),
            stream,
            "Calling Azure OpenAI"
        );

        let response = self
            .client
            .post(self.completions_url())
            .header("api-key", &self.settings.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!(status, "Azure OpenAI request failed");
            return Err(ProviderError::Http { status, body });
        }
        Ok(response)
    }
}

// --- Wire types ---

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Value>,
    max_completion_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    message: CompletionMessage,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    #[serde(default)]
    id: Option<String>,
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Tool call assembled from streaming deltas.
#[derive(Debug, Clone, Default)]
struct ToolCallAccumulator {
    id: Option<String>,
    name: String,
    arguments: String,
}

// --- Translation ---

fn synthetic_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// Parse tool-call arguments. Anything that is not a JSON object becomes `{}`.
fn parse_arguments(raw: &str) -> Value {
    let raw = raw.trim();
    if raw.is_empty() {
        return json!({});
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ Value::Object(_)) => v,
        Ok(other) => {
            trace!(%other, "Tool arguments are not an object");
            json!({})
        }
        Err(e) => {
            trace!(%e, raw, "Failed to parse tool arguments");
            json!({})
        }
    }
}

/// Flatten conversation contents into OpenAI chat messages.
///
/// Model turns become assistant messages (with `tool_calls` when they carry
/// function calls), function responses become `tool` messages, and other
/// text turns keep their role. Turns with nothing to say are dropped.
pub fn build_messages(request: &LlmRequest) -> Vec<Value> {
    let mut messages = Vec::new();

    if let Some(system) = request.system_instruction.as_deref() {
        if !system.is_empty() {
            messages.push(json!({ "role": "system", "content": system }));
        }
    }

    // Ids synthesised for calls that had none, so the matching response can
    // refer to the same id.
    let mut pending_ids: HashMap<String, Vec<String>> = HashMap::new();

    for content in &request.contents {
        let text = content.text();
        match content.role {
            Role::Model => {
                let tool_calls: Vec<Value> = content
                    .function_calls()
                    .map(|(id, name, args)| {
                        let id = id.clone().unwrap_or_else(|| {
                            let id = synthetic_call_id();
                            pending_ids.entry(name.to_string()).or_default().push(id.clone());
                            id
                        });
                        let args = if args.is_null() { json!({}) } else { args.clone() };
                        json!({
                            "id": id,
                            "type": "function",
                            "function": { "name": name, "arguments": args.to_string() }
                        })
                    })
                    .collect();

                if !tool_calls.is_empty() {
                    let content_value = if text.is_empty() { Value::Null } else { json!(text) };
                    messages.push(json!({
                        "role": "assistant",
                        "content": content_value,
                        "tool_calls": tool_calls,
                    }));
                } else if !text.is_empty() {
                    messages.push(json!({ "role": "assistant", "content": text }));
                }
            }
            Role::User | Role::System => {
                for part in &content.parts {
                    if let Part::FunctionResponse { id, name, response } = part {
                        let id = id
                            .clone()
                            .or_else(|| {
                                pending_ids
                                    .get_mut(name)
                                    .filter(|ids| !ids.is_empty())
                                    .map(|ids| ids.remove(0))
                            })
                            .unwrap_or_else(synthetic_call_id);
                        let body = match response {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        messages.push(json!({
                            "role": "tool",
                            "tool_call_id": id,
                            "content": body,
                        }));
                    }
                }
                if !text.is_empty() {
                    let role = if content.role == Role::System { "system" } else { "user" };
                    messages.push(json!({ "role": role, "content": text }));
                }
            }
        }
    }

    messages
}

/// Translate tool declarations into OpenAI function-tool entries.
pub fn format_tools(tools: &[ToolDeclaration]) -> Vec<Value> {
    tools
        .iter()
        .filter_map(|t| {
            if t.name.trim().is_empty() {
                return None;
            }
            let parameters = match &t.parameters {
                None => json!({ "type": "object", "properties": {} }),
                Some(p @ Value::Object(_)) => p.clone(),
                Some(_) => {
                    warn!(tool = %t.name, "Skipping tool with non-object parameters");
                    return None;
                }
            };
            Some(json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": parameters,
                }
            }))
        })
        .collect()
}

fn parse_completion(body: &str) -> Result<LlmResponse, ProviderError> {
    let completion: ChatCompletion =
        serde_json::from_str(body).map_err(|e| ProviderError::Decode(e.to_string()))?;

    let Some(choice) = completion.choices.into_iter().next() else {
        return Ok(LlmResponse::complete(Content::model_text("")));
    };

    let calls = choice.message.tool_calls.unwrap_or_default();
    if !calls.is_empty() {
        let parts = calls
            .into_iter()
            .map(|call| Part::FunctionCall {
                id: Some(call.id.unwrap_or_else(synthetic_call_id)),
                name: call.function.name,
                args: parse_arguments(&call.function.arguments),
            })
            .collect();
        return Ok(LlmResponse::complete(Content::new(Role::Model, parts)));
    }

    Ok(LlmResponse::complete(Content::model_text(
        choice.message.content.unwrap_or_default(),
    )))
}

// --- Streaming ---

type SseStream = Pin<Box<dyn Stream<Item = Result<SseEvent, ProviderError>> + Send>>;

struct StreamState {
    sse: SseStream,
    accumulated: String,
    tool_calls: Vec<ToolCallAccumulator>,
    finished: bool,
}

impl StreamState {
    fn text_response(&self, done: bool) -> LlmResponse {
        LlmResponse {
            content: Some(Content::model_text(self.accumulated.clone())),
            partial: !done,
            turn_complete: done,
        }
    }

    fn apply_tool_deltas(&mut self, deltas: Vec<ToolCallDelta>) {
        for delta in deltas {
            if self.tool_calls.len() <= delta.index {
                self.tool_calls.resize_with(delta.index + 1, ToolCallAccumulator::default);
            }
            let acc = &mut self.tool_calls[delta.index];
            if let Some(id) = delta.id {
                acc.id = Some(id);
            }
            if let Some(function) = delta.function {
                if let Some(name) = function.name {
                    acc.name.push_str(&name);
                }
                if let Some(args) = function.arguments {
                    acc.arguments.push_str(&args);
                }
            }
        }
    }

    fn tool_call_response(&mut self) -> LlmResponse {
        let mut parts: Vec<Part> = Vec::new();
        if !self.accumulated.is_empty() {
            parts.push(Part::Text {
                text: self.accumulated.clone(),
            });
        }
        parts.extend(
            self.tool_calls
                .drain(..)
                .filter(|tc| !tc.name.is_empty())
                .map(|tc| Part::FunctionCall {
                    id: Some(tc.id.unwrap_or_else(synthetic_call_id)),
                    name: tc.name,
                    args: parse_arguments(&tc.arguments),
                }),
        );
        LlmResponse::complete(Content::new(Role::Model, parts))
    }

    /// Response for a finish (explicit or implied by end of stream).
    fn finish(&mut self) -> LlmResponse {
        self.finished = true;
        if self.tool_calls.iter().any(|tc| !tc.name.is_empty()) {
            self.tool_call_response()
        } else {
            self.text_response(true)
        }
    }
}

fn stream_responses(sse: SseStream) -> impl Stream<Item = Result<LlmResponse, EncodedError>> + Send {
    futures::stream::unfold(
        StreamState {
            sse,
            accumulated: String::new(),
            tool_calls: Vec::new(),
            finished: false,
        },
        |mut state| async move {
            if state.finished {
                return None;
            }
            loop {
                match state.sse.next().await {
                    Some(Ok(event)) => {
                        let data = event.data.trim();
                        if data == "[DONE]" {
                            return end_of_stream(state);
                        }

                        let chunk: ChatCompletionChunk = match serde_json::from_str(data) {
                            Ok(c) => c,
                            Err(e) => {
                                trace!(%e, data, "Failed to parse Azure OpenAI chunk");
                                continue;
                            }
                        };
                        let Some(choice) = chunk.choices.into_iter().next() else {
                            continue;
                        };

                        let delta = choice.delta.content.unwrap_or_default();
                        state.accumulated.push_str(&delta);
                        if let Some(deltas) = choice.delta.tool_calls {
                            state.apply_tool_deltas(deltas);
                        }

                        if choice.finish_reason.is_some() {
                            let response = state.finish();
                            return Some((Ok(response), state));
                        }
                        if !delta.is_empty() {
                            let response = state.text_response(false);
                            return Some((Ok(response), state));
                        }
                    }
                    Some(Err(e)) => {
                        state.finished = true;
                        return Some((Err(EncodedError::from(e)), state));
                    }
                    None => return end_of_stream(state),
                }
            }
        },
    )
}

/// The stream ended without a finish reason. Emit a final response if
/// anything was accumulated.
fn end_of_stream(mut state: StreamState) -> Option<(Result<LlmResponse, EncodedError>, StreamState)> {
    if state.accumulated.is_empty() && state.tool_calls.is_empty() {
        return None;
    }
    let response = state.finish();
    Some((Ok(response), state))
}

#[async_trait]
impl LlmProvider for AzureOpenAiProvider {
    fn id(&self) -> &str {
        "azure_openai"
    }

    fn model(&self) -> &str {
        &self.model_label
    }

    async fn generate(&self, request: &LlmRequest, stream: bool) -> Result<LlmResponseStream, EncodedError> {
        let response = self.send(request, stream).await?;

        if stream {
            let sse: SseStream = Box::pin(parse_sse_response(response));
            return Ok(Box::pin(stream_responses(sse)));
        }

        let body = response.text().await.map_err(ProviderError::from)?;
        let parsed = parse_completion(&body)?;
        Ok(Box::pin(futures::stream::iter(vec![Ok(parsed)])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn settings() -> AzureSettings {
        AzureSettings {
            endpoint: "https://example.openai.azure.com".into(),
            api_key: "k".into(),
            deployment: "gpt-chat".into(),
            api_version: "2025-04-01-preview".into(),
            max_completion_tokens: 2048,
        }
    }

    fn sse_from(frames: &[&str]) -> SseStream {
        let chunks: Vec<Result<Bytes, std::io::Error>> = frames
            .iter()
            .map(|f| Ok(Bytes::from(format!("data: {f}\n\n"))))
            .collect();
        Box::pin(crate::sse::parse_sse_stream(futures::stream::iter(chunks)))
    }

    async fn collect(frames: &[&str]) -> Vec<LlmResponse> {
        stream_responses(sse_from(frames))
            .map(|r| r.unwrap())
            .collect()
            .await
    }

    #[test]
    fn test_model_label_and_url() {
        let p = AzureOpenAiProvider::new(settings());
        assert_eq!(p.model(), "azure/gpt-chat");
        assert_eq!(
            p.completions_url(),
            "https://example.openai.azure.com/openai/deployments/gpt-chat/chat/completions?api-version=2025-04-01-preview"
        );
    }

    #[test]
    fn test_request_body_never_has_temperature() {
        let body = ChatRequest {
            model: "gpt-chat".into(),
            messages: vec![json!({"role": "user", "content": "hi"})],
            max_completion_tokens: 2048,
            tools: None,
            tool_choice: None,
            stream: false,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert!(value.get("temperature").is_none());
        assert!(value.get("tools").is_none());
        assert!(value.get("tool_choice").is_none());
        assert_eq!(value["max_completion_tokens"], 2048);
    }

    #[test]
    fn test_build_messages_flattens_roles() {
        let request = LlmRequest {
            system_instruction: Some("You plan.".into()),
            contents: vec![
                Content::user_text("Find sales data"),
                Content::model_text(""),
                Content::model_text("Here is a plan"),
                Content::new(Role::System, vec![Part::Text { text: "note".into() }]),
                Content::user_text(""),
            ],
            tools: vec![],
        };
        let messages = build_messages(&request);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], json!({"role": "system", "content": "You plan."}));
        assert_eq!(messages[1], json!({"role": "user", "content": "Find sales data"}));
        assert_eq!(messages[2], json!({"role": "assistant", "content": "Here is a plan"}));
        assert_eq!(messages[3], json!({"role": "system", "content": "note"}));
    }

    #[test]
    fn test_build_messages_tool_round_trip_shares_ids() {
        let request = LlmRequest {
            contents: vec![
                Content::new(
                    Role::Model,
                    vec![Part::FunctionCall {
                        id: None,
                        name: "calculate".into(),
                        args: json!({"expression": "2+2"}),
                    }],
                ),
                Content::new(
                    Role::User,
                    vec![Part::FunctionResponse {
                        id: None,
                        name: "calculate".into(),
                        response: json!({"result": 4}),
                    }],
                ),
            ],
            ..Default::default()
        };
        let messages = build_messages(&request);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "assistant");
        assert!(messages[0]["content"].is_null());
        let call = &messages[0]["tool_calls"][0];
        assert_eq!(call["type"], "function");
        assert_eq!(call["function"]["name"], "calculate");
        assert_eq!(call["function"]["arguments"], r#"{"expression":"2+2"}"#);
        let id = call["id"].as_str().unwrap();
        assert!(id.starts_with("call_"));
        assert_eq!(messages[1]["role"], "tool");
        assert_eq!(messages[1]["tool_call_id"], id);
        assert_eq!(messages[1]["content"], r#"{"result":4}"#);
    }

    #[test]
    fn test_format_tools_defaults_and_skips() {
        let tools = vec![
            ToolDeclaration {
                name: "fetch_data".into(),
                description: "Fetch".into(),
                parameters: None,
            },
            ToolDeclaration {
                name: " ".into(),
                description: "blank".into(),
                parameters: None,
            },
            ToolDeclaration {
                name: "broken".into(),
                description: "bad schema".into(),
                parameters: Some(json!("not an object")),
            },
        ];
        let formatted = format_tools(&tools);
        assert_eq!(formatted.len(), 1);
        assert_eq!(formatted[0]["type"], "function");
        assert_eq!(formatted[0]["function"]["name"], "fetch_data");
        assert_eq!(
            formatted[0]["function"]["parameters"],
            json!({"type": "object", "properties": {}})
        );
    }

    #[test]
    fn test_parse_completion_text_and_empty_choices() {
        let r = parse_completion(r#"{"choices":[{"message":{"content":"Hello"}}]}"#).unwrap();
        assert!(!r.partial);
        assert!(r.turn_complete);
        assert_eq!(r.content.unwrap().text(), "Hello");

        let r = parse_completion(r#"{"choices":[]}"#).unwrap();
        assert_eq!(r.content.unwrap().text(), "");
    }

    #[test]
    fn test_parse_completion_tool_call_with_bad_arguments() {
        let body = r#"{"choices":[{"message":{"content":null,"tool_calls":[
            {"id":"call_1","type":"function","function":{"name":"fetch_data","arguments":"{\"query\":\"sales\"}"}},
            {"id":"call_2","type":"function","function":{"name":"calculate","arguments":"not json"}}
        ]}}]}"#;
        let r = parse_completion(body).unwrap();
        let content = r.content.unwrap();
        let calls: Vec<_> = content.function_calls().collect();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0.as_deref(), Some("call_1"));
        assert_eq!(calls[0].1, "fetch_data");
        assert_eq!(calls[0].2, &json!({"query": "sales"}));
        assert_eq!(calls[1].2, &json!({}));
        assert_eq!(content.text(), "");
    }

    #[test]
    fn test_parse_completion_rejects_garbage() {
        let err = parse_completion("<html>").unwrap_err();
        assert!(matches!(err, ProviderError::Decode(_)));
    }

    #[tokio::test]
    async fn test_stream_accumulates_text_until_finish() {
        let responses = collect(&[
            r#"{"choices":[{"delta":{"role":"assistant"},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{"content":"lo"},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            r#"{"choices":[{"delta":{"content":"ignored"},"finish_reason":null}]}"#,
        ])
        .await;
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0].content.as_ref().unwrap().text(), "Hel");
        assert!(responses[0].partial);
        assert_eq!(responses[1].content.as_ref().unwrap().text(), "Hello");
        let last = &responses[2];
        assert!(!last.partial);
        assert!(last.turn_complete);
        assert_eq!(last.content.as_ref().unwrap().text(), "Hello");
    }

    #[tokio::test]
    async fn test_stream_without_finish_synthesises_final() {
        let responses = collect(&[
            r#"{"choices":[{"delta":{"content":"partial answer"},"finish_reason":null}]}"#,
            "[DONE]",
        ])
        .await;
        assert_eq!(responses.len(), 2);
        assert!(responses[0].partial);
        assert!(!responses[1].partial);
        assert!(responses[1].turn_complete);
        assert_eq!(responses[1].content.as_ref().unwrap().text(), "partial answer");
    }

    #[tokio::test]
    async fn test_stream_empty_yields_nothing() {
        let responses = collect(&["[DONE]"]).await;
        assert!(responses.is_empty());
    }

    #[tokio::test]
    async fn test_stream_tool_call_deltas() {
        let responses = collect(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_9","function":{"name":"calculate","arguments":""}}]},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"expression\":"}}]},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"6*7\"}"}}]},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
        ])
        .await;
        assert_eq!(responses.len(), 1);
        let content = responses[0].content.as_ref().unwrap();
        let calls: Vec<_> = content.function_calls().collect();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0.as_deref(), Some("call_9"));
        assert_eq!(calls[0].1, "calculate");
        assert_eq!(calls[0].2, &json!({"expression": "6*7"}));
    }

    #[tokio::test]
    async fn test_connect_is_refused_with_encoded_error() {
        let p = AzureOpenAiProvider::new(settings());
        let err = match p.connect(&LlmRequest::default()).await {
            Err(e) => e,
            Ok(_) => panic!("connect should fail"),
        };
        let body = err.body();
        assert_eq!(body.code, "500");
        assert!(body.message.contains("does not support live connections"));
    }
}
