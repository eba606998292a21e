//! Gateway integration tests: start a real gateway on a free port and drive
//! it over HTTP against a scripted model.
//!
//! Run with: `cargo test -p triad-gateway --test integration`

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use triad_agent::testing::ScriptedProvider;
use triad_agent::{RunConfig, build_runner};
use triad_core::config::Config;
use triad_core::session::InMemorySessionService;
use triad_core::types::{Content, Part, Role};
use triad_gateway::GatewayState;
use triad_providers::sse::parse_sse_response;
use triad_providers::{EncodedError, LlmRequest, LlmResponse};

fn stage_of(request: &LlmRequest) -> &'static str {
    let instruction = request.system_instruction.as_deref().unwrap_or_default();
    if instruction.starts_with("You are a strategic planner") {
        "planner"
    } else if instruction.starts_with("You are a precise executor") {
        "executor"
    } else {
        "reviewer"
    }
}

/// Planner answers "P", executor calls `calculate` then answers "E",
/// reviewer answers "R".
fn scripted_model() -> ScriptedProvider {
    ScriptedProvider::with_handler(|request| {
        let reply = match stage_of(request) {
            "planner" => Content::model_text("P"),
            "executor" if !request.contents.iter().any(|c| c.has_function_responses()) => {
                Content::new(
                    Role::Model,
                    vec![Part::FunctionCall {
                        id: None,
                        name: "calculate".into(),
                        args: json!({"expression": "2 + 3 * 4"}),
                    }],
                )
            }
            "executor" => Content::model_text("E"),
            _ => Content::model_text("R"),
        };
        Ok(vec![LlmResponse::complete(reply)])
    })
}

fn failing_model() -> ScriptedProvider {
    ScriptedProvider::with_handler(|_| Err(EncodedError::new("404", "deployment not found")))
}

/// Every stage streams two growing partials, then a final answer that
/// differs from the last partial.
fn streaming_model() -> ScriptedProvider {
    ScriptedProvider::with_handler(|request| {
        let answer = match stage_of(request) {
            "planner" => "Plan done",
            "executor" => "Executed",
            _ => "Reviewed",
        };
        let partial = |text: &str| LlmResponse {
            content: Some(Content::model_text(text)),
            partial: true,
            turn_complete: false,
        };
        Ok(vec![
            partial(&answer[..2]),
            partial(&answer[..answer.len() - 1]),
            LlmResponse::complete(Content::model_text(answer)),
        ])
    })
}

fn mentions(request: &LlmRequest, needle: &str) -> bool {
    request.contents.iter().any(|c| c.text().contains(needle))
}

/// Serve a gateway over `model` and return its base URL.
async fn start_test_gateway(
    model: impl Into<Arc<ScriptedProvider>>,
    pipeline_timeout: Option<Duration>,
) -> String {
    serve_gateway(model.into(), RunConfig::default(), pipeline_timeout).await
}

async fn start_streaming_gateway(model: ScriptedProvider) -> String {
    let run_config = RunConfig {
        streaming: true,
        ..RunConfig::default()
    };
    serve_gateway(Arc::new(model), run_config, None).await
}

async fn serve_gateway(
    model: Arc<ScriptedProvider>,
    run_config: RunConfig,
    pipeline_timeout: Option<Duration>,
) -> String {
    let runner = build_runner(model, Arc::new(InMemorySessionService::new()), run_config);
    let mut state = GatewayState::new(Arc::new(runner), &Config::default());
    if let Some(timeout) = pipeline_timeout {
        state = state.with_pipeline_timeout(timeout);
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(triad_gateway::serve(
        listener,
        Arc::new(state),
        std::future::pending(),
    ));
    format!("http://{addr}")
}

async fn post_chat(base: &str, body: Value) -> (u16, Value) {
    let response = reqwest::Client::new()
        .post(format!("{base}/api/chat"))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

/// Collect `(event type, payload)` pairs until the server closes the stream.
async fn collect_stream(base: &str, query: &[(&str, &str)]) -> Vec<(String, Value)> {
    let response = reqwest::Client::new()
        .get(format!("{base}/api/stream"))
        .query(query)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert!(
        response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );
    assert_eq!(response.headers()["x-accel-buffering"], "no");

    parse_sse_response(response)
        .map(|event| {
            let event = event.unwrap();
            let payload: Value = serde_json::from_str(&event.data).unwrap();
            (event.event.unwrap_or_default(), payload)
        })
        .collect()
        .await
}

fn statuses(events: &[(String, Value)]) -> Vec<(String, String)> {
    events
        .iter()
        .filter(|(kind, _)| kind == "agent_status")
        .map(|(_, p)| {
            (
                p["agent"].as_str().unwrap().to_string(),
                p["status"].as_str().unwrap().to_string(),
            )
        })
        .collect()
}

#[tokio::test]
async fn test_chat_returns_reviewer_answer_and_trace() {
    let base = start_test_gateway(scripted_model(), None).await;

    let payload = json!({"message": "What is 2 + 3 * 4?", "sessionId": "s1"});
    let (status, body) = post_chat(&base, payload).await;

    assert_eq!(status, 200);
    assert_eq!(body["response"], "R");
    assert_eq!(body["sessionId"], "s1");
    assert_eq!(body["userId"], "anonymous");

    let trace: Vec<(&str, &str)> = body["agentTrace"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| (e["agent"].as_str().unwrap(), e["content"].as_str().unwrap()))
        .collect();
    assert_eq!(
        trace,
        vec![("planner_agent", "P"), ("executor_agent", "E"), ("reviewer_agent", "R")]
    );
    assert!(body["agentTrace"][0]["timestamp"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn test_chat_generates_session_id() {
    let base = start_test_gateway(scripted_model(), None).await;

    let (status, body) = post_chat(&base, json!({"message": "hi", "userId": "u7"})).await;

    assert_eq!(status, 200);
    assert_eq!(body["userId"], "u7");
    assert!(!body["sessionId"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_chat_validation_errors() {
    let base = start_test_gateway(scripted_model(), None).await;

    for (payload, message) in [
        (json!({}), "message is required"),
        (json!({"message": ""}), "Message cannot be empty"),
        (json!({"message": "   \n\t"}), "Message cannot be empty"),
    ] {
        let (status, body) = post_chat(&base, payload).await;
        assert_eq!(status, 400);
        assert_eq!(
            body,
            json!({"error": "Validation error", "message": message, "statusCode": 400})
        );
    }
}

#[tokio::test]
async fn test_chat_model_failure_is_500() {
    let base = start_test_gateway(failing_model(), None).await;

    let (status, body) = post_chat(&base, json!({"message": "hi"})).await;

    assert_eq!(status, 500);
    assert_eq!(body["error"], "Internal server error");
    assert_eq!(body["message"], "deployment not found");
    assert_eq!(body["statusCode"], 500);
}

#[tokio::test]
async fn test_chat_timeout_is_500() {
    let slow = scripted_model().with_delay(Duration::from_secs(5));
    let base = start_test_gateway(slow, Some(Duration::from_millis(200))).await;

    let (status, body) = post_chat(&base, json!({"message": "hi"})).await;

    assert_eq!(status, 500);
    assert!(body["message"].as_str().unwrap().starts_with("Pipeline timed out"));
}

#[tokio::test]
async fn test_stream_reports_each_stage_in_order() {
    let base = start_test_gateway(scripted_model(), None).await;

    let query = [("message", "What is 2 + 3 * 4?"), ("sessionId", "s-stream")];
    let events = collect_stream(&base, &query).await;

    assert_eq!(
        statuses(&events),
        vec![
            ("planner".to_string(), "active".to_string()),
            ("planner".to_string(), "done".to_string()),
            ("executor".to_string(), "active".to_string()),
            ("executor".to_string(), "done".to_string()),
            ("reviewer".to_string(), "active".to_string()),
            ("reviewer".to_string(), "done".to_string()),
        ]
    );

    let texts: Vec<(&str, &str)> = events
        .iter()
        .filter(|(kind, _)| kind == "agent_text")
        .map(|(_, p)| (p["agent"].as_str().unwrap(), p["content"].as_str().unwrap()))
        .collect();
    assert_eq!(texts, vec![("planner", "P"), ("executor", "E"), ("reviewer", "R")]);

    let (last_kind, last) = events.last().unwrap();
    assert_eq!(last_kind, "done");
    assert_eq!(last["sessionId"], "s-stream");
    assert_eq!(events.iter().filter(|(kind, _)| kind == "done").count(), 1);
    assert!(events.iter().all(|(_, p)| p["timestamp"].as_i64().is_some()));
}

#[tokio::test]
async fn test_stream_failure_ends_with_one_error_event() {
    let base = start_test_gateway(failing_model(), None).await;

    let events = collect_stream(&base, &[("message", "hi")]).await;

    assert_eq!(events.first().unwrap().0, "agent_status");
    let errors: Vec<&Value> = events
        .iter()
        .filter(|(kind, _)| kind == "error")
        .map(|(_, p)| p)
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["error"], "deployment not found");
    assert_eq!(events.last().unwrap().0, "error");
    assert!(events.iter().all(|(kind, _)| kind != "done"));
}

#[tokio::test]
async fn test_stream_timeout_emits_error_event() {
    let slow = scripted_model().with_delay(Duration::from_secs(5));
    let base = start_test_gateway(slow, Some(Duration::from_millis(200))).await;

    let events = collect_stream(&base, &[("message", "hi")]).await;

    let (kind, payload) = events.last().unwrap();
    assert_eq!(kind, "error");
    assert!(payload["error"].as_str().unwrap().starts_with("Pipeline timed out"));
}

#[tokio::test]
async fn test_stream_without_message_is_400() {
    let base = start_test_gateway(scripted_model(), None).await;

    let response = reqwest::get(format!("{base}/api/stream")).await.unwrap();

    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Missing required query param: message");
    assert_eq!(body["statusCode"], 400);
}

#[tokio::test]
async fn test_sessions_carry_state_across_requests() {
    let model = scripted_model();
    let base = start_test_gateway(model, None).await;

    let (first, _) = post_chat(&base, json!({"message": "one", "sessionId": "shared"})).await;
    let (second, body) = post_chat(&base, json!({"message": "two", "sessionId": "shared"})).await;

    assert_eq!((first, second), (200, 200));
    assert_eq!(body["response"], "R");
}

#[tokio::test]
async fn test_chat_answer_comes_from_final_event_when_streaming() {
    let base = start_streaming_gateway(streaming_model()).await;

    let (status, body) = post_chat(&base, json!({"message": "hi"})).await;

    assert_eq!(status, 200);
    assert_eq!(body["response"], "Reviewed");
    let reviewer: Vec<&str> = body["agentTrace"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|e| e["agent"] == "reviewer_agent")
        .map(|e| e["content"].as_str().unwrap())
        .collect();
    assert_eq!(reviewer, vec!["Re", "Reviewe", "Reviewed"]);
}

#[tokio::test]
async fn test_stream_relays_partials_with_one_done_per_stage() {
    let base = start_streaming_gateway(streaming_model()).await;

    let events = collect_stream(&base, &[("message", "hi"), ("sessionId", "s-partial")]).await;

    assert_eq!(
        statuses(&events),
        vec![
            ("planner".to_string(), "active".to_string()),
            ("planner".to_string(), "done".to_string()),
            ("executor".to_string(), "active".to_string()),
            ("executor".to_string(), "done".to_string()),
            ("reviewer".to_string(), "active".to_string()),
            ("reviewer".to_string(), "done".to_string()),
        ]
    );

    let planner: Vec<&str> = events
        .iter()
        .filter(|(kind, p)| kind == "agent_text" && p["agent"] == "planner")
        .map(|(_, p)| p["content"].as_str().unwrap())
        .collect();
    assert_eq!(planner, vec!["Pl", "Plan don", "Plan done"]);

    // The planner's done arrives after its final text, not after a partial.
    let position = |kind: &str, agent: &str, field: &str, value: &str| {
        events
            .iter()
            .position(|(k, p)| k == kind && p["agent"] == agent && p[field] == value)
            .unwrap()
    };
    assert!(
        position("agent_status", "planner", "status", "done")
            > position("agent_text", "planner", "content", "Plan done")
    );
    assert_eq!(events.last().unwrap().0, "done");
}

#[tokio::test]
async fn test_dropped_stream_cancels_run_and_frees_session() {
    let model = Arc::new(scripted_model().with_delay(Duration::from_secs(1)));
    let base = start_test_gateway(model.clone(), None).await;

    let response = reqwest::Client::new()
        .get(format!("{base}/api/stream"))
        .query(&[("message", "first"), ("sessionId", "shared")])
        .send()
        .await
        .unwrap();
    let mut body = response.bytes_stream();
    let first = body.next().await.unwrap().unwrap();
    assert!(String::from_utf8_lossy(&first).contains("agent_status"));
    drop(body);

    let payload = json!({"message": "second", "sessionId": "shared"});
    let (status, reply) = tokio::time::timeout(Duration::from_secs(15), post_chat(&base, payload))
        .await
        .expect("second request on the session should finish");
    assert_eq!(status, 200);
    assert_eq!(reply["response"], "R");

    // The disconnect surfaces on the next write, so the abandoned run may
    // reach the executor but never the reviewer.
    let abandoned: Vec<LlmRequest> = model
        .requests()
        .into_iter()
        .filter(|r| !mentions(r, "second"))
        .collect();
    assert!(!abandoned.is_empty());
    assert!(abandoned.iter().all(|r| stage_of(r) != "reviewer"));
}

#[tokio::test]
async fn test_health_and_unknown_route() {
    let base = start_test_gateway(scripted_model(), None).await;

    let health: Value = reqwest::get(format!("{base}/health")).await.unwrap().json().await.unwrap();
    assert_eq!(health["status"], "ok");

    let response = reqwest::get(format!("{base}/missing")).await.unwrap();
    assert_eq!(response.status().as_u16(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Not Found");
}
