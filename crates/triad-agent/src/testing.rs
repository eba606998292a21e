//! A scripted model provider for tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use triad_providers::{EncodedError, LlmProvider, LlmRequest, LlmResponse, LlmResponseStream};

type Handler = Box<dyn Fn(&LlmRequest) -> Result<Vec<LlmResponse>, EncodedError> + Send + Sync>;

enum Script {
    Queue(Mutex<VecDeque<Result<Vec<LlmResponse>, EncodedError>>>),
    Handler(Handler),
}

/// Replays canned responses instead of calling a model.
///
/// Each `generate` call either pops the next queued turn or asks the handler.
/// Every request is recorded.
pub struct ScriptedProvider {
    script: Script,
    delay: Option<Duration>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<Result<Vec<LlmResponse>, EncodedError>>) -> Self {
        Self {
            script: Script::Queue(Mutex::new(turns.into())),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_handler(
        handler: impl Fn(&LlmRequest) -> Result<Vec<LlmResponse>, EncodedError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Script::Handler(Box::new(handler)),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted/test"
    }

    async fn generate(&self, request: &LlmRequest, _stream: bool) -> Result<LlmResponseStream, EncodedError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let turn = match &self.script {
            Script::Queue(queue) => queue
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front()
                .unwrap_or_else(|| Err(EncodedError::new("500", "script exhausted"))),
            Script::Handler(handler) => handler(request),
        }?;
        Ok(Box::pin(futures::stream::iter(turn.into_iter().map(Ok))))
    }
}
