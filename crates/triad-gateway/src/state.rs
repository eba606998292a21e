//! Gateway shared state.

use std::sync::Arc;
use std::time::Duration;

use triad_agent::{AgentError, Runner};
use triad_core::config::Config;
use triad_core::session::SessionService;

/// Shared gateway state accessible from all handlers.
///
/// Built once at startup; the runner (and the model client inside it) is
/// shared by every request.
pub struct GatewayState {
    pub runner: Arc<Runner>,
    pub pipeline_timeout: Duration,
    pub frontend_url: String,
    pub service_name: String,
    #[cfg(feature = "metrics")]
    pub metrics: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl GatewayState {
    pub fn new(runner: Arc<Runner>, config: &Config) -> Self {
        let service_name = format!("{} backend", runner.app_name());
        Self {
            runner,
            pipeline_timeout: config.pipeline_timeout(),
            frontend_url: config.frontend_url(),
            service_name,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    pub fn with_pipeline_timeout(mut self, timeout: Duration) -> Self {
        self.pipeline_timeout = timeout;
        self
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, handle: metrics_exporter_prometheus::PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Get or create the session a request refers to.
    pub async fn ensure_session(&self, user_id: &str, session_id: &str) -> Result<(), AgentError> {
        let key = self.runner.session_key(user_id, session_id);
        self.runner
            .session_service()
            .get_or_create_session(key)
            .await?;
        Ok(())
    }
}

/// Request ids default the way both endpoints expect: a fresh session id
/// and the `anonymous` user.
pub fn resolve_ids(session_id: Option<String>, user_id: Option<String>) -> (String, String) {
    let session_id = session_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let user_id = user_id
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| "anonymous".to_string());
    (session_id, user_id)
}
