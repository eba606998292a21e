//! Configuration loading and validation.
//!
//! Config comes from an optional JSON5 file with `${ENV_VAR}` substitution.
//! Anything not set in the file falls back to the environment variables the
//! service has always honoured (`PORT`, `FRONTEND_URL`, `AZURE_OPENAI_*`).

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TriadError};

pub const ENV_PORT: &str = "PORT";
pub const ENV_FRONTEND_URL: &str = "FRONTEND_URL";
pub const ENV_AZURE_ENDPOINT: &str = "AZURE_OPENAI_ENDPOINT";
pub const ENV_AZURE_API_KEY: &str = "AZURE_OPENAI_API_KEY";
pub const ENV_AZURE_DEPLOYMENT: &str = "AZURE_OPENAI_DEPLOYMENT_NAME";
pub const ENV_AZURE_API_VERSION: &str = "AZURE_OPENAI_API_VERSION";

const DEFAULT_PORT: u16 = 3001;
const DEFAULT_BIND: &str = "0.0.0.0";
const DEFAULT_FRONTEND_URL: &str = "http://localhost:5173";
const DEFAULT_PIPELINE_TIMEOUT_SECS: u64 = 300;
const DEFAULT_API_VERSION: &str = "2025-04-01-preview";
const DEFAULT_MAX_COMPLETION_TOKENS: u32 = 2048;
pub const DEFAULT_MAX_TOOL_ITERATIONS: u32 = 10;

/// Top-level Triad configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzureConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub agents: Option<AgentsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Browser origin allowed by CORS in addition to the local dev origins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frontend_url: Option<String>,

    /// Upper bound on one pipeline run, for both chat and stream requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_timeout_secs: Option<u64>,
}

/// Azure OpenAI deployment settings. Unset fields fall back to `AZURE_OPENAI_*`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AzureConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable holding the API key (default: `AZURE_OPENAI_API_KEY`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tool_iterations: Option<u32>,

    /// Request streamed completions from the model.
    #[serde(default)]
    pub streaming: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "triad_gateway=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Fully resolved Azure OpenAI settings.
#[derive(Clone, PartialEq, Eq)]
pub struct AzureSettings {
    pub endpoint: String,
    pub api_key: String,
    pub deployment: String,
    pub api_version: String,
    pub max_completion_tokens: u32,
}

impl fmt::Debug for AzureSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureSettings")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("deployment", &self.deployment)
            .field("api_version", &self.api_version)
            .field("max_completion_tokens", &self.max_completion_tokens)
            .finish()
    }
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").map_err(|e| TriadError::Config(e.to_string()))?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned())
}

fn required(value: Option<String>, env_name: &str) -> Result<String> {
    value.ok_or_else(|| TriadError::Config(format!("{env_name} is not set")))
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    /// A missing file yields the default (environment-only) config.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw)?;

        json5::from_str(&substituted).map_err(|e| TriadError::Config(e.to_string()))
    }

    /// Default config file location: `~/.triad/config.json`.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn gateway_port(&self) -> u16 {
        self.gateway
            .as_ref()
            .and_then(|g| g.port)
            .or_else(|| std::env::var(ENV_PORT).ok().and_then(|p| p.parse().ok()))
            .unwrap_or(DEFAULT_PORT)
    }

    pub fn bind_addr(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| DEFAULT_BIND.to_string())
    }

    pub fn frontend_url(&self) -> String {
        resolve_secret_field(
            &self.gateway.as_ref().and_then(|g| g.frontend_url.clone()),
            &Some(ENV_FRONTEND_URL.to_string()),
        )
        .unwrap_or_else(|| DEFAULT_FRONTEND_URL.to_string())
    }

    pub fn pipeline_timeout(&self) -> Duration {
        Duration::from_secs(
            self.gateway
                .as_ref()
                .and_then(|g| g.pipeline_timeout_secs)
                .unwrap_or(DEFAULT_PIPELINE_TIMEOUT_SECS),
        )
    }

    pub fn max_tool_iterations(&self) -> u32 {
        self.agents
            .as_ref()
            .and_then(|a| a.max_tool_iterations)
            .unwrap_or(DEFAULT_MAX_TOOL_ITERATIONS)
    }

    pub fn streaming(&self) -> bool {
        self.agents.as_ref().is_some_and(|a| a.streaming)
    }

    /// Resolve the Azure OpenAI settings, failing fast on anything missing.
    pub fn azure_settings(&self) -> Result<AzureSettings> {
        let azure = self.azure.clone().unwrap_or_default();

        let endpoint = required(
            resolve_secret_field(&azure.endpoint, &Some(ENV_AZURE_ENDPOINT.into())),
            ENV_AZURE_ENDPOINT,
        )?;
        let key_env = azure
            .api_key_env
            .clone()
            .unwrap_or_else(|| ENV_AZURE_API_KEY.to_string());
        let api_key = required(
            resolve_secret_field(&azure.api_key, &Some(key_env.clone())),
            &key_env,
        )?;
        let deployment = required(
            resolve_secret_field(&azure.deployment, &Some(ENV_AZURE_DEPLOYMENT.into())),
            ENV_AZURE_DEPLOYMENT,
        )?;
        let api_version = resolve_secret_field(&azure.api_version, &Some(ENV_AZURE_API_VERSION.into()))
            .unwrap_or_else(|| DEFAULT_API_VERSION.to_string());

        Ok(AzureSettings {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
            deployment,
            api_version,
            max_completion_tokens: azure
                .max_completion_tokens
                .unwrap_or(DEFAULT_MAX_COMPLETION_TOKENS),
        })
    }

    /// Get a config value by dotted path (e.g. "gateway.port").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if let Err(e) = self.azure_settings() {
            warnings.push(format!("Azure OpenAI is not fully configured: {e}"));
        }

        if let Some(gw) = &self.gateway {
            if gw.port == Some(0) {
                errors.push("Gateway port cannot be 0".to_string());
            }
            if gw.pipeline_timeout_secs == Some(0) {
                errors.push("Pipeline timeout cannot be 0".to_string());
            }
        }

        if let Some(logging) = &self.logging {
            if logging.format != "plain" && logging.format != "json" {
                warnings.push(format!(
                    "Unknown log format '{}', falling back to plain",
                    logging.format
                ));
            }
        }

        (warnings, errors)
    }
}

/// Base directory for Triad data: `~/.triad/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".triad")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_azure() -> AzureConfig {
        AzureConfig {
            endpoint: Some("https://example.openai.azure.com/".into()),
            api_key: Some("key-123".into()),
            api_key_env: None,
            deployment: Some("gpt-chat".into()),
            api_version: Some("2024-10-21".into()),
            max_completion_tokens: None,
        }
    }

    #[test]
    fn test_env_var_substitution() {
        // SAFETY: test-only, unique variable name
        unsafe { std::env::set_var("TEST_TRIAD_SUBST_KEY", "sk-test-123") };
        let input = r#"{"key": "${TEST_TRIAD_SUBST_KEY}", "other": "plain"}"#;
        let result = substitute_env_vars(input).unwrap();
        assert!(result.contains("sk-test-123"));
        assert!(result.contains("plain"));
        unsafe { std::env::remove_var("TEST_TRIAD_SUBST_KEY") };
    }

    #[test]
    fn test_env_var_missing() {
        let input = r#"{"key": "${NONEXISTENT_VAR_TRIAD_TEST}"}"#;
        let result = substitute_env_vars(input).unwrap();
        assert!(result.contains(r#""""#));
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bind_addr(), "0.0.0.0");
        assert_eq!(config.pipeline_timeout(), Duration::from_secs(300));
        assert_eq!(config.max_tool_iterations(), 10);
        assert!(!config.streaming());
    }

    #[test]
    fn test_azure_settings_from_config() {
        let config = Config {
            azure: Some(full_azure()),
            ..Config::default()
        };
        let settings = config.azure_settings().unwrap();
        assert_eq!(settings.endpoint, "https://example.openai.azure.com");
        assert_eq!(settings.deployment, "gpt-chat");
        assert_eq!(settings.api_version, "2024-10-21");
        assert_eq!(settings.max_completion_tokens, 2048);
        assert!(!format!("{settings:?}").contains("key-123"));
    }

    #[test]
    fn test_azure_settings_missing_endpoint_fails_fast() {
        let config = Config {
            azure: Some(AzureConfig {
                endpoint: None,
                ..full_azure()
            }),
            ..Config::default()
        };
        // Only meaningful when the process environment does not provide it.
        if std::env::var(ENV_AZURE_ENDPOINT).is_ok() {
            return;
        }
        let err = config.azure_settings().unwrap_err();
        assert!(matches!(err, TriadError::Config(_)));
        assert!(err.to_string().contains("AZURE_OPENAI_ENDPOINT is not set"));
    }

    #[test]
    fn test_azure_api_key_from_custom_env() {
        // SAFETY: test-only, unique variable name
        unsafe { std::env::set_var("TEST_TRIAD_AZURE_KEY", "from-env") };
        let config = Config {
            azure: Some(AzureConfig {
                api_key: None,
                api_key_env: Some("TEST_TRIAD_AZURE_KEY".into()),
                ..full_azure()
            }),
            ..Config::default()
        };
        assert_eq!(config.azure_settings().unwrap().api_key, "from-env");
        unsafe { std::env::remove_var("TEST_TRIAD_AZURE_KEY") };
    }

    #[test]
    fn test_load_json5_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                // comments are fine in JSON5
                gateway: { port: 4100, pipeline_timeout_secs: 30 },
                agents: { max_tool_iterations: 4, streaming: true },
                logging: { format: "json", filters: ["triad_gateway=debug"] },
            }"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.gateway_port(), 4100);
        assert_eq!(config.pipeline_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_tool_iterations(), 4);
        assert!(config.streaming());
        let logging = config.logging.as_ref().unwrap();
        assert_eq!(logging.format, "json");
        assert_eq!(logging.output, "stderr");
        assert_eq!(logging.filters, vec!["triad_gateway=debug".to_string()]);
        assert_eq!(config.get_path("gateway.port"), Some(serde_json::json!(4100)));
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let config = Config::load(Path::new("/nonexistent/triad/config.json")).unwrap();
        assert!(config.gateway.is_none());
    }

    #[test]
    fn test_load_invalid_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ gateway: ").unwrap();
        assert!(matches!(Config::load(&path), Err(TriadError::Config(_))));
    }

    #[test]
    fn test_validate_zero_port_errors() {
        let config = Config {
            gateway: Some(GatewayConfig {
                port: Some(0),
                ..GatewayConfig::default()
            }),
            ..Config::default()
        };
        let (_warnings, errors) = config.validate();
        assert!(errors.iter().any(|e| e.contains("port")));
    }
}
