use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use triad_agent::pipeline::APP_NAME;
use triad_agent::{RunConfig, build_runner};
use triad_core::config::Config;
use triad_core::session::{InMemorySessionService, SessionKey, SessionService};
use triad_core::types::Content;
use triad_gateway::GatewayState;
use triad_providers::azure::AzureOpenAiProvider;
use triad_providers::{LlmProvider, LlmRequest};

mod logging;

#[derive(Parser)]
#[command(
    name = "triad",
    about = "Planner → executor → reviewer agent pipeline over Azure OpenAI",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (default: ~/.triad/config.json)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Port to listen on (default: $PORT or 3001)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Run the pipeline once and print each stage's answer
    Chat {
        /// Message to send
        #[arg(short, long)]
        message: String,

        #[arg(long)]
        session: Option<String>,

        #[arg(long, default_value = "anonymous")]
        user: String,
    },

    /// Check the Azure OpenAI settings with a one-line request
    Check,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value by dotted path
    Get { key: String },
    /// Report configuration problems
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    logging::init(&config.logging.clone().unwrap_or_default(), cli.verbose);

    match cli.command {
        Commands::Serve { port } => serve(&config, port).await?,
        Commands::Chat {
            message,
            session,
            user,
        } => chat(&config, &message, session, &user).await?,
        Commands::Check => check(&config).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => bail!("No config value at '{key}'"),
            },
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for warning in &warnings {
                    println!("warning: {warning}");
                }
                for error in &errors {
                    println!("error: {error}");
                }
                if !errors.is_empty() {
                    bail!("{} configuration error(s)", errors.len());
                }
                println!("Config OK ({})", config_path.display());
            }
        },
    }

    Ok(())
}

fn provider(config: &Config) -> anyhow::Result<Arc<AzureOpenAiProvider>> {
    let provider = AzureOpenAiProvider::from_config(config).context("Azure OpenAI is not configured")?;
    Ok(Arc::new(provider))
}

async fn serve(config: &Config, port: Option<u16>) -> anyhow::Result<()> {
    let (warnings, errors) = config.validate();
    for warning in warnings {
        tracing::warn!("{warning}");
    }
    if !errors.is_empty() {
        bail!("Invalid configuration: {}", errors.join("; "));
    }

    let model = provider(config)?;
    tracing::info!(model = %model.model(), "Using Azure OpenAI deployment");

    let runner = build_runner(
        model,
        Arc::new(InMemorySessionService::new()),
        RunConfig::from_config(config),
    );
    let state = GatewayState::new(Arc::new(runner), config);

    #[cfg(feature = "metrics")]
    let state = state.with_metrics(triad_gateway::metrics::install_prometheus_recorder()?);

    let port = port.unwrap_or_else(|| config.gateway_port());
    triad_gateway::start_gateway(Arc::new(state), &config.bind_addr(), port).await
}

async fn chat(config: &Config, message: &str, session: Option<String>, user: &str) -> anyhow::Result<()> {
    let message = message.trim();
    if message.is_empty() {
        bail!("Message cannot be empty");
    }

    let sessions = Arc::new(InMemorySessionService::new());
    let runner = build_runner(provider(config)?, sessions.clone(), RunConfig::from_config(config));
    let session_id = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    sessions
        .get_or_create_session(SessionKey::new(APP_NAME, user, &session_id))
        .await?;

    let mut events = runner
        .run(user, &session_id, Content::user_text(message), CancellationToken::new())
        .await?;

    let mut answer = String::new();
    while let Some(event) = events.next().await {
        let event = event?;
        if event.is_final_response() {
            let text = event.text();
            if !text.is_empty() {
                println!("── {} ──\n{text}\n", event.author);
                answer = text;
            }
        }
    }

    if answer.is_empty() {
        bail!("The pipeline produced no answer");
    }
    Ok(())
}

async fn check(config: &Config) -> anyhow::Result<()> {
    let model = provider(config)?;
    println!("Deployment: {}", model.deployment());
    println!("Endpoint:   {}", model.completions_url());

    let request = LlmRequest {
        contents: vec![Content::user_text("Reply with the single word OK.")],
        ..Default::default()
    };
    let mut responses = model.generate(&request, false).await?;

    let mut reply = String::new();
    while let Some(response) = responses.next().await {
        if let Some(content) = response?.content {
            reply = content.text();
        }
    }
    println!("Reply:      {}", reply.trim());
    Ok(())
}
