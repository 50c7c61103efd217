//! CLI entry point: wires one run of the turn controller against either a
//! real configured provider or the in-memory scripted test double.

use al_domain::config::RunConfig;
use al_domain::runtime_state::RuntimeState;
use al_domain::tool::{Message, ToolDefinition};
use al_providers::{AnthropicStyleProvider, LlmProvider, OpenAiCompatProvider, ScriptedProvider};
use al_runtime::cancel::CancelMap;
use al_runtime::guards::RunMode;
use al_runtime::messages::{MessageStore, GENERIC_TOKEN_FACTOR};
use al_runtime::test_support::StubRegistry;
use al_runtime::turn::{FinalizationReason, Intent, RunOptions};
use al_runtime::TurnController;
use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "al-cli", version, about = "Agent loop core demo CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send a single message through the turn controller and print the
    /// finalization reason.
    Run {
        /// The user message to drive the run with.
        message: String,
        /// Model id of the form "<provider_id>/<model_name>".
        #[arg(long)]
        model: Option<String>,
        /// Use the in-memory scripted provider/tool registry instead of a
        /// real network call.
        #[arg(long)]
        scripted: bool,
    },
    /// Print the resolved run configuration as TOML.
    Config,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,al_runtime=debug")))
        .init();
}

fn load_config() -> anyhow::Result<RunConfig> {
    let config_path = std::env::var("AL_CONFIG").unwrap_or_else(|_| "config.toml".into());
    if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path).with_context(|| format!("reading {config_path}"))?;
        toml::from_str(&raw).with_context(|| format!("parsing {config_path}"))
    } else {
        Ok(RunConfig::default())
    }
}

fn demo_tool_definitions() -> Vec<ToolDefinition> {
    vec![ToolDefinition {
        name: "terminal.exec".into(),
        description: "Run a shell command.".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {"command": {"type": "string"}, "workdir": {"type": "string"}},
            "required": ["command"],
        }),
        mutating: true,
    }]
}

fn build_real_provider(model: &str) -> anyhow::Result<Box<dyn LlmProvider>> {
    let (provider_id, _model_name) = model.split_once('/').context("model must be \"<provider_id>/<model_name>\"")?;
    let env_var = format!("{}_API_KEY", provider_id.to_uppercase());
    let api_key = std::env::var(&env_var).with_context(|| format!("missing {env_var} for provider {provider_id}"))?;

    match provider_id {
        "anthropic" => Ok(Box::new(AnthropicStyleProvider::new(
            provider_id.to_string(),
            "https://api.anthropic.com".to_string(),
            api_key,
        )?)),
        _ => Ok(Box::new(OpenAiCompatProvider::new(
            provider_id.to_string(),
            "https://api.openai.com/v1".to_string(),
            api_key,
        )?)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Run { message: "hello".into(), model: None, scripted: true }) {
        Command::Config => {
            let config = load_config()?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Run { message, model, scripted } => {
            init_tracing();
            let config = load_config()?;
            tracing::info!(max_steps = config.budget.max_steps, "run config loaded");

            let registry = StubRegistry::new(demo_tool_definitions());
            let (provider, model_id): (Box<dyn LlmProvider>, String) = if scripted || model.is_none() {
                let provider = ScriptedProvider::new(
                    "scripted",
                    vec![vec![
                        al_domain::stream::StreamEvent::TextDelta { text: format!("acknowledged: {message}") },
                        al_domain::stream::StreamEvent::FinishReason { reason: al_domain::stream::FinishReason::Stop },
                    ]],
                );
                (Box::new(provider), "scripted/demo".into())
            } else {
                let model = model.unwrap();
                let provider = build_real_provider(&model)?;
                (provider, model)
            };

            let mut store = MessageStore::new();
            store.push(Message::user(message));

            let options = RunOptions {
                mode: RunMode::Act,
                intent: Intent::Task,
                model: model_id,
                context_limit: 128_000,
                token_factor: GENERIC_TOKEN_FACTOR,
                working_dir: std::env::current_dir()?.display().to_string(),
                objective: "respond to the user's message".into(),
                require_user_confirm_on_task_complete: false,
            };

            let state = RuntimeState::new(
                config.guard.completed_facts_cap,
                config.guard.blocked_facts_cap,
                config.guard.recent_errors_cap,
                config.guard.no_progress_signatures_cap,
                config.guard.mistake_window_cap,
                config.todo_policy.mode,
                config.todo_policy.minimum_items,
            );
            let mut controller =
                TurnController::new(state, store, config.budget, config.guard, config.compaction, config.todo_policy, options);

            let cancel_map = CancelMap::new();
            let cancel = cancel_map.register("cli-run");
            let reason = controller.run_native(provider.as_ref(), &registry, &cancel, None).await;
            cancel_map.remove("cli-run");

            match reason {
                FinalizationReason::TaskComplete | FinalizationReason::TaskCompleteForced => {
                    println!("run finished: {reason:?}");
                }
                other => println!("run ended without completion: {other:?}"),
            }
            Ok(())
        }
    }
}
