//! Logging initialization and agent/assistant construction from config.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use beeswarm_agent::{Assistant, RunOptions, Swarm, ThreadEngine};
use beeswarm_core::config::{Config, LoggingConfig};
use beeswarm_core::transcript::TranscriptLog;
use beeswarm_core::{Agent, Instructions, ToolChoice};
use beeswarm_providers::openai::OpenAiProvider;
use beeswarm_tools::transfer_tool;

/// Agent used when the config defines none.
pub const FALLBACK_AGENT: &str = "Assistant";

/// Install the global subscriber. `RUST_LOG` wins over `logging.level`,
/// which wins over the `--verbose` default.
pub fn init_logging(config: &Config, verbose: bool) -> anyhow::Result<()> {
    let logging = config.logging.clone().unwrap_or_default();
    let filter = build_filter(&logging, verbose, std::env::var("RUST_LOG").ok())?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match (logging.format.as_str(), logging.output.as_str()) {
        ("json", "stdout") => builder.json().with_writer(std::io::stdout).init(),
        ("json", _) => builder.json().with_writer(std::io::stderr).init(),
        (_, "stdout") => builder.with_writer(std::io::stdout).init(),
        _ => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

fn build_filter(
    logging: &LoggingConfig,
    verbose: bool,
    env: Option<String>,
) -> anyhow::Result<EnvFilter> {
    let base = env
        .filter(|v| !v.trim().is_empty())
        .or_else(|| logging.level.clone())
        .unwrap_or_else(|| if verbose { "debug" } else { "info" }.to_string());

    let mut filter =
        EnvFilter::try_new(&base).with_context(|| format!("invalid log filter '{base}'"))?;
    for directive in &logging.filters {
        filter = filter.add_directive(
            directive
                .parse()
                .with_context(|| format!("invalid log filter '{directive}'"))?,
        );
    }
    Ok(filter)
}

pub fn provider(config: &Config) -> anyhow::Result<Arc<OpenAiProvider>> {
    let api_key = config
        .api_key()
        .context("No API key configured (set provider.api_key or OPENAI_API_KEY)")?;
    Ok(Arc::new(OpenAiProvider::new(
        api_key,
        config.base_url().as_deref(),
    )))
}

fn transfer_description(target: &str) -> String {
    format!("Transfer the conversation to {target}")
}

/// Agents from the config, each with transfer functions for its handoffs.
pub fn build_agents(config: &Config) -> Vec<Agent> {
    if config.agents.is_empty() {
        return vec![Agent::new(FALLBACK_AGENT, config.default_model())];
    }

    config
        .agents
        .iter()
        .map(|a| {
            let model = a.model.clone().unwrap_or_else(|| config.default_model());
            let mut agent = Agent::new(&a.name, model).with_functions(
                a.handoffs
                    .iter()
                    .map(|target| transfer_tool(target, &transfer_description(target)).into_arc()),
            );
            if !a.instructions.trim().is_empty() {
                agent = agent.with_instructions(Instructions::template(a.instructions.clone()));
            }
            if let Some(choice) = &a.tool_choice {
                agent = agent.with_tool_choice(ToolChoice::parse(choice));
            }
            if let Some(parallel) = a.parallel_tool_calls {
                agent = agent.with_parallel_tool_calls(parallel);
            }
            agent
        })
        .collect()
}

pub fn build_swarm(config: &Config, provider: Arc<OpenAiProvider>) -> Swarm {
    build_agents(config)
        .into_iter()
        .fold(Swarm::new(provider), Swarm::with_agent)
}

pub fn run_options(config: &Config) -> RunOptions {
    RunOptions {
        model_override: None,
        stream: config.stream(),
        debug: config.debug(),
        max_turns: config.max_turns(),
        execute_tools: config.execute_tools(),
    }
}

pub fn build_assistants(config: &Config) -> Vec<Assistant> {
    config
        .assistants
        .iter()
        .map(|a| {
            let mut assistant = Assistant::new(&a.name, &a.assistant_id)
                .with_functions(
                    a.handoffs
                        .iter()
                        .map(|target| transfer_tool(target, &transfer_description(target)).into_arc()),
                )
                .with_log_flag(a.log);
            if let Some(instructions) = &a.instructions {
                assistant = assistant.with_instructions(instructions.clone());
            }
            assistant
        })
        .collect()
}

pub fn build_thread_engine(config: &Config, provider: Arc<OpenAiProvider>) -> ThreadEngine {
    let engine = ThreadEngine::new(provider.clone())
        .with_router(provider, config.default_model())
        .with_poll_interval(Duration::from_millis(config.poll_interval_ms()))
        .with_max_handoffs(config.max_handoffs())
        .with_transcripts(TranscriptLog::new(config.transcript_dir()));

    build_assistants(config)
        .into_iter()
        .fold(engine, ThreadEngine::with_assistant)
}
