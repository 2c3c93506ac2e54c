mod render;
mod setup;

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use futures::StreamExt;

use beeswarm_agent::{
    DeployReport, RunOptions, StreamEvent, Swarm, Task, ThreadEngine, load_tasks, load_test_tasks,
};
use beeswarm_core::config::Config;
use beeswarm_core::{Agent, ContextVariables, Message, Response};

use render::{StreamPrinter, print_messages};

#[derive(Parser)]
#[command(
    name = "beeswarm",
    about = "Multi-agent orchestration over chat completions and assistant threads",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat with the configured agents
    Chat {
        /// Starting agent (default: first configured)
        #[arg(long)]
        agent: Option<String>,

        /// Print replies as they stream in
        #[arg(long)]
        stream: bool,

        /// Log every turn at info level
        #[arg(long)]
        debug: bool,

        /// Override the model of every agent
        #[arg(long)]
        model: Option<String>,
    },

    /// Send a single message and print the reply
    Ask {
        #[arg(short, long)]
        message: String,

        #[arg(long)]
        agent: Option<String>,
    },

    /// Run tasks through the assistant thread engine
    Assistants {
        /// Single request to run
        #[arg(short, long, conflicts_with = "tasks")]
        message: Option<String>,

        /// Assistant to use, or "auto" to triage
        #[arg(long, default_value = "auto")]
        assistant: String,

        /// JSONL file of tasks
        #[arg(long)]
        tasks: Option<PathBuf>,

        /// Treat the tasks file as evaluation cases
        #[arg(long, requires = "tasks")]
        test: bool,

        /// Print each assistant's conversation afterwards
        #[arg(long)]
        transcript: bool,
    },

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
    /// Get a specific config value
    Get { key: String },
    /// Check the configuration for problems
    Validate,
    /// Write a default config file if none exists
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    setup::init_logging(&config, cli.verbose)?;
    tracing::debug!(path = %config_path.display(), "Loaded config");

    match cli.command {
        Commands::Chat {
            agent,
            stream,
            debug,
            model,
        } => {
            let swarm = setup::build_swarm(&config, setup::provider(&config)?);
            let mut opts = setup::run_options(&config);
            opts.stream |= stream;
            opts.debug |= debug;
            opts.model_override = model;
            let agent = starting_agent(&swarm, &config, agent.as_deref())?;
            chat(&swarm, agent, opts).await?;
        }
        Commands::Ask { message, agent } => {
            let swarm = setup::build_swarm(&config, setup::provider(&config)?);
            let agent = starting_agent(&swarm, &config, agent.as_deref())?;
            let ctx = ContextVariables::from([("request".to_string(), message.clone())]);
            let opts = setup::run_options(&config).with_stream(false);
            let response = swarm
                .run(&agent, vec![Message::user(message)], ctx, &opts)
                .await?;
            print_messages(&response.messages);
        }
        Commands::Assistants {
            message,
            assistant,
            tasks,
            test,
            transcript,
        } => {
            let mut engine = setup::build_thread_engine(&config, setup::provider(&config)?);
            if engine.assistants().is_empty() {
                bail!("No assistants configured");
            }

            let report = match (message, tasks) {
                (_, Some(path)) if test => {
                    let cases = load_test_tasks(&path).await?;
                    engine.deploy_tests(&cases).await?
                }
                (_, Some(path)) => engine.deploy(&load_tasks(&path).await?).await,
                (Some(message), None) => {
                    engine
                        .deploy(&[Task::new(message).with_assistant(assistant)])
                        .await
                }
                (None, None) => bail!("Pass --message or --tasks"),
            };

            print_report(&report, test);
            if transcript {
                print_transcripts(&engine);
            }
        }
        Commands::Config { action } => config_command(action, &config, &config_path)?,
    }

    Ok(())
}

fn starting_agent(swarm: &Swarm, config: &Config, name: Option<&str>) -> anyhow::Result<Agent> {
    let name = name
        .map(str::to_string)
        .or_else(|| config.agents.first().map(|a| a.name.clone()))
        .unwrap_or_else(|| setup::FALLBACK_AGENT.to_string());
    swarm
        .agent(&name)
        .cloned()
        .with_context(|| format!("Unknown agent: {name}"))
}

async fn chat(swarm: &Swarm, mut agent: Agent, opts: RunOptions) -> anyhow::Result<()> {
    println!("Chatting with {} (/exit to quit)", agent.name);
    let mut messages: Vec<Message> = Vec::new();
    let mut ctx = ContextVariables::new();

    loop {
        let input: String = dialoguer::Input::new()
            .with_prompt("You")
            .interact_text()?;
        let input = input.trim();
        if matches!(input, "/exit" | "/quit") {
            break;
        }
        if input.is_empty() {
            continue;
        }

        ctx.insert("request".into(), input.to_string());
        messages.push(Message::user(input));

        let response = if opts.stream {
            stream_turn(swarm, &agent, messages.clone(), ctx.clone(), &opts).await?
        } else {
            let response = swarm
                .run(&agent, messages.clone(), ctx.clone(), &opts)
                .await?;
            print_messages(&response.messages);
            response
        };

        messages.extend(response.messages);
        agent = response.agent;
        ctx = response.context_variables;
    }
    Ok(())
}

async fn stream_turn(
    swarm: &Swarm,
    agent: &Agent,
    messages: Vec<Message>,
    ctx: ContextVariables,
    opts: &RunOptions,
) -> anyhow::Result<Response> {
    let mut stream = swarm.run_and_stream(agent, messages, ctx, opts);
    let mut printer = StreamPrinter::stdout();
    let mut completed = None;
    while let Some(event) = stream.next().await {
        let event = event?;
        printer.handle(&event)?;
        if let StreamEvent::Completed(response) = event {
            completed = Some(response);
        }
    }
    completed.context("stream ended before the run completed")
}

fn print_report(report: &DeployReport, test: bool) {
    for line in &report.tasks {
        let assistant = line.assistant.as_deref().unwrap_or("-");
        match (&line.output, &line.error) {
            (_, Some(error)) => println!("[{assistant}] {}: error: {error}", line.description),
            (Some(output), None) => println!("[{assistant}] {output}"),
            (None, None) => println!("[-] {}: no suitable assistant", line.description),
        }
    }
    if test {
        println!(
            "Passed {} groundtruth tests out of {} tests. Success rate: {:.1}%",
            report.groundtruth_passed,
            report.total,
            report.groundtruth_rate()
        );
        println!(
            "Passed {} assistant tests out of {} tests. Success rate: {:.1}%",
            report.assistant_passed,
            report.total,
            report.assistant_rate()
        );
    }
}

fn print_transcripts(engine: &ThreadEngine) {
    for assistant in engine.assistants() {
        if !assistant.history().is_empty() {
            println!("{}", assistant.render_conversation());
        }
    }
}

fn config_command(action: ConfigAction, config: &Config, path: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        ConfigAction::Get { key } => {
            let value = config
                .get_path(&key)
                .with_context(|| format!("Key not found: {key}"))?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        ConfigAction::Validate => {
            let (warnings, errors) = config.validate();
            for w in &warnings {
                println!("warning: {w}");
            }
            for e in &errors {
                println!("error: {e}");
            }
            if !errors.is_empty() {
                bail!("{} configuration error(s)", errors.len());
            }
            println!("Config OK: {}", path.display());
        }
        ConfigAction::Init => {
            if path.exists() {
                bail!("Config already exists: {}", path.display());
            }
            Config::default().save(path)?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}
