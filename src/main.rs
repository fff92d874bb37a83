//! moltbot binary entry point.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::EnvFilter;

use moltbot::chat::{self, ChatOptions};
use moltbot::config::Config;
use moltbot::memory::MemoryStore;
use moltbot::models::anthropic::AnthropicBackend;
use moltbot::models::{MessageContent, ModelBackend};
use moltbot::scheduler::Scheduler;
use moltbot::tools::{builtins, ToolContext, ToolRegistry};

#[derive(Parser)]
#[command(name = "moltbot", version, about = "Chat-driven agent daemon that writes and schedules its own tools")]
struct Cli {
    /// Path to config.yaml (default: <moltbot home>/config.yaml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon: scheduler loop plus an interactive chat on stdin.
    Start,
    /// Send a single message, print the reply, and exit.
    Chat {
        /// The message to send.
        message: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("moltbot=info")),
        )
        .init();

    let cli = Cli::parse();
    let home = moltbot::moltbot_home();
    let config_path = cli
        .config
        .unwrap_or_else(|| home.join("config.yaml"));
    let config = Config::load(&config_path).await?;

    match cli.command {
        Command::Start => start(home, config).await,
        Command::Chat { message } => one_shot(home, config, message.join(" ")).await,
    }
}

/// Assemble the shared tool context from the home directory layout.
async fn build_context(home: &PathBuf, config: &Config) -> anyhow::Result<ToolContext> {
    std::fs::create_dir_all(home)
        .with_context(|| format!("failed to create {}", home.display()))?;

    let registry = ToolRegistry::new(home.join("tools"));
    builtins::register_all(&registry);
    match registry.reload_tools().await {
        Ok(msg) => tracing::info!("{msg}"),
        Err(e) => tracing::warn!(error = %e, "could not load custom tools"),
    }

    let memory = Arc::new(MemoryStore::open(home.join("memories.json"))?);
    let scheduler = Scheduler::open(
        home.join("scheduled_tasks.json"),
        home.join("logs"),
        &config.scheduler,
    )?;

    Ok(ToolContext {
        registry,
        memory,
        scheduler,
        script_timeout: Duration::from_secs(config.agent.script_timeout_secs),
    })
}

fn chat_options(config: &Config) -> ChatOptions {
    ChatOptions {
        max_iterations: config.agent.max_iterations,
        max_tokens: config.model.max_tokens,
        on_tool_start: None,
    }
}

async fn start(home: PathBuf, config: Config) -> anyhow::Result<()> {
    let ctx = build_context(&home, &config).await?;
    let backend: Arc<dyn ModelBackend> = Arc::new(AnthropicBackend::new(&config.model)?);

    // Due agent tasks run a one-turn conversation with a fresh history and
    // print the reply tagged with the task and owner.
    {
        let cb_ctx = ctx.clone();
        let cb_backend = backend.clone();
        let cb_config = config.clone();
        ctx.scheduler.set_agent_callback(Arc::new(move |task| {
            let ctx = cb_ctx.clone();
            let backend = cb_backend.clone();
            let config = cb_config.clone();
            Box::pin(async move {
                let Some(prompt) = task.prompt.clone() else {
                    tracing::warn!(id = %task.id, "agent task fired without a prompt");
                    return;
                };
                let mut history = Vec::new();
                let reply = chat::run_conversation(
                    &ctx,
                    backend.as_ref(),
                    &config.agent.system_prompt,
                    MessageContent::Text(prompt),
                    &mut history,
                    &chat_options(&config),
                )
                .await;
                println!("\n[task {} → {}] {reply}", task.id, task.user_id);
            })
        }));
    }

    ctx.scheduler.start().await;
    tracing::info!(home = %home.display(), "moltbot is up; type a message, ctrl-c to exit");

    let opts = chat_options(&config);
    let mut history = Vec::new();
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        let reply = chat::run_conversation(
                            &ctx,
                            backend.as_ref(),
                            &config.agent.system_prompt,
                            MessageContent::Text(line.to_string()),
                            &mut history,
                            &opts,
                        )
                        .await;
                        println!("{reply}");
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "stdin read failed");
                        break;
                    }
                }
            }
        }
    }

    ctx.scheduler.stop().await;
    Ok(())
}

async fn one_shot(home: PathBuf, config: Config, message: String) -> anyhow::Result<()> {
    if message.trim().is_empty() {
        anyhow::bail!("chat requires a non-empty message");
    }
    let ctx = build_context(&home, &config).await?;
    let backend = AnthropicBackend::new(&config.model)?;

    let mut history = Vec::new();
    let reply = chat::run_conversation(
        &ctx,
        &backend,
        &config.agent.system_prompt,
        MessageContent::Text(message),
        &mut history,
        &chat_options(&config),
    )
    .await;
    println!("{reply}");
    Ok(())
}
