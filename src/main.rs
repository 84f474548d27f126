//! Pipewright - staged delivery pipeline for an external code-generation CLI.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use pipewright::{
    ChannelSink, Config, Event, JsonFileStore, Stage, Workspace, WorkflowEngine, WorkflowOutcome,
};

/// Staged delivery pipeline for an external code-generation CLI
#[derive(Parser)]
#[command(name = "pipewright")]
#[command(author, version, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true, env = "PIPEWRIGHT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full four-stage workflow against a workspace
    Run {
        /// What to build
        request: String,

        /// Workspace directory (created if missing)
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,

        /// Session id (generated when omitted)
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Send a message to one stage agent without advancing the pipeline
    Chat {
        /// Stage to talk to (planner, builder, qa, prod_ready)
        stage: String,

        /// Message for the agent
        message: String,

        /// Workspace directory
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,

        /// Session whose context to reuse
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Continue a persisted session from its first incomplete stage
    Resume {
        /// Session id to resume
        session: String,
    },

    /// Show configuration
    Config {
        /// Show config file path
        #[arg(long)]
        path: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose { EnvFilter::new("debug") } else { EnvFilter::new("warn") };

    tracing_subscriber::registry().with(fmt::layer().with_target(false)).with(filter).init();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Run { request, workspace, session } => {
            let session = session.unwrap_or_else(new_session_id);
            cmd_run(&config, &session, &workspace, &request)
        }
        Commands::Chat { stage, message, workspace, session } => {
            let stage: Stage = stage.parse().map_err(anyhow::Error::from)?;
            let session = session.unwrap_or_else(new_session_id);
            cmd_chat(&config, &session, &workspace, stage, &message)
        }
        Commands::Resume { session } => cmd_resume(&config, &session),
        Commands::Config { path } => cmd_config(&cli.config, path),
    }
}

fn new_session_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn build_engine(config: &Config) -> (WorkflowEngine, tokio::sync::mpsc::UnboundedReceiver<Event>) {
    let store = Arc::new(JsonFileStore::new(config.store.resolved_dir()));
    let (sink, events) = ChannelSink::new();
    let engine = WorkflowEngine::new(config, store).with_sink(Arc::new(sink));
    (engine, events)
}

/// Print workflow events as they arrive.
async fn print_events(mut events: tokio::sync::mpsc::UnboundedReceiver<Event>, verbose: bool) {
    while let Some(event) = events.recv().await {
        match event {
            Event::StageStarted { stage, .. } => {
                println!("▸ {} started", stage.role());
            }
            Event::StageCompleted { stage, status, .. } => {
                println!("▸ {} {}", stage.role(), status);
            }
            Event::WorkflowCompleted { success, failed_stage, .. } => {
                if success {
                    println!("✓ workflow completed");
                } else if let Some(stage) = failed_stage {
                    println!("✗ workflow failed at {}", stage.role());
                } else {
                    println!("✗ workflow failed");
                }
            }
            Event::OutputLine { line, stderr, .. } => {
                if stderr {
                    eprintln!("  {line}");
                } else if verbose {
                    println!("  {line}");
                }
            }
            Event::Error { message, .. } => {
                eprintln!("error: {message}");
            }
        }
    }
}

fn cmd_run(config: &Config, session: &str, workspace: &PathBuf, request: &str) -> Result<()> {
    let workspace = Workspace::create(workspace)?;
    let (engine, events) = build_engine(config);

    let rt = tokio::runtime::Runtime::new()?;
    let outcome = rt.block_on(async {
        let printer = tokio::spawn(print_events(events, tracing::enabled!(tracing::Level::DEBUG)));
        let outcome = engine.run(session, workspace, request).await;
        drop(engine);
        let _ = printer.await;
        outcome
    })?;

    report_outcome(session, &outcome);
    if outcome.success() {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

fn cmd_chat(
    config: &Config,
    session: &str,
    workspace: &PathBuf,
    stage: Stage,
    message: &str,
) -> Result<()> {
    let workspace = Workspace::create(workspace)?;
    let (engine, events) = build_engine(config);

    let rt = tokio::runtime::Runtime::new()?;
    let output = rt.block_on(async {
        let printer = tokio::spawn(print_events(events, false));
        let output = engine.run_single_stage(session, workspace, stage, message).await;
        drop(engine);
        let _ = printer.await;
        output
    })?;

    println!("{output}");
    Ok(())
}

fn cmd_resume(config: &Config, session: &str) -> Result<()> {
    let (engine, events) = build_engine(config);

    let rt = tokio::runtime::Runtime::new()?;
    let outcome = rt.block_on(async {
        let printer = tokio::spawn(print_events(events, false));
        let outcome = engine.resume(session).await;
        drop(engine);
        let _ = printer.await;
        outcome
    })?;

    report_outcome(session, &outcome);
    if outcome.success() {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

fn report_outcome(session: &str, outcome: &WorkflowOutcome) {
    println!();
    println!("session: {session}");
    println!("status:  {}", outcome.state);
    for (stage, output) in outcome.context.outputs() {
        let first_line = output.lines().next().unwrap_or("");
        println!("  {}: {}", stage.role(), first_line);
    }
    if let Some(stage) = outcome.failed_stage {
        println!("failed stage: {}", stage.role());
    }
}

fn cmd_config(config_path: &Option<PathBuf>, path_only: bool) -> Result<()> {
    let path = config_path.clone().unwrap_or_else(Config::default_path);
    if path_only {
        println!("{}", path.display());
        return Ok(());
    }

    let config = Config::load_from(&path)?;
    let rendered = toml::to_string_pretty(&config).context("failed to render configuration")?;
    println!("# {}", path.display());
    print!("{rendered}");
    Ok(())
}
