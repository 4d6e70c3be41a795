//! swarm - CLI entry point for the code-building swarm

use clap::Parser;
use eyre::{Context, Result};
use tracing::info;

use codeswarm::cli::{Cli, Command};
use codeswarm::config::Config;
use codeswarm::events::SwarmEvent;
use codeswarm::orchestrator::BuildOutcome;
use codeswarm::session::SwarmSession;

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Forward bus events to stdout as terse progress lines
fn spawn_event_printer(session: &SwarmSession) -> tokio::task::JoinHandle<()> {
    let mut rx = session.events();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                SwarmEvent::OrchestratorPhase { phase, .. } => println!("phase: {}", phase),
                SwarmEvent::OrchestratorPlan { subtask_count, .. } => {
                    println!("planned {} subtask(s)", subtask_count)
                }
                SwarmEvent::SubtaskAssigned { title, worker, .. } => {
                    println!("worker {} <- {}", worker, title)
                }
                SwarmEvent::SubtaskCompleted { subtask_id, status, attempts, .. } => {
                    println!("subtask {} -> {} (attempt {})", subtask_id, status, attempts)
                }
                SwarmEvent::RateLimitWait { wait_ms } => println!("rate limited, waiting {}ms", wait_ms),
                SwarmEvent::LlmRetry { attempt, delay_ms, .. } => {
                    println!("llm retry {} in {}ms", attempt, delay_ms)
                }
                SwarmEvent::ProjectDone { summary, .. } => println!("done: {}", summary),
                SwarmEvent::ProjectError { message, .. } => println!("error: {}", message),
                // Token deltas are too chatty for line output
                _ => {}
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(model = %config.llm.model, workers = config.workers.count, "swarm starting");

    let session = SwarmSession::new(config);
    let printer = spawn_event_printer(&session);

    let root = cli.root.canonicalize().unwrap_or(cli.root.clone());
    let outcome = match cli.command {
        Command::Build { task } => session.build(root, &task).await?,
        Command::Resume => session.resume(root).await?,
        Command::Continue { changes } => session.continue_build(root, &changes).await?,
    };

    printer.abort();

    let totals = session.token_totals();
    match outcome {
        BuildOutcome::Done { summary } => {
            println!("\nBuild complete: {}", summary);
        }
        BuildOutcome::MaxIterations => {
            println!("\nIteration budget exhausted; checkpoint saved. Run `swarm resume` to continue.");
        }
    }
    println!(
        "Tokens: {} prompt / {} completion across {} calls",
        totals.prompt_tokens, totals.completion_tokens, totals.calls
    );

    Ok(())
}
