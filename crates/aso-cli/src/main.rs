//! `aso` - watch analysis sessions from the terminal

mod config;

use anyhow::{bail, Context, Result};
use aso_core::{
    ResultBatch, ResultBinder, SessionOrchestrator, SessionSnapshot, SessionStatus, StatusSource,
};
use aso_http::HttpSessionBackend;
use aso_session::SessionId;
use clap::{Parser, Subcommand};
use config::CliConfig;
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Exit code after Ctrl-C
const INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "aso", version, about = "Track long-running analysis sessions", long_about = None)]
struct Cli {
    /// TOML file with [orchestrator] and [backend] tables
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Backend base URL, overrides the config file
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Poll interval in milliseconds, overrides the config file
    #[arg(long, global = true)]
    poll_interval_ms: Option<u64>,

    /// Log as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Follow an existing session until it finishes
    Watch {
        /// Session identifier
        id: String,
    },
    /// Create a session and follow it
    Create {
        /// Creation parameters as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,
    },
    /// Retry a failed session and follow it
    Retry {
        /// Session identifier
        id: String,
    },
    /// Print the current record as JSON
    Status {
        /// Session identifier
        id: String,
    },
}

/// How a command ended
#[derive(Debug)]
enum Outcome {
    /// Record printed, nothing followed
    Printed,
    /// Session reached `ready`; carries the result sets when any are configured
    Ready(Option<ResultBatch>),
    Failed,
    Interrupted,
}

impl Outcome {
    fn exit_code(&self) -> ExitCode {
        match self {
            Self::Printed | Self::Ready(_) => ExitCode::SUCCESS,
            Self::Failed => ExitCode::FAILURE,
            Self::Interrupted => ExitCode::from(INTERRUPTED),
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = CliConfig::load(cli.config.as_deref())?
        .with_overrides(cli.base_url, cli.poll_interval_ms)?;
    let outcome = execute(config, cli.command).await?;
    if let Outcome::Ready(Some(batch)) = &outcome {
        print_results(batch)?;
    }
    Ok(outcome.exit_code())
}

async fn execute(config: CliConfig, command: Command) -> Result<Outcome> {
    let backend = Arc::new(HttpSessionBackend::new(&config.backend)?);
    let binder = backend
        .result_sources()
        .into_iter()
        .fold(ResultBinder::new(), ResultBinder::bind);
    let orchestrator = SessionOrchestrator::new(Arc::clone(&backend), config.orchestrator)?;
    // Subscribed before any trigger so the first "became ready" is seen.
    let results = (!binder.is_empty()).then(|| binder.spawn(orchestrator.subscribe()));

    let id = match command {
        Command::Status { id } => {
            let record = backend.status(&SessionId::new(id)).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            return Ok(Outcome::Printed);
        }
        Command::Watch { id } => {
            let id = SessionId::new(id);
            orchestrator.attach(&id).await?;
            id
        }
        Command::Create { params } => {
            let params: Value = serde_json::from_str(&params).context("--params is not JSON")?;
            let record = orchestrator.create(&params).await?;
            println!("created {}", record.id);
            record.id
        }
        Command::Retry { id } => {
            let id = SessionId::new(id);
            orchestrator.attach(&id).await?;
            orchestrator.retry(&id).await?;
            id
        }
    };

    let outcome = follow(&orchestrator, &id).await;
    orchestrator.shutdown();
    match outcome? {
        Outcome::Ready(_) => {
            let batch = match results {
                Some((mut batches, _task)) => batches.recv().await,
                None => None,
            };
            Ok(Outcome::Ready(batch))
        }
        other => Ok(other),
    }
}

/// Print each snapshot until the session is terminal or Ctrl-C
async fn follow(
    orchestrator: &SessionOrchestrator<HttpSessionBackend>,
    id: &SessionId,
) -> Result<Outcome> {
    let mut snapshots = orchestrator
        .observe(id)
        .with_context(|| format!("session {id} is not tracked"))?;
    let mut warned = false;

    loop {
        let snapshot = snapshots.borrow_and_update().clone();
        print_snapshot(&snapshot);
        if snapshot.stalled && !warned {
            warned = true;
            println!("{id}: no terminal status yet, still polling");
        }

        match snapshot.status() {
            SessionStatus::Ready => return Ok(Outcome::Ready(None)),
            SessionStatus::Failed => {
                println!(
                    "{id} failed: {}",
                    snapshot.record.error_message.as_deref().unwrap_or("no reason given")
                );
                return Ok(Outcome::Failed);
            }
            SessionStatus::Draft | SessionStatus::Running => {}
        }

        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    bail!("session {id} was released");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                orchestrator.cancel(id);
                println!("{id}: stopped watching");
                return Ok(Outcome::Interrupted);
            }
        }
    }
}

fn print_snapshot(snapshot: &SessionSnapshot) {
    let record = &snapshot.record;
    let progress = snapshot.progress();
    let mut line = format!(
        "{} [{}] {} {}%",
        record.id,
        record.stage_label,
        progress,
        progress.percent()
    );
    if let Some(message) = &record.progress_message {
        line.push_str(" - ");
        line.push_str(message);
    }
    println!("{line}");
}

fn print_results(batch: &ResultBatch) -> Result<()> {
    for fetched in &batch.results {
        match &fetched.outcome {
            Ok(value) => println!(
                "{} {}:\n{}",
                batch.session_id,
                fetched.name,
                serde_json::to_string_pretty(value)?
            ),
            Err(err) => println!("{} {}: not loaded ({err})", batch.session_id, fetched.name),
        }
    }
    Ok(())
}
