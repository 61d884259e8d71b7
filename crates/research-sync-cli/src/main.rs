//! research-sync - follow research sessions from the terminal
//!
//! Usage:
//!   research-sync watch <session-id>
//!   research-sync start "How do CRDTs merge?" --watch
//!   research-sync sessions --api-base http://localhost:8000/v1
//!   research-sync init-config --api-base https://research.example.com/v1

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use research_sync_core::{
    display_percentage, format_elapsed, stage_label, PullClient, ResearchRequest, Snapshot,
    SyncConfig, SyncController, SyncEvent, SyncState,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "research-sync")]
#[command(about = "Follow the progress of research sessions")]
#[command(version)]
struct Args {
    /// API base URL (overrides config and RESEARCH_API_BASE)
    #[arg(long, global = true, env = "RESEARCH_API_BASE")]
    api_base: Option<String>,

    /// Polling interval used when the live channel is unavailable
    #[arg(long, global = true)]
    poll_interval_ms: Option<u64>,

    /// Config file (default: ~/.research-sync/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a research session
    Start {
        /// Research question
        question: String,

        #[arg(long)]
        model_id: Option<String>,

        /// Extra instructions for the research task
        #[arg(long)]
        instructions: Option<String>,

        /// Follow the new session until it completes
        #[arg(long)]
        watch: bool,
    },
    /// Follow a session until it completes (Ctrl+C to detach)
    Watch {
        session_id: String,
    },
    /// List sessions the server is currently running
    Sessions,
    /// Write the effective settings to the config file
    InitConfig {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

fn log_filter() -> tracing_subscriber::EnvFilter {
    let level = if let Ok(v) = std::env::var("RUST_LOG") {
        v
    } else if let Ok(v) = std::env::var("RESEARCH_SYNC_LOG_LEVEL") {
        match v.as_str() {
            "silent" => "off".to_string(),
            "fatal" => "error".to_string(),
            other => other.to_string(),
        }
    } else {
        "warn".to_string()
    };

    tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
}

fn resolve_config(args: &Args) -> SyncConfig {
    let mut config = match &args.config {
        Some(path) => SyncConfig::load_from(path),
        None => SyncConfig::load(),
    };
    if let Some(base) = &args.api_base {
        config.api_base = base.clone();
    }
    if let Some(ms) = args.poll_interval_ms {
        config.poll_interval_ms = ms;
    }
    config
}

/// Persist the resolved settings; returns the path written
fn init_config(args: &Args, config: &SyncConfig, force: bool) -> Result<PathBuf> {
    let path = args.config.clone().unwrap_or_else(SyncConfig::default_path);
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to replace it)", path.display());
    }
    config
        .save_to(&path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

fn render(snapshot: &Snapshot, live: bool) -> String {
    let elapsed = snapshot.elapsed_ms(chrono::Utc::now());
    format!(
        "[{}] {:>5.1}%  step {}/{}  {}  ({})",
        if live { "live" } else { "poll" },
        display_percentage(snapshot),
        snapshot.step_number,
        snapshot.total_steps,
        stage_label(&snapshot.step),
        format_elapsed(elapsed),
    )
}

/// Print updates until completion; returns false if detached first
async fn watch(config: &SyncConfig, session_id: &str) -> Result<bool> {
    let controller = SyncController::new(config).context("Invalid sync configuration")?;
    let mut events = controller.start(session_id);
    let mut live = true;
    let mut updates_seen = 0;

    eprintln!("\x1b[90mWatching {} via {}...\x1b[0m", session_id, config.api_base);

    let completed = loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n\x1b[33mDetaching (research continues on the server)\x1b[0m");
                break false;
            }
        };

        match event {
            Ok(SyncEvent::StateChanged { state, is_live }) => {
                live = is_live;
                if state == SyncState::Terminal {
                    continue;
                }
                eprintln!("\x1b[90m[{}]\x1b[0m", state.as_str());
            }
            Ok(SyncEvent::Snapshot(snapshot)) => {
                println!("{}", render(&snapshot, live));
                for update in snapshot.status_updates.iter().skip(updates_seen) {
                    println!("    {}", update);
                }
                updates_seen = snapshot.status_updates.len();
            }
            Ok(SyncEvent::Completed(snapshot)) => {
                println!("{}", render(&snapshot, live));
                println!("\x1b[32mResearch complete!\x1b[0m");
                if let Some(started) = snapshot.started_at() {
                    let local = started.with_timezone(&chrono::Local);
                    println!("\x1b[90mStarted {}\x1b[0m", local.format("%Y-%m-%d %H:%M:%S"));
                }
                for source in &snapshot.sources {
                    match &source.url {
                        Some(url) => println!("  - {} <{}>", source.text, url),
                        None => println!("  - {}", source.text),
                    }
                }
                break true;
            }
            Ok(SyncEvent::Error(e)) => {
                eprintln!("\x1b[31m{}\x1b[0m", e);
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Display fell behind, showing latest state");
                if let Some(snapshot) = controller.view(session_id).and_then(|v| v.snapshot) {
                    println!("{}", render(&snapshot, live));
                }
            }
            Err(RecvError::Closed) => break false,
        }
    };

    controller.stop(session_id);
    Ok(completed)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = resolve_config(&args);

    match &args.command {
        Command::InitConfig { force } => {
            let path = init_config(&args, &config, *force)?;
            eprintln!("\x1b[32mWrote {}\x1b[0m", path.display());
        }
        Command::Sessions => {
            let client = PullClient::from_config(&config)?;
            let sessions = client
                .fetch_active_sessions()
                .await
                .context("Failed to list active sessions")?;
            if sessions.is_empty() {
                eprintln!("\x1b[90mNo active research sessions\x1b[0m");
            }
            for id in sessions {
                println!("{}", id);
            }
        }
        Command::Start {
            question,
            model_id,
            instructions,
            watch: follow,
        } => {
            let client = PullClient::from_config(&config)?;
            let started = client
                .start_research(&ResearchRequest {
                    question: question.clone(),
                    model_id: model_id.clone(),
                    additional_instructions: instructions.clone(),
                })
                .await
                .context("Failed to start research")?;
            println!("{}", started.session_id);
            if !started.message.is_empty() {
                eprintln!("\x1b[90m{}\x1b[0m", started.message);
            }
            if *follow && !watch(&config, &started.session_id).await? {
                std::process::exit(130);
            }
        }
        Command::Watch { session_id } => {
            if !watch(&config, session_id).await? {
                std::process::exit(130);
            }
        }
    }

    Ok(())
}
