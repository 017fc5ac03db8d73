// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Postbox - filesystem message broker and liveness supervisor for
//! always-on agent workers.
//!
//! This is the binary entry point. Exit codes: `0` success, `1` failure,
//! `2` usage error, `3` lock held by another run, `4` precondition failed.

mod daemon;
mod jobs;
mod queue;
mod shutdown;
mod status;
mod update;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use postbox_config::PostboxConfig;
use postbox_core::PostboxError;
use postbox_queue::DeliveryManager;
use serde::Serialize;

use crate::jobs::JobsCommand;
use crate::queue::QueueCommand;
use crate::update::Updater;

/// Postbox - filesystem message broker for agent workers.
#[derive(Parser, Debug)]
#[command(name = "postbox", version, about, long_about = None)]
struct Cli {
    /// Load this configuration file instead of the standard search path.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Agent whose queue to operate on (default: `queue.default_agent`).
    #[arg(long, short, global = true)]
    agent: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    #[command(flatten)]
    Queue(QueueCommand),
    /// Touch an agent's heartbeat file.
    Heartbeat {
        #[arg(value_name = "AGENT")]
        name: Option<String>,
    },
    /// Restart agents whose heartbeat went stale.
    Supervise {
        #[arg(long)]
        once: bool,
    },
    /// Nudge idle agents with a self-check message.
    SelfCheck {
        #[arg(long)]
        once: bool,
    },
    /// Move channel traffic into inboxes and replies out of outboxes.
    Route {
        #[arg(long)]
        once: bool,
    },
    /// Show heartbeat, process and queue state for every agent.
    Status {
        #[arg(long)]
        json: bool,
        /// Disable colors.
        #[arg(long)]
        plain: bool,
    },
    /// Manage scheduled jobs.
    Jobs {
        #[command(subcommand)]
        action: JobsCommand,
    },
    /// Run one scheduled job (invoked by cron).
    RunJob { name: String },
    /// Snapshot, update and roll back state files.
    Update {
        #[command(subcommand)]
        action: UpdateCommand,
    },
}

#[derive(Subcommand, Debug)]
enum UpdateCommand {
    /// Capture the current state files.
    Snapshot {
        #[arg(long, default_value = "manual")]
        label: String,
    },
    /// Snapshot, run the apply and health commands, roll back on failure.
    Apply,
    /// Restore a snapshot, keeping a safety copy of the current files.
    Restore { id: String },
    /// List snapshots, newest first.
    List,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => postbox_config::load_and_validate_path(path),
        None => postbox_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            postbox_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    init_tracing(&config.daemon.log_level);

    if let Err(e) = run(cli, config).await {
        tracing::debug!(error = ?e, "command failed");
        eprintln!("postbox: {e}");
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli, config: PostboxConfig) -> Result<(), PostboxError> {
    let manager = Arc::new(DeliveryManager::from_config(&config));
    let agent = cli.agent.as_deref();

    match cli.command {
        Commands::Queue(command) => queue::run_queue(&config, &manager, agent, command).await,
        Commands::Heartbeat { name } => {
            let name = name
                .as_deref()
                .or(agent)
                .unwrap_or(&config.queue.default_agent);
            daemon::run_heartbeat(&config, name)
        }
        Commands::Supervise { once } => daemon::run_supervise(&config, once).await,
        Commands::SelfCheck { once } => daemon::run_self_check(&config, manager, once).await,
        Commands::Route { once } => daemon::run_route(&config, manager, once).await,
        Commands::Status { json, plain } => status::run_status(&config, &manager, json, plain),
        Commands::Jobs { action } => jobs::run_jobs(&config, action).await,
        Commands::RunJob { name } => jobs::run_job(&config, manager, &name).await,
        Commands::Update { action } => {
            let updater = Updater::from_config(&config);
            match action {
                UpdateCommand::Snapshot { label } => print_json(&updater.snapshot(&label)?),
                UpdateCommand::Apply => print_json(&updater.apply().await?),
                UpdateCommand::Restore { id } => print_json(&updater.restore(&id)?),
                UpdateCommand::List => print_json(&updater.list()?),
            }
        }
    }
}

/// Print `value` as pretty JSON on stdout.
pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), PostboxError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| PostboxError::Internal(format!("serialize output: {e}")))?;
    println!("{text}");
    Ok(())
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("postbox={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
