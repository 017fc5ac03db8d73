// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `postbox jobs` and `postbox run-job` command implementations.
//!
//! Every registry mutation is followed by a crontab sync so the installed
//! lines always match the enabled jobs.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::Subcommand;
use postbox_config::PostboxConfig;
use postbox_core::PostboxError;
use postbox_cron::{
    CrontabTarget, Job, JobExecutor, JobRegistry, JobStatus, NewJob, OutputFilter, SyncReport,
    cron_to_human, next_run, recent_outputs, sync,
};
use postbox_queue::DeliveryManager;
use serde::Serialize;

use crate::print_json;

#[derive(Subcommand, Debug)]
pub enum JobsCommand {
    /// List registered jobs with their next run.
    List,
    /// Register a job and install its crontab line.
    Add {
        name: String,
        /// Five-field cron schedule, e.g. "0 9 * * 1-5".
        #[arg(long)]
        schedule: String,
        #[arg(long)]
        description: Option<String>,
        /// Program and arguments, after `--`.
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// Remove a job and its crontab line.
    Remove { name: String },
    Enable { name: String },
    Disable { name: String },
    /// Change a job's schedule.
    Schedule { name: String, schedule: String },
    /// Reinstall crontab lines from the registry.
    Sync,
    /// Show recent task outputs, newest first.
    Outputs {
        #[arg(long)]
        job: Option<String>,
        /// Only outputs at or after this RFC 3339 time.
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Debug, Serialize)]
struct JobView {
    name: String,
    schedule: String,
    human: String,
    enabled: bool,
    next_run: Option<DateTime<Utc>>,
    last_run: Option<DateTime<Utc>>,
    last_status: Option<JobStatus>,
    command: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

impl JobView {
    fn new(name: String, job: Job, now: DateTime<Utc>) -> Self {
        Self {
            next_run: job
                .enabled
                .then(|| next_run(&job.schedule, now).ok())
                .flatten(),
            human: cron_to_human(&job.schedule),
            name,
            schedule: job.schedule,
            enabled: job.enabled,
            last_run: job.last_run,
            last_status: job.last_status,
            command: job.command,
            description: job.description,
        }
    }
}

/// Binary the crontab lines invoke.
fn executor_path(config: &PostboxConfig) -> Result<PathBuf, PostboxError> {
    match &config.jobs.executor_path {
        Some(path) => Ok(path.clone()),
        None => std::env::current_exe()
            .map_err(|e| PostboxError::Internal(format!("cannot locate postbox binary: {e}"))),
    }
}

async fn sync_crontab(
    config: &PostboxConfig,
    registry: &JobRegistry,
) -> Result<SyncReport, PostboxError> {
    let target = CrontabTarget::from_path(config.jobs.crontab_path.as_deref());
    sync(&target, &registry.list()?, &executor_path(config)?).await
}

pub async fn run_jobs(config: &PostboxConfig, command: JobsCommand) -> Result<(), PostboxError> {
    let registry = JobRegistry::new(config.jobs_registry_path());

    match command {
        JobsCommand::List => {
            let now = Utc::now();
            let jobs: Vec<JobView> = registry
                .list()?
                .into_iter()
                .map(|(name, job)| JobView::new(name, job, now))
                .collect();
            print_json(&jobs)
        }
        JobsCommand::Add {
            name,
            schedule,
            description,
            command,
        } => {
            let job = registry.add(NewJob {
                name: name.clone(),
                schedule,
                command,
                description,
            })?;
            sync_crontab(config, &registry).await?;
            print_json(&JobView::new(name, job, Utc::now()))
        }
        JobsCommand::Remove { name } => {
            registry.remove(&name)?;
            print_json(&sync_crontab(config, &registry).await?)
        }
        JobsCommand::Enable { name } => {
            registry.set_enabled(&name, true)?;
            print_json(&sync_crontab(config, &registry).await?)
        }
        JobsCommand::Disable { name } => {
            registry.set_enabled(&name, false)?;
            print_json(&sync_crontab(config, &registry).await?)
        }
        JobsCommand::Schedule { name, schedule } => {
            registry.set_schedule(&name, &schedule)?;
            sync_crontab(config, &registry).await?;
            print_json(&JobView::new(name.clone(), registry.get(&name)?, Utc::now()))
        }
        JobsCommand::Sync => print_json(&sync_crontab(config, &registry).await?),
        JobsCommand::Outputs { job, since, limit } => {
            let outputs = recent_outputs(
                &config.jobs_outputs_dir(),
                &OutputFilter {
                    job_name: job,
                    since,
                    limit,
                },
            )?;
            print_json(&outputs)
        }
    }
}

/// The crontab entry point: run one job and report the outcome.
pub async fn run_job(
    config: &PostboxConfig,
    manager: Arc<DeliveryManager>,
    name: &str,
) -> Result<(), PostboxError> {
    let run = JobExecutor::from_config(config, manager).run(name).await?;
    print_json(&run)
}
