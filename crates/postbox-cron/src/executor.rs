// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Job executor: the target of every crontab line.
//!
//! A run takes the job's lock, executes its command, writes a task output
//! file, hands the output to the configured agent as an inbox message and
//! records the outcome in the registry.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use postbox_config::PostboxConfig;
use postbox_core::{Message, MessageId, PostboxError};
use postbox_queue::DeliveryManager;
use postbox_queue::atomic::{create_atomic, read_json};
use postbox_supervisor::OpLock;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{info, warn};

use crate::registry::{JobRegistry, JobStatus};

/// Source tag on messages produced by scheduled jobs.
pub const CRON_SOURCE: &str = "cron";

/// One `{outputs_dir}/{YYYYmmdd-HHMMSS}-{name}.json` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub job_name: String,
    pub timestamp: DateTime<Utc>,
    pub status: JobStatus,
    pub output: String,
}

/// Result of one run.
#[derive(Debug, Clone, Serialize)]
pub struct JobRun {
    pub job: String,
    pub status: JobStatus,
    pub output_file: PathBuf,
    pub message_id: MessageId,
}

pub struct JobExecutor {
    registry: JobRegistry,
    manager: Arc<DeliveryManager>,
    outputs_dir: PathBuf,
    lock_dir: PathBuf,
    agent: String,
}

impl JobExecutor {
    pub fn new(
        registry: JobRegistry,
        manager: Arc<DeliveryManager>,
        outputs_dir: impl Into<PathBuf>,
        lock_dir: impl Into<PathBuf>,
        agent: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            manager,
            outputs_dir: outputs_dir.into(),
            lock_dir: lock_dir.into(),
            agent: agent.into(),
        }
    }

    pub fn from_config(config: &PostboxConfig, manager: Arc<DeliveryManager>) -> Self {
        Self::new(
            JobRegistry::new(config.jobs_registry_path()),
            manager,
            config.jobs_outputs_dir(),
            config.state_dir(),
            config
                .jobs
                .agent
                .clone()
                .unwrap_or_else(|| config.queue.default_agent.clone()),
        )
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Run job `name` once.
    ///
    /// `LockContention` when the same job is already running, `Precondition`
    /// when it is unknown or disabled. A command that exits non-zero is a
    /// recorded `failed` run, not an error.
    pub async fn run(&self, name: &str) -> Result<JobRun, PostboxError> {
        let _lock = OpLock::acquire(&self.lock_dir, &format!("job-{name}"))?;

        let job = match self.registry.get(name) {
            Ok(job) => job,
            Err(PostboxError::NotFound(_)) => {
                return Err(PostboxError::Precondition(format!("job `{name}` does not exist")));
            }
            Err(e) => return Err(e),
        };
        if !job.enabled {
            return Err(PostboxError::Precondition(format!("job `{name}` is disabled")));
        }

        let started = Utc::now();
        let (status, output) = execute(&job.command).await;
        info!(job = %name, %status, "job finished");

        let record = TaskOutput {
            job_name: name.to_string(),
            timestamp: started,
            status,
            output,
        };
        let output_file = self.write_output(&record)?;

        let text = format!("[Scheduled job `{name}` {status}]\n\n{}", record.output);
        let message_id = self
            .manager
            .enqueue(&self.agent, Message::text(CRON_SOURCE, text))?;

        if let Err(e) = self.registry.record_run(name, started, status) {
            warn!(job = %name, error = %e, "failed to record job run");
        }

        Ok(JobRun {
            job: name.to_string(),
            status,
            output_file,
            message_id,
        })
    }

    fn write_output(&self, record: &TaskOutput) -> Result<PathBuf, PostboxError> {
        let stamp = record.timestamp.format("%Y%m%d-%H%M%S");
        let bytes = serde_json::to_vec_pretty(record)
            .map_err(|e| PostboxError::Internal(format!("serialize task output: {e}")))?;
        // Two runs in the same second get a numeric suffix.
        for n in 0..100 {
            let file = match n {
                0 => format!("{stamp}-{}.json", record.job_name),
                n => format!("{stamp}-{}-{n}.json", record.job_name),
            };
            let path = self.outputs_dir.join(file);
            if path.exists() {
                continue;
            }
            create_atomic(&path, &bytes)?;
            return Ok(path);
        }
        Err(PostboxError::Internal(format!(
            "too many outputs for job `{}` in one second",
            record.job_name
        )))
    }
}

/// Run a job command, capturing stdout and stderr together.
async fn execute(command: &[String]) -> (JobStatus, String) {
    let Some((program, args)) = command.split_first() else {
        return (JobStatus::Failed, "job has no command".to_string());
    };
    let result = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await;

    match result {
        Ok(out) => {
            let mut text = String::from_utf8_lossy(&out.stdout).trim_end().to_string();
            let stderr = String::from_utf8_lossy(&out.stderr);
            if !stderr.trim().is_empty() {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(stderr.trim_end());
            }
            let status = if out.status.success() {
                JobStatus::Success
            } else {
                JobStatus::Failed
            };
            (status, text)
        }
        Err(e) => (JobStatus::Failed, format!("failed to start `{program}`: {e}")),
    }
}

/// Filter for [`recent_outputs`].
#[derive(Debug, Clone, Default)]
pub struct OutputFilter {
    pub job_name: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: usize,
}

/// Task outputs, newest first.
pub fn recent_outputs(dir: &Path, filter: &OutputFilter) -> Result<Vec<TaskOutput>, PostboxError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(PostboxError::store(dir, e)),
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    files.reverse();

    let mut outputs = Vec::new();
    for path in files {
        if filter.limit > 0 && outputs.len() >= filter.limit {
            break;
        }
        let output: TaskOutput = match read_json(&path) {
            Ok(Some(output)) => output,
            Ok(None) => continue,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable task output");
                continue;
            }
        };
        if filter
            .job_name
            .as_deref()
            .is_some_and(|name| !output.job_name.eq_ignore_ascii_case(name))
        {
            continue;
        }
        if filter.since.is_some_and(|since| output.timestamp < since) {
            continue;
        }
        outputs.push(output);
    }
    Ok(outputs)
}
