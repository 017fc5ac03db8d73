// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistent job registry.
//!
//! A single JSON document keyed by job name:
//! `{"jobs": {"<name>": {"schedule": "...", "enabled": true, ...}}}`.
//! Every mutation is a read-modify-write followed by an atomic replace.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use postbox_core::PostboxError;
use postbox_queue::atomic::{read_json, write_json_atomic};
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::info;

use crate::schedule::{validate_cron_schedule, validate_job_name};

/// Outcome of the last run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub schedule: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_status: Option<JobStatus>,
    /// Program and arguments run by the executor.
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    jobs: BTreeMap<String, Job>,
}

/// Request to create a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub name: String,
    pub schedule: String,
    pub command: Vec<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct JobRegistry {
    path: PathBuf,
}

impl JobRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<RegistryFile, PostboxError> {
        Ok(read_json(&self.path)?.unwrap_or_default())
    }

    fn save(&self, file: &RegistryFile) -> Result<(), PostboxError> {
        write_json_atomic(&self.path, file)
    }

    fn update<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Job) -> T,
    ) -> Result<T, PostboxError> {
        let mut file = self.load()?;
        let job = file
            .jobs
            .get_mut(name)
            .ok_or_else(|| PostboxError::NotFound(format!("job `{name}` not found")))?;
        let out = f(job);
        self.save(&file)?;
        Ok(out)
    }

    /// All jobs, sorted by name.
    pub fn list(&self) -> Result<Vec<(String, Job)>, PostboxError> {
        Ok(self.load()?.jobs.into_iter().collect())
    }

    pub fn get(&self, name: &str) -> Result<Job, PostboxError> {
        self.load()?
            .jobs
            .remove(name)
            .ok_or_else(|| PostboxError::NotFound(format!("job `{name}` not found")))
    }

    pub fn add(&self, new: NewJob) -> Result<Job, PostboxError> {
        validate_job_name(&new.name)?;
        validate_cron_schedule(&new.schedule)?;
        if new.command.is_empty() {
            return Err(PostboxError::InvalidInput(format!(
                "job `{}` needs a command",
                new.name
            )));
        }

        let mut file = self.load()?;
        if file.jobs.contains_key(&new.name) {
            return Err(PostboxError::InvalidInput(format!(
                "job `{}` already exists",
                new.name
            )));
        }
        let now = Utc::now();
        let job = Job {
            schedule: new.schedule.split_whitespace().collect::<Vec<_>>().join(" "),
            enabled: true,
            last_run: None,
            last_status: None,
            command: new.command,
            description: new.description,
            created_at: Some(now),
            updated_at: Some(now),
        };
        file.jobs.insert(new.name.clone(), job.clone());
        self.save(&file)?;
        info!(job = %new.name, schedule = %job.schedule, "job added");
        Ok(job)
    }

    pub fn remove(&self, name: &str) -> Result<(), PostboxError> {
        let mut file = self.load()?;
        if file.jobs.remove(name).is_none() {
            return Err(PostboxError::NotFound(format!("job `{name}` not found")));
        }
        self.save(&file)?;
        info!(job = %name, "job removed");
        Ok(())
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), PostboxError> {
        self.update(name, |job| {
            job.enabled = enabled;
            job.updated_at = Some(Utc::now());
        })
    }

    pub fn set_schedule(&self, name: &str, schedule: &str) -> Result<(), PostboxError> {
        validate_cron_schedule(schedule)?;
        let schedule = schedule.split_whitespace().collect::<Vec<_>>().join(" ");
        self.update(name, |job| {
            job.schedule = schedule;
            job.updated_at = Some(Utc::now());
        })
    }

    /// Called by the executor after each run.
    pub fn record_run(
        &self,
        name: &str,
        at: DateTime<Utc>,
        status: JobStatus,
    ) -> Result<(), PostboxError> {
        self.update(name, |job| {
            job.last_run = Some(at);
            job.last_status = Some(status);
        })
    }
}
