// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scheduled jobs for postbox.
//!
//! Scheduling itself is left to the host's cron. This crate keeps the job
//! registry, installs one crontab line per enabled job, and implements the
//! `run-job` executor those lines invoke.

pub mod crontab;
pub mod executor;
pub mod registry;
pub mod schedule;

pub use crontab::{CrontabTarget, SyncReport, sync};
pub use executor::{CRON_SOURCE, JobExecutor, JobRun, OutputFilter, TaskOutput, recent_outputs};
pub use registry::{Job, JobRegistry, JobStatus, NewJob};
pub use schedule::{cron_to_human, next_run, validate_cron_schedule, validate_job_name};
