// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Crontab synchronisation.
//!
//! Each enabled job owns exactly one line, tagged with a trailing marker
//! comment so it can be found again:
//!
//! ```text
//! 0 9 * * * /usr/local/bin/postbox run-job morning-report # postbox-job:morning-report
//! ```
//!
//! Sync rewrites only marked lines; everything else in the crontab is kept
//! byte for byte.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use postbox_core::PostboxError;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::registry::Job;

const MARKER: &str = "# postbox-job:";

/// Where crontab lines live.
#[derive(Debug, Clone)]
pub enum CrontabTarget {
    /// A plain file, edited in place (tests, containers, `/etc/cron.d`).
    File(PathBuf),
    /// The invoking user's crontab via `crontab -l` / `crontab -`.
    User,
}

impl CrontabTarget {
    pub fn from_path(path: Option<&Path>) -> Self {
        match path {
            Some(p) => CrontabTarget::File(p.to_path_buf()),
            None => CrontabTarget::User,
        }
    }

    pub async fn read(&self) -> Result<String, PostboxError> {
        match self {
            CrontabTarget::File(path) => match tokio::fs::read_to_string(path).await {
                Ok(s) => Ok(s),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
                Err(e) => Err(PostboxError::store(path, e)),
            },
            CrontabTarget::User => {
                let out = Command::new("crontab")
                    .arg("-l")
                    .output()
                    .await
                    .map_err(|e| PostboxError::Internal(format!("crontab -l: {e}")))?;
                // `crontab -l` exits 1 with "no crontab for user" on a fresh account.
                if out.status.success() {
                    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
                } else {
                    debug!(stderr = %String::from_utf8_lossy(&out.stderr).trim(), "no existing crontab");
                    Ok(String::new())
                }
            }
        }
    }

    pub async fn write(&self, contents: &str) -> Result<(), PostboxError> {
        match self {
            CrontabTarget::File(path) => {
                postbox_queue::atomic::write_atomic(path, contents.as_bytes())
            }
            CrontabTarget::User => {
                let mut child = Command::new("crontab")
                    .arg("-")
                    .stdin(Stdio::piped())
                    .stdout(Stdio::null())
                    .stderr(Stdio::piped())
                    .spawn()
                    .map_err(|e| PostboxError::Internal(format!("crontab -: {e}")))?;
                if let Some(mut stdin) = child.stdin.take() {
                    stdin
                        .write_all(contents.as_bytes())
                        .await
                        .map_err(|e| PostboxError::Internal(format!("crontab stdin: {e}")))?;
                }
                let out = child
                    .wait_with_output()
                    .await
                    .map_err(|e| PostboxError::Internal(format!("crontab -: {e}")))?;
                if !out.status.success() {
                    return Err(PostboxError::Internal(format!(
                        "crontab rejected the update: {}",
                        String::from_utf8_lossy(&out.stderr).trim()
                    )));
                }
                Ok(())
            }
        }
    }
}

/// The crontab line for one job.
pub fn job_line(name: &str, job: &Job, executor: &Path) -> String {
    format!(
        "{} {} run-job {name} {MARKER}{name}",
        job.schedule,
        executor.display()
    )
}

fn is_managed(line: &str) -> bool {
    line.contains(MARKER)
}

/// Replace every managed line in `existing` with lines for the enabled `jobs`.
pub fn render(existing: &str, jobs: &[(String, Job)], executor: &Path) -> String {
    let mut lines: Vec<String> = existing
        .lines()
        .filter(|line| !is_managed(line))
        .map(str::to_string)
        .collect();
    lines.extend(
        jobs.iter()
            .filter(|(_, job)| job.enabled)
            .map(|(name, job)| job_line(name, job, executor)),
    );

    let mut out = lines.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

/// Outcome of a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct SyncReport {
    pub installed: usize,
    pub changed: bool,
}

/// Bring `target` in line with the registry's enabled jobs.
pub async fn sync(
    target: &CrontabTarget,
    jobs: &[(String, Job)],
    executor: &Path,
) -> Result<SyncReport, PostboxError> {
    let existing = target.read().await?;
    let rendered = render(&existing, jobs, executor);
    let installed = jobs.iter().filter(|(_, j)| j.enabled).count();
    let changed = rendered != existing;
    if changed {
        target.write(&rendered).await?;
        info!(installed, "crontab updated");
    } else {
        debug!(installed, "crontab already in sync");
    }
    Ok(SyncReport { installed, changed })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(schedule: &str, enabled: bool) -> Job {
        Job {
            schedule: schedule.into(),
            enabled,
            last_run: None,
            last_status: None,
            command: vec!["true".into()],
            description: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn render_keeps_foreign_lines_and_drops_disabled() {
        let existing = "MAILTO=ops@example.com\n\
                        */5 * * * * /usr/bin/other-tool\n\
                        0 1 * * * /old/postbox run-job gone # postbox-job:gone\n";
        let jobs = vec![
            ("backup".to_string(), job("0 2 * * *", true)),
            ("paused".to_string(), job("0 3 * * *", false)),
        ];
        let out = render(existing, &jobs, Path::new("/usr/local/bin/postbox"));

        assert_eq!(
            out,
            "MAILTO=ops@example.com\n\
             */5 * * * * /usr/bin/other-tool\n\
             0 2 * * * /usr/local/bin/postbox run-job backup # postbox-job:backup\n"
        );
    }

    #[tokio::test]
    async fn file_sync_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let target = CrontabTarget::File(dir.path().join("crontab"));
        let jobs = vec![("report".to_string(), job("30 8 * * 1", true))];
        let exe = Path::new("/opt/postbox");

        let first = sync(&target, &jobs, exe).await.unwrap();
        assert_eq!(first, SyncReport { installed: 1, changed: true });
        let second = sync(&target, &jobs, exe).await.unwrap();
        assert!(!second.changed);

        let contents = target.read().await.unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.ends_with("# postbox-job:report\n"));

        sync(&target, &[], exe).await.unwrap();
        assert_eq!(target.read().await.unwrap(), "");
    }
}
