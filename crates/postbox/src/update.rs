// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `postbox update` command implementation.
//!
//! Snapshots the broker's state files before an update, runs the configured
//! apply and health commands, and rolls the state files back when either
//! fails. Restores always take a safety snapshot of the current files first.
//!
//! Message directories are never part of a snapshot: restoring them would
//! drop traffic that arrived after the snapshot was taken.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::{DateTime, Utc};
use postbox_config::PostboxConfig;
use postbox_core::{MessageId, PostboxError};
use postbox_queue::atomic::{ensure_dir, read_json, write_atomic, write_json_atomic};
use postbox_router::CursorStore;
use postbox_supervisor::OpLock;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{error, info, warn};

const MANIFEST: &str = "manifest.json";
const FILES_DIR: &str = "files";

/// State-dir file suffixes captured in every snapshot.
const STATE_SUFFIXES: &[&str] = &[".self_check", ".handle.json"];

/// One captured file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotFile {
    /// Where the file lives and is restored to.
    pub source: PathBuf,
    /// Name inside the snapshot's `files/` directory.
    pub stored: String,
}

/// Contents of a snapshot's `manifest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub files: Vec<SnapshotFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub snapshot: String,
    /// Snapshot of the files as they were just before the restore.
    pub safety_snapshot: String,
    pub restored: usize,
}

pub struct Updater {
    snapshot_dir: PathBuf,
    state_dir: PathBuf,
    registry_path: PathBuf,
    cursor_path: PathBuf,
    includes: Vec<PathBuf>,
    apply_command: Vec<String>,
    health_command: Vec<String>,
}

impl Updater {
    pub fn from_config(config: &PostboxConfig) -> Self {
        let state_dir = config.state_dir();
        Self {
            snapshot_dir: config.snapshot_dir(),
            registry_path: config.jobs_registry_path(),
            cursor_path: CursorStore::in_state_dir(&state_dir).path().to_path_buf(),
            state_dir,
            includes: config.update.includes().map(Path::to_path_buf).collect(),
            apply_command: config.update.apply_command.clone(),
            health_command: config.update.health_command.clone(),
        }
    }

    /// Existing files a snapshot captures.
    fn tracked_files(&self) -> Result<Vec<PathBuf>, PostboxError> {
        let mut files = vec![self.registry_path.clone(), self.cursor_path.clone()];

        match std::fs::read_dir(&self.state_dir) {
            Ok(entries) => {
                let mut state: Vec<PathBuf> = entries
                    .filter_map(Result::ok)
                    .map(|e| e.path())
                    .filter(|p| {
                        p.file_name()
                            .and_then(|n| n.to_str())
                            .is_some_and(|n| STATE_SUFFIXES.iter().any(|s| n.ends_with(s)))
                    })
                    .collect();
                state.sort();
                files.extend(state);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(PostboxError::store(&self.state_dir, e)),
        }
        files.extend(self.includes.iter().cloned());

        let mut seen = Vec::new();
        for file in files {
            if file.is_file() && !seen.contains(&file) {
                seen.push(file);
            }
        }
        Ok(seen)
    }

    /// Copy the tracked files into `{snapshot_dir}/{timestamp}-{label}/`.
    pub fn snapshot(&self, label: &str) -> Result<Snapshot, PostboxError> {
        if label.is_empty()
            || !label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(PostboxError::InvalidInput(format!(
                "snapshot label `{label}` may only contain letters, digits, `-` and `_`"
            )));
        }

        let created_at = Utc::now();
        let (id, dir) = self.claim_dir(&created_at, label)?;
        let files_dir = dir.join(FILES_DIR);
        ensure_dir(&files_dir)?;

        let mut files = Vec::new();
        for (i, source) in self.tracked_files()?.into_iter().enumerate() {
            let name = source
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("file");
            let stored = format!("{i:02}-{name}");
            let target = files_dir.join(&stored);
            std::fs::copy(&source, &target).map_err(|e| PostboxError::store(&source, e))?;
            files.push(SnapshotFile { source, stored });
        }

        let snapshot = Snapshot {
            id,
            label: label.to_string(),
            created_at,
            files,
        };
        // A snapshot without a manifest is ignored by `list`.
        write_json_atomic(&dir.join(MANIFEST), &snapshot)?;
        info!(snapshot = %snapshot.id, files = snapshot.files.len(), "snapshot taken");
        Ok(snapshot)
    }

    fn claim_dir(&self, at: &DateTime<Utc>, label: &str) -> Result<(String, PathBuf), PostboxError> {
        ensure_dir(&self.snapshot_dir)?;
        let stamp = at.format("%Y%m%d-%H%M%S");
        for n in 0..100 {
            let id = match n {
                0 => format!("{stamp}-{label}"),
                n => format!("{stamp}-{label}-{n}"),
            };
            let dir = self.snapshot_dir.join(&id);
            match std::fs::create_dir(&dir) {
                Ok(()) => return Ok((id, dir)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(PostboxError::store(&dir, e)),
            }
        }
        Err(PostboxError::Internal(format!(
            "too many `{label}` snapshots in one second"
        )))
    }

    /// All snapshots, newest first.
    pub fn list(&self) -> Result<Vec<Snapshot>, PostboxError> {
        let entries = match std::fs::read_dir(&self.snapshot_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PostboxError::store(&self.snapshot_dir, e)),
        };

        let mut snapshots = Vec::new();
        for entry in entries.filter_map(Result::ok) {
            let manifest = entry.path().join(MANIFEST);
            match read_json::<Snapshot>(&manifest) {
                Ok(Some(snapshot)) => snapshots.push(snapshot),
                Ok(None) => {}
                Err(e) => warn!(path = %manifest.display(), error = %e, "skipping unreadable snapshot"),
            }
        }
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(snapshots)
    }

    pub fn load(&self, id: &str) -> Result<Snapshot, PostboxError> {
        // Same path rules as message ids: no separators, no `..`.
        MessageId::parse(id)?;
        read_json(&self.snapshot_dir.join(id).join(MANIFEST))?
            .ok_or_else(|| PostboxError::NotFound(format!("snapshot `{id}`")))
    }

    /// Put the files of snapshot `id` back, after a safety snapshot.
    pub fn restore(&self, id: &str) -> Result<RestoreReport, PostboxError> {
        let _lock = OpLock::acquire(&self.state_dir, "update")?;
        self.restore_locked(id)
    }

    fn restore_locked(&self, id: &str) -> Result<RestoreReport, PostboxError> {
        let snapshot = self.load(id)?;
        let safety = self.snapshot("pre-restore")?;

        let files_dir = self.snapshot_dir.join(&snapshot.id).join(FILES_DIR);
        for file in &snapshot.files {
            let stored = files_dir.join(&file.stored);
            let bytes = std::fs::read(&stored).map_err(|e| PostboxError::store(&stored, e))?;
            write_atomic(&file.source, &bytes)?;
        }
        info!(snapshot = %snapshot.id, safety = %safety.id, "snapshot restored");
        Ok(RestoreReport {
            snapshot: snapshot.id,
            safety_snapshot: safety.id,
            restored: snapshot.files.len(),
        })
    }

    /// Snapshot, apply, health-check; roll back when a step fails.
    pub async fn apply(&self) -> Result<Snapshot, PostboxError> {
        if self.apply_command.is_empty() {
            return Err(PostboxError::Precondition(
                "no [update] apply_command configured".into(),
            ));
        }
        let _lock = OpLock::acquire(&self.state_dir, "update")?;
        let snapshot = self.snapshot("pre-update")?;

        let result = match run_step("apply", &self.apply_command).await {
            Ok(()) => run_step("health", &self.health_command).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                info!(snapshot = %snapshot.id, "update applied");
                Ok(snapshot)
            }
            Err(e) => {
                error!(snapshot = %snapshot.id, error = %e, "update failed, rolling back");
                self.restore_locked(&snapshot.id).map_err(|restore| {
                    PostboxError::Internal(format!(
                        "update failed ({e}) and rollback to {} failed: {restore}",
                        snapshot.id
                    ))
                })?;
                Err(PostboxError::Internal(format!(
                    "update failed and was rolled back to {}: {e}",
                    snapshot.id
                )))
            }
        }
    }
}

/// Run one update command. An empty command is a no-op.
async fn run_step(step: &str, command: &[String]) -> Result<(), PostboxError> {
    let Some((program, args)) = command.split_first() else {
        return Ok(());
    };
    info!(step, command = %command.join(" "), "running update step");
    let out = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| PostboxError::Internal(format!("{step} command `{program}`: {e}")))?;
    if out.status.success() {
        return Ok(());
    }
    Err(PostboxError::Internal(format!(
        "{step} command exited with {}: {}",
        out.status,
        String::from_utf8_lossy(&out.stderr).trim()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        _dir: tempfile::TempDir,
        config: PostboxConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut config = PostboxConfig::default();
            config.queue.base_dir = dir.path().join("queue");
            config.daemon.state_dir = Some(dir.path().join("state"));
            std::fs::create_dir_all(dir.path().join("state")).unwrap();
            Self { _dir: dir, config }
        }

        fn state(&self, name: &str) -> PathBuf {
            self.config.state_dir().join(name)
        }

        fn write(&self, name: &str, contents: &str) {
            std::fs::write(self.state(name), contents).unwrap();
        }

        fn read(&self, name: &str) -> String {
            std::fs::read_to_string(self.state(name)).unwrap()
        }

        fn updater(&self) -> Updater {
            Updater::from_config(&self.config)
        }
    }

    #[test]
    fn snapshot_captures_state_files_only() {
        let fx = Fixture::new();
        fx.write("jobs.json", r#"{"jobs":{}}"#);
        fx.write("cursors.json", r#"{"spool":"12"}"#);
        fx.write("main.self_check", "1700000000");
        fx.write("main.handle.json", "{}");
        fx.write("main.heartbeat", "1700000000");
        let inbox = fx.config.queue.base_dir.join("inbox");
        std::fs::create_dir_all(&inbox).unwrap();
        std::fs::write(inbox.join("1.json"), "{}").unwrap();

        let snapshot = fx.updater().snapshot("manual").unwrap();
        assert!(snapshot.id.ends_with("-manual"));
        let sources: Vec<_> = snapshot
            .files
            .iter()
            .map(|f| f.source.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(
            sources,
            ["jobs.json", "cursors.json", "main.handle.json", "main.self_check"]
        );
    }

    #[test]
    fn restore_puts_files_back_after_safety_snapshot() {
        let fx = Fixture::new();
        fx.write("jobs.json", "original");
        let updater = fx.updater();
        let snapshot = updater.snapshot("before").unwrap();

        fx.write("jobs.json", "changed");
        let report = updater.restore(&snapshot.id).unwrap();
        assert_eq!(report.restored, 1);
        assert_eq!(fx.read("jobs.json"), "original");

        let safety = updater.load(&report.safety_snapshot).unwrap();
        assert_eq!(safety.label, "pre-restore");
        let stored = fx
            .config
            .snapshot_dir()
            .join(&safety.id)
            .join(FILES_DIR)
            .join(&safety.files[0].stored);
        assert_eq!(std::fs::read_to_string(stored).unwrap(), "changed");
        assert_eq!(updater.list().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_health_check_rolls_back() {
        let mut fx = Fixture::new();
        fx.write("jobs.json", "original");
        let jobs = fx.state("jobs.json");
        fx.config.update.apply_command = vec![
            "sh".into(),
            "-c".into(),
            format!("echo broken > {}", jobs.display()),
        ];
        fx.config.update.health_command = vec!["false".into()];

        let err = fx.updater().apply().await.unwrap_err();
        assert!(err.to_string().contains("rolled back"), "{err}");
        assert_eq!(fx.read("jobs.json"), "original");

        let labels: Vec<_> = fx
            .updater()
            .list()
            .unwrap()
            .into_iter()
            .map(|s| s.label)
            .collect();
        assert_eq!(labels, ["pre-restore", "pre-update"]);
    }

    #[tokio::test]
    async fn healthy_update_keeps_new_state() {
        let mut fx = Fixture::new();
        fx.write("jobs.json", "original");
        let jobs = fx.state("jobs.json");
        fx.config.update.apply_command = vec![
            "sh".into(),
            "-c".into(),
            format!("echo new > {}", jobs.display()),
        ];
        fx.config.update.health_command = vec!["true".into()];

        let snapshot = fx.updater().apply().await.unwrap();
        assert_eq!(snapshot.label, "pre-update");
        assert_eq!(fx.read("jobs.json").trim(), "new");
    }

    #[tokio::test]
    async fn apply_without_command_is_a_precondition_failure() {
        let fx = Fixture::new();
        let err = fx.updater().apply().await.unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn unknown_or_unsafe_snapshot_ids_are_rejected() {
        let fx = Fixture::new();
        let updater = fx.updater();
        assert!(matches!(
            updater.restore("20260101-000000-nope").unwrap_err(),
            PostboxError::NotFound(_)
        ));
        assert!(matches!(
            updater.load("../escape").unwrap_err(),
            PostboxError::InvalidInput(_)
        ));
        assert!(updater.snapshot("bad label").is_err());
    }
}
