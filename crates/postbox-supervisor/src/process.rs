// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Recorded process handles and the OS process control seam.
//!
//! A worker is identified by the handle written when it was launched:
//! pid, process group and kernel start time. A pid alone is not enough,
//! since the kernel recycles them; a handle is live only while the pid
//! exists *and* reports the recorded start time.

use std::fs::OpenOptions;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use postbox_config::model::AgentConfig;
use postbox_core::PostboxError;
use postbox_queue::atomic::{read_json, write_json_atomic};
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

/// Interval between liveness polls while waiting for a group to exit.
const STOP_POLL: Duration = Duration::from_millis(200);

/// What was started for an agent, persisted as `{agent}.handle.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessHandle {
    pub pid: u32,
    /// Process group; equals `pid` because workers lead their own group.
    pub pgid: u32,
    /// Kernel start time in seconds since the epoch, 0 when unknown.
    pub start_time: u64,
    pub command: Vec<String>,
    pub started_at: DateTime<Utc>,
}

/// Reads and writes one agent's handle file.
#[derive(Debug, Clone)]
pub struct HandleStore {
    path: PathBuf,
}

impl HandleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_agent(state_dir: &Path, agent: &str) -> Self {
        Self::new(state_dir.join(format!("{agent}.handle.json")))
    }

    pub fn load(&self) -> Result<Option<ProcessHandle>, PostboxError> {
        match read_json(&self.path) {
            Ok(handle) => Ok(handle),
            Err(PostboxError::MalformedMessage { reason, .. }) => {
                warn!(path = %self.path.display(), reason = %reason, "ignoring unreadable process handle");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn save(&self, handle: &ProcessHandle) -> Result<(), PostboxError> {
        write_json_atomic(&self.path, handle)
    }

    pub fn clear(&self) -> Result<(), PostboxError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PostboxError::store(&self.path, e)),
        }
    }
}

/// Starts, probes and stops worker processes.
///
/// The supervisor and the injector only talk to this trait, so tests can
/// swap in a recording fake and never fork anything.
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Whether the process behind `handle` is still the one we started.
    fn is_alive(&self, handle: &ProcessHandle) -> bool;

    /// Start `agent` in its own process group, output appended to `log_path`.
    async fn launch(&self, agent: &AgentConfig, log_path: &Path)
    -> Result<ProcessHandle, PostboxError>;

    /// SIGTERM the handle's group, then SIGKILL whatever survives `grace`.
    async fn stop(&self, handle: &ProcessHandle, grace: Duration) -> Result<(), PostboxError>;

    /// SIGKILL every remaining member of a process group.
    fn kill_group(&self, pgid: u32) -> Result<(), PostboxError>;
}

/// `ProcessControl` backed by real fork/exec and signals.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsProcessControl;

impl OsProcessControl {
    pub fn new() -> Self {
        Self
    }
}

/// Kernel start time of `pid`, or `None` if it does not exist.
pub fn process_start_time(pid: u32) -> Option<u64> {
    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    sys.process(pid).map(|p| p.start_time())
}

/// Reap `pid` if it is an exited child of ours. No-op otherwise.
fn reap(pid: u32) {
    let Ok(raw) = i32::try_from(pid) else { return };
    // SAFETY: WNOHANG never blocks; a null status pointer is allowed.
    unsafe {
        libc::waitpid(raw, std::ptr::null_mut(), libc::WNOHANG);
    }
}

fn pid_exists(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 performs the permission and existence check only.
    if unsafe { libc::kill(raw, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Send `signal` to every member of group `pgid`. A vanished group is success.
fn signal_group(pgid: u32, signal: libc::c_int) -> Result<bool, PostboxError> {
    let raw = i32::try_from(pgid)
        .map_err(|_| PostboxError::InvalidInput(format!("process group {pgid} out of range")))?;
    // Never signal init or our own group.
    // SAFETY: getpgrp has no preconditions.
    if raw <= 1 || raw == unsafe { libc::getpgrp() } {
        return Err(PostboxError::Precondition(format!(
            "refusing to signal process group {pgid}"
        )));
    }
    // SAFETY: kill with a negative pid targets the process group.
    if unsafe { libc::kill(-raw, signal) } == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(false);
    }
    Err(PostboxError::Internal(format!(
        "signal {signal} to process group {pgid}: {err}"
    )))
}

#[async_trait]
impl ProcessControl for OsProcessControl {
    fn is_alive(&self, handle: &ProcessHandle) -> bool {
        reap(handle.pid);
        if !pid_exists(handle.pid) {
            return false;
        }
        if handle.start_time == 0 {
            return true;
        }
        match process_start_time(handle.pid) {
            Some(started) => started == handle.start_time,
            None => true,
        }
    }

    async fn launch(
        &self,
        agent: &AgentConfig,
        log_path: &Path,
    ) -> Result<ProcessHandle, PostboxError> {
        let (program, args) = agent.start_command.split_first().ok_or_else(|| {
            PostboxError::Precondition(format!("agent `{}` has no start_command", agent.name))
        })?;

        if let Some(dir) = log_path.parent() {
            postbox_queue::atomic::ensure_dir(dir)?;
        }
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .map_err(|e| PostboxError::store(log_path, e))?;
        let log_err = log.try_clone().map_err(|e| PostboxError::store(log_path, e))?;

        let child = Command::new(program)
            .args(args)
            .current_dir(&agent.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .process_group(0)
            .spawn()
            .map_err(|e| PostboxError::Internal(format!("failed to start `{program}`: {e}")))?;

        let pid = child.id();
        let handle = ProcessHandle {
            pid,
            pgid: pid,
            start_time: process_start_time(pid).unwrap_or(0),
            command: agent.start_command.clone(),
            started_at: Utc::now(),
        };
        info!(agent = %agent.name, pid, "worker launched");
        Ok(handle)
    }

    async fn stop(&self, handle: &ProcessHandle, grace: Duration) -> Result<(), PostboxError> {
        if !self.is_alive(handle) {
            debug!(pid = handle.pid, "worker already gone");
            return Ok(());
        }
        if !signal_group(handle.pgid, libc::SIGTERM)? {
            return Ok(());
        }

        let deadline = tokio::time::Instant::now() + grace;
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(STOP_POLL).await;
            if !self.is_alive(handle) {
                debug!(pid = handle.pid, "worker exited after SIGTERM");
                return Ok(());
            }
        }

        warn!(pid = handle.pid, grace_secs = grace.as_secs(), "worker ignored SIGTERM, sending SIGKILL");
        signal_group(handle.pgid, libc::SIGKILL)?;
        reap(handle.pid);
        Ok(())
    }

    fn kill_group(&self, pgid: u32) -> Result<(), PostboxError> {
        if signal_group(pgid, libc::SIGKILL)? {
            info!(pgid, "killed orphaned process group");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(dir: &Path, command: &[&str]) -> AgentConfig {
        AgentConfig {
            name: "main".into(),
            workspace: dir.to_path_buf(),
            start_command: command.iter().map(|s| s.to_string()).collect(),
            heartbeat_file: None,
            supervise: true,
        }
    }

    #[test]
    fn handle_store_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = HandleStore::for_agent(dir.path(), "ops");
        assert_eq!(store.load().unwrap(), None);

        let handle = ProcessHandle {
            pid: 4242,
            pgid: 4242,
            start_time: 1_700_000_000,
            command: vec!["worker".into()],
            started_at: Utc::now(),
        };
        store.save(&handle).unwrap();
        assert!(dir.path().join("ops.handle.json").exists());
        assert_eq!(store.load().unwrap(), Some(handle));

        store.clear().unwrap();
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn recycled_pid_is_not_alive() {
        let ours = ProcessHandle {
            pid: std::process::id(),
            pgid: std::process::id(),
            start_time: process_start_time(std::process::id()).unwrap_or(1) + 1,
            command: vec![],
            started_at: Utc::now(),
        };
        assert!(!OsProcessControl.is_alive(&ours));
    }

    #[tokio::test]
    async fn launch_and_stop_a_real_group() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("main.log");
        let control = OsProcessControl::new();

        let handle = control
            .launch(&agent(dir.path(), &["sleep", "30"]), &log)
            .await
            .unwrap();
        assert_eq!(handle.pid, handle.pgid);
        assert!(control.is_alive(&handle));

        control.stop(&handle, Duration::from_secs(5)).await.unwrap();
        assert!(!control.is_alive(&handle));
        assert!(log.exists());
    }

    #[tokio::test]
    async fn empty_start_command_is_a_precondition_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = OsProcessControl
            .launch(&agent(dir.path(), &[]), &dir.path().join("x.log"))
            .await
            .unwrap_err();
        assert!(matches!(err, PostboxError::Precondition(_)));
    }

    #[test]
    fn refuses_to_signal_own_group() {
        // SAFETY: getpgrp has no preconditions.
        let own = unsafe { libc::getpgrp() } as u32;
        assert!(OsProcessControl.kill_group(own).is_err());
    }
}
