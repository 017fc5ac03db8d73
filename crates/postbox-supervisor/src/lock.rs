// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Exclusive operation lock backed by a pid file.
//!
//! Supervisor passes, injector passes and job runs each take one so two
//! overlapping invocations of the same operation never race. A lock left
//! behind by a dead process is reclaimed.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use postbox_core::PostboxError;
use postbox_queue::atomic::try_create_atomic;
use tracing::{debug, warn};

/// An unreadable lock younger than this is assumed to belong to a live
/// holder that has not finished writing it.
const UNREADABLE_GRACE: Duration = Duration::from_secs(10);

/// Held lock; the file is removed on drop.
#[derive(Debug)]
pub struct OpLock {
    path: PathBuf,
    name: String,
}

impl OpLock {
    /// Take `{dir}/{name}.lock`, failing with `LockContention` while a live
    /// process holds it.
    pub fn acquire(dir: &Path, name: &str) -> Result<Self, PostboxError> {
        postbox_queue::atomic::ensure_dir(dir)?;
        let path = dir.join(format!("{name}.lock"));
        let pid = std::process::id().to_string();

        // Second round only happens after reclaiming a stale lock.
        for _ in 0..2 {
            if try_create_atomic(&path, pid.as_bytes())? {
                debug!(lock = %name, "lock acquired");
                return Ok(Self {
                    path,
                    name: name.to_string(),
                });
            }
            if is_held(&path) {
                return Err(PostboxError::LockContention {
                    lock: name.to_string(),
                });
            }
            warn!(lock = %name, "reclaiming stale lock");
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(PostboxError::store(&path, e)),
            }
        }
        Err(PostboxError::LockContention {
            lock: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for OpLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(lock = %self.name, error = %e, "failed to release lock");
        }
    }
}

fn holder(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn is_held(path: &Path) -> bool {
    match holder(path) {
        Some(pid) => pid_is_running(pid),
        None => std::fs::metadata(path)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
            .is_some_and(|age| age < UNREADABLE_GRACE),
    }
}

fn pid_is_running(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 only checks for existence.
    unsafe { libc::kill(raw, 0) == 0 }
}
