// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-agent heartbeat file.
//!
//! The worker touches it every cycle. The file may be empty (its mtime is
//! the signal) or hold a single epoch-seconds value. The later of the two
//! counts, so a plain `touch` after a recorded beat still refreshes it.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use postbox_core::PostboxError;
use postbox_queue::atomic::write_atomic;

#[derive(Debug, Clone)]
pub struct HeartbeatStore {
    path: PathBuf,
}

impl HeartbeatStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last beat, or `None` when the agent has never written one.
    pub fn last_beat(&self) -> Result<Option<SystemTime>, PostboxError> {
        let meta = match std::fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PostboxError::store(&self.path, e)),
        };
        let modified = meta
            .modified()
            .map_err(|e| PostboxError::store(&self.path, e))?;
        let recorded = std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(|secs| UNIX_EPOCH + Duration::from_secs(secs));
        Ok(Some(recorded.map_or(modified, |t| t.max(modified))))
    }

    /// Age of the last beat at `now`. A beat in the future counts as fresh.
    pub fn age(&self, now: SystemTime) -> Result<Option<Duration>, PostboxError> {
        Ok(self
            .last_beat()?
            .map(|beat| now.duration_since(beat).unwrap_or_default()))
    }

    /// Record a beat at `now`, in both the content and the mtime.
    pub fn touch_at(&self, now: SystemTime) -> Result<(), PostboxError> {
        let secs = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        write_atomic(&self.path, secs.to_string().as_bytes())?;
        std::fs::File::options()
            .write(true)
            .open(&self.path)
            .and_then(|file| file.set_modified(now))
            .map_err(|e| PostboxError::store(&self.path, e))
    }

    pub fn touch(&self) -> Result<(), PostboxError> {
        self.touch_at(SystemTime::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_has_no_age() {
        let dir = tempfile::tempdir().unwrap();
        let hb = HeartbeatStore::new(dir.path().join("main.heartbeat"));
        assert_eq!(hb.age(SystemTime::now()).unwrap(), None);
    }

    #[test]
    fn recorded_beat_sets_content_and_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let hb = HeartbeatStore::new(dir.path().join("main.heartbeat"));
        let now = SystemTime::now();
        hb.touch_at(now - Duration::from_secs(700)).unwrap();
        let age = hb.age(now).unwrap().unwrap();
        assert!(age >= Duration::from_secs(699) && age <= Duration::from_secs(701));
    }

    #[test]
    fn empty_file_uses_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.heartbeat");
        std::fs::write(&path, "").unwrap();
        let old = SystemTime::now() - Duration::from_secs(120);
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(old)
            .unwrap();

        let age = HeartbeatStore::new(&path).age(SystemTime::now()).unwrap().unwrap();
        assert!(age >= Duration::from_secs(119));
    }

    #[test]
    fn plain_touch_refreshes_recorded_beat() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.heartbeat");
        let hb = HeartbeatStore::new(&path);
        let now = SystemTime::now();
        hb.touch_at(now - Duration::from_secs(700)).unwrap();

        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(now)
            .unwrap();
        assert!(hb.age(now).unwrap().unwrap() < Duration::from_secs(1));
    }
}
