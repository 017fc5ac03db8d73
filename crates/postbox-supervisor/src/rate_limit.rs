// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Last-injection timestamp for the self-check rate limit.
//!
//! The file holds a single integer: epoch seconds of the last successful
//! injection. Anything unreadable counts as "never".

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use postbox_core::PostboxError;
use postbox_queue::atomic::write_atomic;

#[derive(Debug, Clone)]
pub struct RateLimitStore {
    path: PathBuf,
}

impl RateLimitStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn last(&self) -> Option<SystemTime> {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
    }

    /// Time since the last injection, `None` if there never was one.
    pub fn elapsed(&self, now: SystemTime) -> Option<Duration> {
        self.last()
            .map(|last| now.duration_since(last).unwrap_or_default())
    }

    pub fn record(&self, at: SystemTime) -> Result<(), PostboxError> {
        let secs = at.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        write_atomic(&self.path, secs.to_string().as_bytes())
    }
}
