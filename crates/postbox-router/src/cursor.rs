// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persisted per-channel poll cursors.
//!
//! One JSON object maps channel name to the highest cursor whose message has
//! been handed to the queue. After a restart the router re-polls strictly
//! after that cursor.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use postbox_core::PostboxError;
use postbox_queue::atomic::{read_json, write_json_atomic};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct CursorStore {
    path: PathBuf,
}

/// Order two cursors: numerically when both are integers, else lexically.
pub fn compare_cursors(a: &str, b: &str) -> Ordering {
    match (a.parse::<u128>(), b.parse::<u128>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

impl CursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `{state_dir}/cursors.json`.
    pub fn in_state_dir(state_dir: &Path) -> Self {
        Self::new(state_dir.join("cursors.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, PostboxError> {
        match read_json(&self.path) {
            Ok(map) => Ok(map.unwrap_or_default()),
            Err(PostboxError::MalformedMessage { reason, .. }) => {
                warn!(path = %self.path.display(), %reason, "cursor file unreadable, re-polling from start");
                Ok(BTreeMap::new())
            }
            Err(e) => Err(e),
        }
    }

    pub fn get(&self, channel: &str) -> Result<Option<String>, PostboxError> {
        Ok(self.load()?.remove(channel))
    }

    /// Move `channel`'s cursor forward. A cursor at or below the stored one is ignored.
    pub fn advance(&self, channel: &str, cursor: &str) -> Result<bool, PostboxError> {
        let mut map = self.load()?;
        if let Some(current) = map.get(channel)
            && compare_cursors(cursor, current) != Ordering::Greater
        {
            return Ok(false);
        }
        map.insert(channel.to_string(), cursor.to_string());
        write_json_atomic(&self.path, &map)?;
        Ok(true)
    }

    pub fn all(&self) -> Result<BTreeMap<String, String>, PostboxError> {
        self.load()
    }
}
