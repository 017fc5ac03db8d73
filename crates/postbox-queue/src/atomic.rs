// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Crash-safe file primitives.
//!
//! Every visible file is produced by writing a temporary file in the same
//! directory, syncing it, then renaming it into place. A crash mid-write
//! leaves at most a hidden temporary file that no listing picks up.

use std::io::Write;
use std::path::Path;

use postbox_core::PostboxError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;

/// Result of an idempotent move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The file was renamed from source to destination.
    Moved,
    /// Source was gone but destination exists: an earlier call already moved it.
    AlreadyMoved,
    /// Neither source nor destination exists.
    Missing,
}

/// Create `dir` and its parents.
pub fn ensure_dir(dir: &Path) -> Result<(), PostboxError> {
    std::fs::create_dir_all(dir).map_err(|e| PostboxError::store(dir, e))
}

fn parent_of(path: &Path) -> Result<&Path, PostboxError> {
    path.parent()
        .ok_or_else(|| PostboxError::Internal(format!("{} has no parent", path.display())))
}

fn staged(path: &Path, bytes: &[u8]) -> Result<NamedTempFile, PostboxError> {
    let dir = parent_of(path)?;
    ensure_dir(dir)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".postbox-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| PostboxError::store(dir, e))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| PostboxError::store(tmp.path(), e))?;
    Ok(tmp)
}

/// Atomically write `bytes` to `path`, replacing any existing file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PostboxError> {
    staged(path, bytes)?
        .persist(path)
        .map_err(|e| PostboxError::store(path, e.error))?;
    Ok(())
}

/// Atomically create `path`; fails if it already exists.
pub fn create_atomic(path: &Path, bytes: &[u8]) -> Result<(), PostboxError> {
    staged(path, bytes)?
        .persist_noclobber(path)
        .map_err(|e| PostboxError::store(path, e.error))?;
    Ok(())
}

/// Like [`create_atomic`], but reports an existing file as `Ok(false)`.
/// The file only ever appears with its full contents.
pub fn try_create_atomic(path: &Path, bytes: &[u8]) -> Result<bool, PostboxError> {
    match staged(path, bytes)?.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(PostboxError::store(path, e.error)),
    }
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), PostboxError> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| PostboxError::Internal(format!("serialize {}: {e}", path.display())))?;
    write_atomic(path, &bytes)
}

/// Read and parse a JSON file. Returns `Ok(None)` when it does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PostboxError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PostboxError::store(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| PostboxError::MalformedMessage {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Rename `src` to `dst`, tolerating a move that already happened.
pub fn safe_move(src: &Path, dst: &Path) -> Result<MoveOutcome, PostboxError> {
    ensure_dir(parent_of(dst)?)?;
    match std::fs::rename(src, dst) {
        Ok(()) => Ok(MoveOutcome::Moved),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if dst.exists() {
                Ok(MoveOutcome::AlreadyMoved)
            } else {
                Ok(MoveOutcome::Missing)
            }
        }
        Err(e) => Err(PostboxError::store(src, e)),
    }
}
