// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types shared by every postbox crate.

use std::path::PathBuf;

use thiserror::Error;

use crate::lifecycle::{QueueState, Trigger};

/// Exit code for a successful command.
pub const EXIT_OK: i32 = 0;
/// Exit code for any failure not covered by a more specific code.
pub const EXIT_FAILURE: i32 = 1;
/// Exit code for command-line usage errors (matches clap).
pub const EXIT_USAGE: i32 = 2;
/// Exit code when another operation of the same kind holds the lock.
pub const EXIT_LOCK_HELD: i32 = 3;
/// Exit code when a required file, job or message is missing.
pub const EXIT_PRECONDITION: i32 = 4;

/// Generic reply shown to external users when something inside postbox fails.
pub const UNAVAILABLE_TEXT: &str =
    "Sorry, the assistant is temporarily unavailable. Please try again in a few minutes.";

/// The primary error type used across the queue, router, supervisor and job crates.
#[derive(Debug, Error)]
pub enum PostboxError {
    /// Filesystem read/write failure: directory missing, permission denied, disk full.
    #[error("store unavailable at {}: {source}", path.display())]
    StoreUnavailable {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A message file exists but cannot be parsed.
    #[error("malformed message {}: {reason}", path.display())]
    MalformedMessage { path: PathBuf, reason: String },

    /// A message ran out of delivery attempts and was dead-lettered.
    #[error("delivery exhausted for {id} after {attempts} attempts")]
    DeliveryExhausted { id: String, attempts: u32 },

    /// An outbound channel adapter could not deliver.
    #[error("channel {channel} unreachable: {message}")]
    ChannelUnreachable { channel: String, message: String },

    /// An agent heartbeat exceeded the stale threshold.
    #[error("agent {agent} stale for {age_secs}s")]
    StaleWorker { agent: String, age_secs: u64 },

    /// Another instance of the same supervisory operation is running.
    #[error("lock {lock} is held by another process")]
    LockContention { lock: String },

    /// A lifecycle transition that the state machine does not allow.
    #[error("illegal transition: {trigger} from {from}")]
    IllegalTransition { from: QueueState, trigger: Trigger },

    /// A required file, job or precondition is missing.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// A message, job or snapshot was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller-supplied input failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration errors detected after loading.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PostboxError {
    /// Wraps an I/O error with the path it concerns.
    pub fn store(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PostboxError::StoreUnavailable {
            path: path.into(),
            source,
        }
    }

    /// Process exit code for CLI-facing tools.
    pub fn exit_code(&self) -> i32 {
        match self {
            PostboxError::LockContention { .. } => EXIT_LOCK_HELD,
            PostboxError::Precondition(_) | PostboxError::NotFound(_) => EXIT_PRECONDITION,
            PostboxError::InvalidInput(_) => EXIT_USAGE,
            _ => EXIT_FAILURE,
        }
    }

    /// Text safe to show to an external user. Internal detail stays in the logs.
    pub fn user_message(&self) -> &'static str {
        UNAVAILABLE_TEXT
    }

    /// Whether the failed operation is worth retrying on a later pass.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PostboxError::StoreUnavailable { .. }
                | PostboxError::ChannelUnreachable { .. }
                | PostboxError::LockContention { .. }
        )
    }
}
