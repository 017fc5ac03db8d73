// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Directory layout of the queue store.
//!
//! The default agent owns the unprefixed directories (`inbox`, `outbox`,
//! ...). Every other agent gets `{agent}-inbox`, `{agent}-outbox`, and so on,
//! side by side under the same base directory.

use std::path::{Path, PathBuf};

use postbox_config::PostboxConfig;
use postbox_config::validation::is_valid_agent_name;
use postbox_core::{PostboxError, QueueState};
use strum::IntoEnumIterator;

use crate::atomic::ensure_dir;

#[derive(Debug, Clone)]
pub struct QueueLayout {
    base: PathBuf,
    default_agent: String,
}

impl QueueLayout {
    pub fn new(base: impl Into<PathBuf>, default_agent: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            default_agent: default_agent.into(),
        }
    }

    pub fn from_config(config: &PostboxConfig) -> Self {
        Self::new(&config.queue.base_dir, &config.queue.default_agent)
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn default_agent(&self) -> &str {
        &self.default_agent
    }

    /// Directory holding `agent`'s messages in `state`.
    pub fn dir(&self, agent: &str, state: QueueState) -> PathBuf {
        if agent == self.default_agent {
            self.base.join(state.dir_name())
        } else {
            self.base.join(format!("{agent}-{}", state.dir_name()))
        }
    }

    /// Create every directory for `agent`. Directories are never removed.
    pub fn ensure(&self, agent: &str) -> Result<(), PostboxError> {
        check_agent(agent)?;
        for state in QueueState::iter() {
            ensure_dir(&self.dir(agent, state))?;
        }
        ensure_dir(&self.ledger_dir())
    }

    pub(crate) fn ledger_dir(&self) -> PathBuf {
        self.base.join(".attempts")
    }

    /// Per-agent delivery attempt counters.
    pub fn ledger_path(&self, agent: &str) -> PathBuf {
        self.ledger_dir().join(format!("{agent}.json"))
    }

    pub fn audit_path(&self) -> PathBuf {
        self.base.join("audit.jsonl")
    }
}

/// Reject agent names that would escape the base directory.
pub fn check_agent(agent: &str) -> Result<(), PostboxError> {
    if is_valid_agent_name(agent) {
        Ok(())
    } else {
        Err(PostboxError::InvalidInput(format!(
            "invalid agent name `{agent}`"
        )))
    }
}
