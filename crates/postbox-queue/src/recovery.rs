// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Recovery sweeps: abandoned claims and elapsed retry backoffs.

use std::time::SystemTime;

use chrono::Utc;
use postbox_core::{PostboxError, QueueState, Trigger};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::delivery::DeliveryManager;
use crate::store::{id_from_path, Transitioned};

/// Counts from one recovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub released: usize,
    pub retried: usize,
}

impl DeliveryManager {
    /// Hand claims older than the stale threshold back to the inbox.
    pub fn recover_stale_processing(&self, agent: &str) -> Result<usize, PostboxError> {
        let now = SystemTime::now();
        let mut released = 0;
        for path in self.store.list(agent, QueueState::Processing)? {
            let Some(id) = id_from_path(&path) else {
                continue;
            };
            let modified = match std::fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(_) => continue,
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age < self.policy.stale_processing {
                continue;
            }
            if let Transitioned::Moved { .. } = self.store.transition(agent, &id, Trigger::Release)? {
                warn!(agent, %id, age_secs = age.as_secs(), "released stale claim");
                self.audit("release", agent, &id, json!({"age_secs": age.as_secs()}));
                released += 1;
            }
        }
        Ok(released)
    }

    /// Move parked messages whose backoff has elapsed back to the inbox.
    pub fn recover_due_retries(&self, agent: &str) -> Result<usize, PostboxError> {
        let ledger = self.ledger(agent);
        let now = Utc::now();
        let mut retried = 0;
        for path in self.store.list(agent, QueueState::Failed)? {
            let Some(id) = id_from_path(&path) else {
                continue;
            };
            // A parked file without a deadline has nothing to wait for.
            let due = ledger.get(&id)?.retry_at.is_none_or(|at| at <= now);
            if !due {
                continue;
            }
            if let Transitioned::Moved { .. } = self.store.transition(agent, &id, Trigger::Retry)? {
                info!(agent, %id, "retry due, back in inbox");
                self.audit("retry", agent, &id, serde_json::Value::Null);
                retried += 1;
            }
        }
        Ok(retried)
    }

    /// Run both sweeps for one agent.
    pub fn recover(&self, agent: &str) -> Result<RecoveryReport, PostboxError> {
        Ok(RecoveryReport {
            released: self.recover_stale_processing(agent)?,
            retried: self.recover_due_retries(agent)?,
        })
    }

    /// Run both sweeps for every known agent. One agent's failure does not stop the rest.
    pub fn recover_all(&self) -> RecoveryReport {
        let mut agents = self.agents.clone();
        if agents.is_empty() {
            agents.push(self.store.layout().default_agent().to_string());
        }
        let mut total = RecoveryReport::default();
        for agent in &agents {
            match self.recover(agent) {
                Ok(report) => {
                    total.released += report.released;
                    total.retried += report.retried;
                }
                Err(e) => warn!(agent = %agent, error = %e, "recovery sweep failed"),
            }
        }
        total
    }
}
