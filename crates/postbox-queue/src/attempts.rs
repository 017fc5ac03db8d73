// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-agent delivery attempt ledger.
//!
//! Message files are never rewritten while they are live, so redelivery
//! counters, retry deadlines and the last error live here instead, keyed by
//! message id. Only the single consumer of a queue writes its ledger.
//!
//! An unreadable ledger is moved aside to `<ledger>.corrupt` and the reset
//! is recorded in the audit trail, so counts lost with it can be recovered
//! by hand.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use postbox_core::{Message, MessageId, PostboxError};
use serde::{Deserialize, Serialize};

use crate::atomic::{read_json, write_json_atomic};
use crate::audit::AuditLog;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AttemptLedger {
    path: PathBuf,
    audit: Option<(AuditLog, String)>,
}

impl AttemptLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            audit: None,
        }
    }

    /// Report ledger resets for `agent` to `audit`.
    pub fn with_audit(mut self, audit: AuditLog, agent: &str) -> Self {
        self.audit = Some((audit, agent.to_string()));
        self
    }

    /// Where an unreadable ledger is moved.
    pub fn corrupt_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".corrupt");
        PathBuf::from(name)
    }

    fn load(&self) -> Result<BTreeMap<String, AttemptRecord>, PostboxError> {
        match read_json(&self.path) {
            Ok(records) => Ok(records.unwrap_or_default()),
            Err(PostboxError::MalformedMessage { reason, .. }) => {
                self.set_aside(&reason)?;
                Ok(BTreeMap::new())
            }
            Err(e) => Err(e),
        }
    }

    fn set_aside(&self, reason: &str) -> Result<(), PostboxError> {
        let target = self.corrupt_path();
        match std::fs::rename(&self.path, &target) {
            Ok(()) => {}
            // Another reader already moved it.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(PostboxError::store(&self.path, e)),
        }
        tracing::warn!(
            path = %self.path.display(),
            moved_to = %target.display(),
            %reason,
            "attempt ledger unreadable, attempt counts reset"
        );
        if let Some((audit, agent)) = &self.audit {
            audit.record(
                "ledger_reset",
                agent,
                "",
                serde_json::json!({ "reason": reason, "moved_to": target }),
            );
        }
        Ok(())
    }

    fn save(&self, records: &BTreeMap<String, AttemptRecord>) -> Result<(), PostboxError> {
        write_json_atomic(&self.path, records)
    }

    pub fn get(&self, id: &MessageId) -> Result<AttemptRecord, PostboxError> {
        Ok(self.load()?.remove(id.as_str()).unwrap_or_default())
    }

    /// Count one more failed attempt and return the updated record.
    pub fn record_failure(
        &self,
        id: &MessageId,
        error: &str,
        retry_at: impl FnOnce(u32) -> Option<DateTime<Utc>>,
    ) -> Result<AttemptRecord, PostboxError> {
        let mut records = self.load()?;
        let record = records.entry(id.0.clone()).or_default();
        record.attempts += 1;
        record.last_error = Some(error.to_string());
        record.retry_at = retry_at(record.attempts);
        let updated = record.clone();
        self.save(&records)?;
        Ok(updated)
    }

    pub fn clear(&self, id: &MessageId) -> Result<(), PostboxError> {
        let mut records = self.load()?;
        if records.remove(id.as_str()).is_some() {
            self.save(&records)?;
        }
        Ok(())
    }

    /// Copy ledger state onto a message read from a live directory.
    pub fn apply(&self, msg: &mut Message) -> Result<(), PostboxError> {
        let record = self.get(&msg.id)?;
        msg.attempt_count = record.attempts;
        msg.retry_at = record.retry_at;
        msg.last_error = record.last_error;
        Ok(())
    }
}
