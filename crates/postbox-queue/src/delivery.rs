// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delivery manager: enqueue, peek, acknowledge, retry and dead-letter.
//!
//! Delivery is at-least-once. `dequeue_batch` never removes anything, so a
//! consumer that crashes between reading and acknowledging sees the same
//! messages again on restart. Acknowledgment is an idempotent move.

use std::time::Duration;

use chrono::{DateTime, Utc};
use postbox_config::PostboxConfig;
use postbox_core::{Message, MessageId, PostboxError, QueueState, Trigger};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::attempts::AttemptLedger;
use crate::audit::AuditLog;
use crate::id::next_id;
use crate::layout::QueueLayout;
use crate::store::{QueueStore, Transitioned};

/// Retry and dead-letter policy.
#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    /// Failed attempts after which a message is dead-lettered.
    pub max_attempts: u32,
    /// First backoff delay; doubles with every further attempt.
    pub retry_base_delay: Duration,
    /// Age after which a claimed message is considered abandoned.
    pub stale_processing: Duration,
    pub max_reply_len: usize,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_base_delay: Duration::from_secs(60),
            stale_processing: Duration::from_secs(300),
            max_reply_len: 4096,
        }
    }
}

impl DeliveryPolicy {
    pub fn from_config(config: &PostboxConfig) -> Self {
        Self {
            max_attempts: config.queue.max_attempts,
            retry_base_delay: Duration::from_secs(config.queue.retry_base_delay_secs),
            stale_processing: Duration::from_secs(config.queue.stale_processing_secs),
            max_reply_len: config.queue.max_reply_len,
        }
    }

    /// Backoff before retry number `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.retry_base_delay.saturating_mul(1 << exp)
    }
}

/// What `mark_failed` did with the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FailOutcome {
    /// Left in the inbox for a later retry.
    Retrying { attempts: u32 },
    /// Parked in `failed` until `retry_at`.
    Deferred {
        attempts: u32,
        retry_at: DateTime<Utc>,
    },
    /// Retry budget spent; moved to dead-letter.
    DeadLettered { attempts: u32 },
}

pub struct DeliveryManager {
    pub(crate) store: QueueStore,
    pub(crate) policy: DeliveryPolicy,
    pub(crate) audit: Option<AuditLog>,
    /// Agents that own queues. Empty means any valid name is accepted.
    pub(crate) agents: Vec<String>,
    /// Channel names replies may be addressed to, beyond the built-in ones.
    pub(crate) channels: Vec<String>,
}

impl DeliveryManager {
    pub fn new(layout: QueueLayout, policy: DeliveryPolicy) -> Self {
        Self {
            store: QueueStore::new(layout),
            policy,
            audit: None,
            agents: Vec::new(),
            channels: Vec::new(),
        }
    }

    pub fn from_config(config: &PostboxConfig) -> Self {
        let layout = QueueLayout::from_config(config);
        let audit = config
            .queue
            .audit
            .then(|| AuditLog::new(layout.audit_path()));
        Self {
            store: QueueStore::new(layout),
            policy: DeliveryPolicy::from_config(config),
            audit,
            agents: config.queue_agents(),
            channels: config.router.channels.iter().map(|c| c.name.clone()).collect(),
        }
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_agents(mut self, agents: Vec<String>) -> Self {
        self.agents = agents;
        self
    }

    pub fn with_channels(mut self, channels: Vec<String>) -> Self {
        self.channels = channels;
        self
    }

    pub fn store(&self) -> &QueueStore {
        &self.store
    }

    pub fn policy(&self) -> &DeliveryPolicy {
        &self.policy
    }

    pub fn agents(&self) -> &[String] {
        &self.agents
    }

    pub(crate) fn ledger(&self, agent: &str) -> AttemptLedger {
        let ledger = AttemptLedger::new(self.store.layout().ledger_path(agent));
        match &self.audit {
            Some(audit) => ledger.with_audit(audit.clone(), agent),
            None => ledger,
        }
    }

    pub(crate) fn audit(&self, action: &str, agent: &str, id: &MessageId, details: serde_json::Value) {
        if let Some(audit) = &self.audit {
            audit.record(action, agent, id.as_str(), details);
        }
    }

    pub(crate) fn check_known_agent(&self, agent: &str) -> Result<(), PostboxError> {
        if self.agents.is_empty() || self.agents.iter().any(|a| a == agent) {
            Ok(())
        } else {
            Err(PostboxError::NotFound(format!("agent `{agent}` has no queue")))
        }
    }

    /// Write a new message into `agent`'s inbox and return its id.
    ///
    /// Fails with `StoreUnavailable` when the inbox cannot be written; the
    /// caller must retry or surface the failure upstream.
    pub fn enqueue(&self, agent: &str, mut msg: Message) -> Result<MessageId, PostboxError> {
        self.check_known_agent(agent)?;
        if msg.id.as_str().is_empty() {
            msg.id = next_id();
        }
        msg.attempt_count = 0;
        msg.retry_at = None;
        msg.last_error = None;
        msg.dead_letter_reason = None;

        self.store.insert(agent, QueueState::Inbox, &msg)?;
        debug!(agent, id = %msg.id, source = %msg.source, kind = %msg.kind, "enqueued");
        self.audit(
            "enqueue",
            agent,
            &msg.id,
            json!({"source": msg.source, "kind": msg.kind, "chat_id": msg.chat_id}),
        );
        Ok(msg.id)
    }

    /// Peek at up to `limit` pending messages, oldest first.
    ///
    /// Nothing is removed. Files that fail to parse are quarantined to
    /// dead-letter so one bad file never blocks the rest of the queue.
    pub fn dequeue_batch(&self, agent: &str, limit: usize) -> Result<Vec<Message>, PostboxError> {
        self.dequeue_from(agent, limit, None)
    }

    /// [`dequeue_batch`](Self::dequeue_batch) restricted to one source
    /// channel when `source` is set.
    pub fn dequeue_from(
        &self,
        agent: &str,
        limit: usize,
        source: Option<&str>,
    ) -> Result<Vec<Message>, PostboxError> {
        let ledger = self.ledger(agent);
        let mut batch = Vec::new();
        for path in self.store.list(agent, QueueState::Inbox)? {
            if batch.len() >= limit {
                break;
            }
            match self.store.read(&path) {
                Ok(msg) if source.is_some_and(|s| s != msg.source) => {}
                Ok(mut msg) => {
                    ledger.apply(&mut msg)?;
                    batch.push(msg);
                }
                Err(PostboxError::MalformedMessage { path, reason }) => {
                    self.quarantine(agent, &path, &reason);
                }
                // Consumed between listing and reading.
                Err(PostboxError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(batch)
    }

    /// Peek without quarantining; malformed files are skipped.
    pub fn peek(&self, agent: &str, state: QueueState, limit: usize) -> Result<Vec<Message>, PostboxError> {
        let ledger = self.ledger(agent);
        let mut out = Vec::new();
        for path in self.store.list(agent, state)? {
            if out.len() >= limit {
                break;
            }
            match self.store.read(&path) {
                Ok(mut msg) => {
                    if !state.is_terminal() {
                        ledger.apply(&mut msg)?;
                    }
                    out.push(msg);
                }
                Err(PostboxError::MalformedMessage { path, reason }) => {
                    debug!(path = %path.display(), %reason, "skipping malformed message");
                }
                Err(PostboxError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    pub(crate) fn quarantine(&self, agent: &str, path: &std::path::Path, reason: &str) {
        let Some(id) = crate::store::id_from_path(path) else {
            return;
        };
        warn!(agent, %id, %reason, "quarantining malformed message");
        match self.store.transition(agent, &id, Trigger::Quarantine) {
            Ok(_) => self.audit("quarantine", agent, &id, json!({"reason": reason})),
            Err(e) => warn!(agent, %id, error = %e, "quarantine failed"),
        }
    }

    /// Claim a pending message (inbox to processing).
    pub fn mark_processing(&self, agent: &str, id: &MessageId) -> Result<(), PostboxError> {
        match self.store.transition(agent, id, Trigger::Claim)? {
            Transitioned::Moved { path, .. } => {
                touch(&path);
                self.audit("processing", agent, id, serde_json::Value::Null);
                Ok(())
            }
            Transitioned::AlreadyThere { .. } => Ok(()),
            Transitioned::Missing => Err(PostboxError::NotFound(format!("message {id}"))),
        }
    }

    /// Acknowledge a message. Returns `false` when it had already been
    /// acknowledged or no longer exists; that is not an error.
    pub fn mark_processed(&self, agent: &str, id: &MessageId) -> Result<bool, PostboxError> {
        let outcome = match self.store.transition(agent, id, Trigger::Ack) {
            Ok(outcome) => outcome,
            // Already taken out of the pending set by a final failure.
            Err(PostboxError::IllegalTransition {
                from: from @ (QueueState::DeadLetter | QueueState::Failed),
                ..
            }) => {
                debug!(agent, %id, state = %from, "ack for message no longer pending");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        let moved = matches!(outcome, Transitioned::Moved { .. });
        if moved {
            self.ledger(agent).clear(id)?;
            self.audit("processed", agent, id, serde_json::Value::Null);
        }
        Ok(moved)
    }

    /// Record a failed handling attempt.
    ///
    /// The message stays in the inbox for redelivery until its attempt count
    /// reaches `max_attempts`; then it is moved to dead-letter with `reason`.
    pub fn mark_failed(
        &self,
        agent: &str,
        id: &MessageId,
        reason: &str,
    ) -> Result<FailOutcome, PostboxError> {
        let (state, _) = self
            .store
            .locate(agent, id, &[QueueState::Inbox, QueueState::Processing])
            .ok_or_else(|| PostboxError::NotFound(format!("pending message {id}")))?;

        let record = self.ledger(agent).record_failure(id, reason, |_| None)?;
        if record.attempts >= self.policy.max_attempts {
            return self.dead_letter(agent, id, record.attempts, reason);
        }

        if state == QueueState::Processing {
            self.store.transition(agent, id, Trigger::Release)?;
        }
        info!(agent, %id, attempts = record.attempts, "delivery failed, will retry");
        self.audit(
            "failed",
            agent,
            id,
            json!({"attempts": record.attempts, "reason": reason}),
        );
        Ok(FailOutcome::Retrying {
            attempts: record.attempts,
        })
    }

    /// Record a failure and park the message in `failed` with exponential backoff.
    pub fn fail_with_backoff(
        &self,
        agent: &str,
        id: &MessageId,
        error: &str,
    ) -> Result<FailOutcome, PostboxError> {
        if self
            .store
            .locate(agent, id, &[QueueState::Inbox, QueueState::Processing])
            .is_none()
        {
            return Err(PostboxError::NotFound(format!("pending message {id}")));
        }

        let max = self.policy.max_attempts;
        let policy = self.policy.clone();
        let record = self.ledger(agent).record_failure(id, error, |attempts| {
            (attempts < max).then(|| {
                let delay = chrono::Duration::from_std(policy.backoff(attempts))
                    .unwrap_or_else(|_| chrono::Duration::days(365));
                Utc::now() + delay
            })
        })?;

        match record.retry_at {
            None => self.dead_letter(agent, id, record.attempts, error),
            Some(retry_at) => {
                self.store.transition(agent, id, Trigger::Defer)?;
                info!(agent, %id, attempts = record.attempts, %retry_at, "deferred for retry");
                self.audit(
                    "deferred",
                    agent,
                    id,
                    json!({"attempts": record.attempts, "retry_at": retry_at, "error": error}),
                );
                Ok(FailOutcome::Deferred {
                    attempts: record.attempts,
                    retry_at,
                })
            }
        }
    }

    fn dead_letter(
        &self,
        agent: &str,
        id: &MessageId,
        attempts: u32,
        reason: &str,
    ) -> Result<FailOutcome, PostboxError> {
        if let Transitioned::Moved { path, .. } | Transitioned::AlreadyThere { path, .. } =
            self.store.transition(agent, id, Trigger::Exhaust)?
        {
            let mut msg = self.store.read(&path)?;
            msg.attempt_count = attempts;
            msg.last_error = Some(reason.to_string());
            msg.dead_letter_reason = Some(
                PostboxError::DeliveryExhausted {
                    id: id.to_string(),
                    attempts,
                }
                .to_string(),
            );
            self.store.annotate(&path, &msg)?;
        }
        self.ledger(agent).clear(id)?;
        warn!(agent, %id, attempts, %reason, "message dead-lettered");
        self.audit(
            "dead_letter",
            agent,
            id,
            json!({"attempts": attempts, "reason": reason}),
        );
        Ok(FailOutcome::DeadLettered { attempts })
    }

    /// Explicitly send a dead-lettered message back to the inbox with a fresh budget.
    pub fn requeue_dead_letter(&self, agent: &str, id: &MessageId) -> Result<(), PostboxError> {
        let (_, path) = self
            .store
            .locate(agent, id, &[QueueState::DeadLetter])
            .ok_or_else(|| PostboxError::NotFound(format!("dead-lettered message {id}")))?;

        // Clear the annotations while the file is still parked.
        if let Ok(mut msg) = self.store.read(&path) {
            msg.attempt_count = 0;
            msg.last_error = None;
            msg.retry_at = None;
            msg.dead_letter_reason = None;
            self.store.annotate(&path, &msg)?;
        }
        self.store.transition(agent, id, Trigger::Requeue)?;
        self.ledger(agent).clear(id)?;
        info!(agent, %id, "dead-lettered message requeued");
        self.audit("requeue", agent, id, serde_json::Value::Null);
        Ok(())
    }
}

/// Refresh a file's mtime so stale-claim detection measures time since claim.
pub(crate) fn touch(path: &std::path::Path) {
    let result = std::fs::File::options()
        .write(true)
        .open(path)
        .and_then(|f| f.set_modified(std::time::SystemTime::now()));
    if let Err(e) = result {
        debug!(path = %path.display(), error = %e, "could not refresh mtime");
    }
}
