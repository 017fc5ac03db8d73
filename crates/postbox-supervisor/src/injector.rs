// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Self-check injector.
//!
//! Nudges an idle worker by enqueueing a `self_check` message, guarded so
//! that nudges never pile up: the worker must be running, no earlier nudge
//! may still be waiting in the inbox, and the last one must be at least
//! `min_interval` old. Every failure is logged and swallowed; the next pass
//! tries again.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use postbox_config::PostboxConfig;
use postbox_core::{Message, MessageId, MessageKind, PostboxError, QueueState};
use postbox_queue::DeliveryManager;
use postbox_queue::store::has_kind_suffix;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::lock::OpLock;
use crate::process::{HandleStore, ProcessControl};
use crate::rate_limit::RateLimitStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InjectOutcome {
    Injected { id: MessageId },
    SkippedNotRunning,
    SkippedPending,
    SkippedRateLimited { elapsed_secs: u64 },
    Failed { reason: String },
}

pub struct SelfCheckInjector {
    manager: Arc<DeliveryManager>,
    control: Arc<dyn ProcessControl>,
    state_dir: PathBuf,
    agents: Vec<String>,
    min_interval: Duration,
    interval: Duration,
    sender: String,
    text: String,
}

impl SelfCheckInjector {
    pub fn from_config(
        config: &PostboxConfig,
        manager: Arc<DeliveryManager>,
        control: Arc<dyn ProcessControl>,
    ) -> Self {
        let sc = &config.self_check;
        let agents = if sc.agents.is_empty() {
            config.agents.iter().map(|a| a.name.clone()).collect()
        } else {
            sc.agents.clone()
        };
        Self {
            manager,
            control,
            state_dir: config.state_dir(),
            agents,
            min_interval: Duration::from_secs(sc.min_interval_secs),
            interval: Duration::from_secs(sc.interval_secs),
            sender: sc.sender.clone(),
            text: sc.text.clone(),
        }
    }

    fn rate_limit(&self, agent: &str) -> RateLimitStore {
        RateLimitStore::new(self.state_dir.join(format!("{agent}.self_check")))
    }

    /// Run the guard sequence for one agent and inject if it passes.
    pub fn inject(&self, agent: &str, now: SystemTime) -> InjectOutcome {
        match self.try_inject(agent, now) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(agent = %agent, error = %e, "self-check injection failed");
                InjectOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn try_inject(&self, agent: &str, now: SystemTime) -> Result<InjectOutcome, PostboxError> {
        let running = HandleStore::for_agent(&self.state_dir, agent)
            .load()?
            .is_some_and(|h| self.control.is_alive(&h));
        if !running {
            debug!(agent = %agent, "worker not running, no self-check");
            return Ok(InjectOutcome::SkippedNotRunning);
        }

        let pending = self
            .manager
            .store()
            .list(agent, QueueState::Inbox)?
            .iter()
            .any(|p| has_kind_suffix(p, MessageKind::SelfCheck));
        if pending {
            debug!(agent = %agent, "previous self-check still unread");
            return Ok(InjectOutcome::SkippedPending);
        }

        let limiter = self.rate_limit(agent);
        if let Some(elapsed) = limiter.elapsed(now)
            && elapsed < self.min_interval
        {
            debug!(agent = %agent, elapsed_secs = elapsed.as_secs(), "self-check rate limited");
            return Ok(InjectOutcome::SkippedRateLimited {
                elapsed_secs: elapsed.as_secs(),
            });
        }

        let msg = Message::text(&self.sender, &self.text).with_kind(MessageKind::SelfCheck);
        let id = self.manager.enqueue(agent, msg)?;
        limiter.record(now)?;
        info!(agent = %agent, id = %id, "self-check injected");
        Ok(InjectOutcome::Injected { id })
    }

    /// One injector pass over all configured agents, under the `self-check` lock.
    pub fn run_pass(&self, now: SystemTime) -> Result<Vec<(String, InjectOutcome)>, PostboxError> {
        let _lock = OpLock::acquire(&self.state_dir, "self-check")?;
        Ok(self
            .agents
            .iter()
            .map(|agent| (agent.clone(), self.inject(agent, now)))
            .collect())
    }

    /// Run passes every `self_check.interval_secs` until cancelled.
    pub async fn run(&self, cancel: &CancellationToken) {
        info!(agents = self.agents.len(), "self-check injector started");
        postbox_queue::run_every(self.interval, cancel, || async move {
            if let Err(e) = self.run_pass(SystemTime::now()) {
                warn!(error = %e, "self-check pass skipped");
            }
        })
        .await;
        info!("self-check injector stopped");
    }
}
