// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Point-in-time status of every agent: heartbeat, process and queue.

use std::time::{Duration, SystemTime};

use postbox_config::PostboxConfig;
use postbox_core::{PostboxError, QueueState};
use postbox_queue::{DeliveryManager, QueueStats};
use serde::Serialize;

use crate::heartbeat::HeartbeatStore;
use crate::process::{HandleStore, ProcessControl};

#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub agent: String,
    pub supervised: bool,
    pub heartbeat_age_secs: Option<u64>,
    /// Heartbeat older than `max_stale_secs`.
    pub stale: bool,
    pub alive: bool,
    pub pid: Option<u32>,
    pub queue: QueueStats,
}

impl AgentStatus {
    /// One-line summary for text output.
    pub fn summary(&self) -> String {
        let heartbeat = match self.heartbeat_age_secs {
            Some(age) if self.stale => format!("stale ({age}s)"),
            Some(age) => format!("{age}s ago"),
            None => "never".to_string(),
        };
        let process = match (self.alive, self.pid) {
            (true, Some(pid)) => format!("running (pid {pid})"),
            _ => "stopped".to_string(),
        };
        format!(
            "{:<12} heartbeat: {:<14} process: {:<20} inbox: {:<4} processing: {:<4} outbox: {:<4} dead-letter: {}",
            self.agent,
            heartbeat,
            process,
            self.queue.count(QueueState::Inbox),
            self.queue.count(QueueState::Processing),
            self.queue.count(QueueState::Outbox),
            self.queue.count(QueueState::DeadLetter),
        )
    }
}

/// Collect status for every queue-owning agent.
pub fn collect_status(
    config: &PostboxConfig,
    manager: &DeliveryManager,
    control: &dyn ProcessControl,
    now: SystemTime,
) -> Result<Vec<AgentStatus>, PostboxError> {
    let state_dir = config.state_dir();
    let max_stale = Duration::from_secs(config.supervisor.max_stale_secs);

    config
        .queue_agents()
        .into_iter()
        .map(|name| {
            let declared = config.agent(&name).ok();
            let heartbeat = HeartbeatStore::new(config.agent_heartbeat_path(&name));
            let age = heartbeat.age(now)?;
            let handle = HandleStore::for_agent(&state_dir, &name).load()?;
            let alive = handle.as_ref().is_some_and(|h| control.is_alive(h));

            Ok(AgentStatus {
                supervised: declared.is_some_and(|a| a.supervise),
                heartbeat_age_secs: age.map(|a| a.as_secs()),
                stale: age.is_some_and(|a| a > max_stale),
                alive,
                pid: handle.filter(|_| alive).map(|h| h.pid),
                queue: manager.stats(&name)?,
                agent: name,
            })
        })
        .collect()
}
