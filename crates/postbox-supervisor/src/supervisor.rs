// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Heartbeat liveness supervisor.
//!
//! Each pass reads every supervised agent's heartbeat. A fresh heartbeat is
//! left alone. A missing heartbeat means the worker never started. A
//! heartbeat older than `max_stale` means the worker stopped making
//! progress: its recorded process group is stopped, any members still
//! around are killed, the heartbeat is touched and the start command runs
//! exactly once.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use postbox_config::PostboxConfig;
use postbox_config::model::AgentConfig;
use postbox_core::PostboxError;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::heartbeat::HeartbeatStore;
use crate::lock::OpLock;
use crate::process::{HandleStore, ProcessControl, ProcessHandle};

/// What a pass did for one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SupervisorAction {
    /// Heartbeat within `max_stale`; nothing to do.
    Healthy { age_secs: u64 },
    /// No heartbeat and nothing running: first start.
    Started { pid: u32 },
    /// No heartbeat yet but the recorded worker is alive; heartbeat seeded.
    Adopted { pid: u32 },
    /// Stale heartbeat: group stopped and worker started again.
    Restarted { age_secs: u64, pid: u32 },
    /// The pass could not act; retried on the next pass.
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentCheck {
    pub agent: String,
    #[serde(flatten)]
    pub action: SupervisorAction,
}

/// Everything the supervisor needs to know about one agent.
#[derive(Debug, Clone)]
pub struct SupervisedAgent {
    pub config: AgentConfig,
    pub heartbeat: HeartbeatStore,
    pub handles: HandleStore,
    pub log_path: PathBuf,
}

impl SupervisedAgent {
    pub fn new(config: &PostboxConfig, agent: &AgentConfig) -> Self {
        let state_dir = config.state_dir();
        Self {
            heartbeat: HeartbeatStore::new(config.heartbeat_path(agent)),
            handles: HandleStore::for_agent(&state_dir, &agent.name),
            log_path: state_dir.join(format!("{}.log", agent.name)),
            config: agent.clone(),
        }
    }
}

pub struct LivenessSupervisor {
    control: Arc<dyn ProcessControl>,
    agents: Vec<SupervisedAgent>,
    state_dir: PathBuf,
    max_stale: Duration,
    grace: Duration,
    interval: Duration,
}

impl LivenessSupervisor {
    pub fn new(
        control: Arc<dyn ProcessControl>,
        agents: Vec<SupervisedAgent>,
        state_dir: impl Into<PathBuf>,
        max_stale: Duration,
        grace: Duration,
    ) -> Self {
        Self {
            control,
            agents,
            state_dir: state_dir.into(),
            max_stale,
            grace,
            interval: Duration::from_secs(180),
        }
    }

    /// Supervise every agent with `supervise = true`.
    pub fn from_config(config: &PostboxConfig, control: Arc<dyn ProcessControl>) -> Self {
        let agents = config
            .agents
            .iter()
            .filter(|a| a.supervise)
            .map(|a| SupervisedAgent::new(config, a))
            .collect();
        let mut supervisor = Self::new(
            control,
            agents,
            config.state_dir(),
            Duration::from_secs(config.supervisor.max_stale_secs),
            Duration::from_secs(config.supervisor.grace_period_secs),
        );
        supervisor.interval = Duration::from_secs(config.supervisor.interval_secs);
        supervisor
    }

    pub fn agents(&self) -> impl Iterator<Item = &str> {
        self.agents.iter().map(|a| a.config.name.as_str())
    }

    /// One supervision pass over all agents, under the `supervisor` lock.
    pub async fn run_pass(&self, now: SystemTime) -> Result<Vec<AgentCheck>, PostboxError> {
        let _lock = OpLock::acquire(&self.state_dir, "supervisor")?;
        let mut checks = Vec::with_capacity(self.agents.len());
        for agent in &self.agents {
            let action = match self.check(agent, now).await {
                Ok(action) => action,
                Err(e) => {
                    error!(agent = %agent.config.name, error = %e, "supervision failed");
                    SupervisorAction::Failed {
                        reason: e.to_string(),
                    }
                }
            };
            checks.push(AgentCheck {
                agent: agent.config.name.clone(),
                action,
            });
        }
        Ok(checks)
    }

    /// Check a single agent by name.
    pub async fn check_agent(&self, name: &str, now: SystemTime) -> Result<SupervisorAction, PostboxError> {
        let agent = self
            .agents
            .iter()
            .find(|a| a.config.name == name)
            .ok_or_else(|| PostboxError::NotFound(format!("agent `{name}` is not supervised")))?;
        let _lock = OpLock::acquire(&self.state_dir, "supervisor")?;
        self.check(agent, now).await
    }

    async fn check(&self, agent: &SupervisedAgent, now: SystemTime) -> Result<SupervisorAction, PostboxError> {
        let name = &agent.config.name;
        let handle = agent.handles.load()?;

        match agent.heartbeat.age(now)? {
            Some(age) if age <= self.max_stale => {
                debug!(agent = %name, age_secs = age.as_secs(), "heartbeat fresh");
                Ok(SupervisorAction::Healthy {
                    age_secs: age.as_secs(),
                })
            }
            None => match handle.filter(|h| self.control.is_alive(h)) {
                Some(live) => {
                    agent.heartbeat.touch_at(now)?;
                    info!(agent = %name, pid = live.pid, "worker running without heartbeat, seeding it");
                    Ok(SupervisorAction::Adopted { pid: live.pid })
                }
                None => {
                    info!(agent = %name, "no heartbeat, starting worker");
                    agent.heartbeat.touch_at(now)?;
                    let started = self.launch(agent).await?;
                    Ok(SupervisorAction::Started { pid: started.pid })
                }
            },
            Some(age) => {
                let stale = PostboxError::StaleWorker {
                    agent: name.clone(),
                    age_secs: age.as_secs(),
                };
                warn!(error = %stale, "restarting stalled worker");

                if let Some(old) = &handle {
                    self.terminate(agent, old).await;
                }
                agent.heartbeat.touch_at(now)?;
                let started = self.launch(agent).await?;
                Ok(SupervisorAction::Restarted {
                    age_secs: age.as_secs(),
                    pid: started.pid,
                })
            }
        }
    }

    /// Stop the recorded worker and sweep what is left of its group.
    ///
    /// A handle whose process is already gone is only cleared: its pgid may
    /// have been reused by an unrelated group.
    async fn terminate(&self, agent: &SupervisedAgent, old: &ProcessHandle) {
        let name = &agent.config.name;
        if self.control.is_alive(old) {
            if let Err(e) = self.control.stop(old, self.grace).await {
                warn!(agent = %name, pid = old.pid, error = %e, "graceful stop failed");
            }
            if let Err(e) = self.control.kill_group(old.pgid) {
                warn!(agent = %name, pgid = old.pgid, error = %e, "orphan cleanup failed");
            }
        } else {
            debug!(agent = %name, pid = old.pid, "recorded worker already gone");
        }
        if let Err(e) = agent.handles.clear() {
            warn!(agent = %name, error = %e, "failed to clear process handle");
        }
    }

    async fn launch(&self, agent: &SupervisedAgent) -> Result<ProcessHandle, PostboxError> {
        let handle = self.control.launch(&agent.config, &agent.log_path).await?;
        agent.handles.save(&handle)?;
        Ok(handle)
    }

    /// Run passes every `supervisor.interval_secs` until cancelled.
    pub async fn run(&self, cancel: &CancellationToken) {
        info!(agents = self.agents.len(), "liveness supervisor started");
        postbox_queue::run_every(self.interval, cancel, || async move {
            match self.run_pass(SystemTime::now()).await {
                Ok(checks) => {
                    for check in checks.iter().filter(|c| !matches!(c.action, SupervisorAction::Healthy { .. })) {
                        info!(agent = %check.agent, action = ?check.action, "supervisor acted");
                    }
                }
                Err(e) => warn!(error = %e, "supervisor pass skipped"),
            }
        })
        .await;
        info!("liveness supervisor stopped");
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }
}
