// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs.
//!
//! All structs use `#[serde(deny_unknown_fields)]` so a misspelled key is
//! reported at startup instead of silently falling back to a default.

use std::path::{Path, PathBuf};

use postbox_core::PostboxError;
use serde::{Deserialize, Serialize};

/// Top-level postbox configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PostboxConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Queue location and delivery policy.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Blocking wait behaviour.
    #[serde(default)]
    pub wait: WaitConfig,

    /// Liveness supervisor thresholds.
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Self-check injector guards.
    #[serde(default)]
    pub self_check: SelfCheckConfig,

    /// Channel routing table and channel adapters.
    #[serde(default)]
    pub router: RouterConfig,

    /// Supervised agent workers.
    #[serde(default)]
    pub agents: Vec<AgentConfig>,

    /// Scheduled job registry and executor.
    #[serde(default)]
    pub jobs: JobsConfig,

    /// Update and rollback settings.
    #[serde(default)]
    pub update: UpdateConfig,
}

impl PostboxConfig {
    /// Directory for heartbeats, handles, cursors, locks and rate-limit state.
    pub fn state_dir(&self) -> PathBuf {
        self.daemon
            .state_dir
            .clone()
            .unwrap_or_else(|| self.queue.base_dir.join("state"))
    }

    /// Agent that receives unmapped channel traffic.
    pub fn router_default_agent(&self) -> &str {
        self.router
            .default_agent
            .as_deref()
            .unwrap_or(&self.queue.default_agent)
    }

    /// Look up a declared agent by name.
    pub fn agent(&self, name: &str) -> Result<&AgentConfig, PostboxError> {
        self.agents
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| PostboxError::NotFound(format!("agent `{name}` is not configured")))
    }

    /// Every agent name that owns a queue: the default agent plus declared agents.
    pub fn queue_agents(&self) -> Vec<String> {
        let mut names = vec![self.queue.default_agent.clone()];
        for agent in &self.agents {
            if !names.contains(&agent.name) {
                names.push(agent.name.clone());
            }
        }
        names
    }

    /// Heartbeat file for an agent, defaulting into the state directory.
    pub fn heartbeat_path(&self, agent: &AgentConfig) -> PathBuf {
        agent
            .heartbeat_file
            .clone()
            .unwrap_or_else(|| self.state_dir().join(format!("{}.heartbeat", agent.name)))
    }

    /// Heartbeat file for any queue-owning agent, declared or not.
    pub fn agent_heartbeat_path(&self, name: &str) -> PathBuf {
        match self.agent(name) {
            Ok(agent) => self.heartbeat_path(agent),
            Err(_) => self.state_dir().join(format!("{name}.heartbeat")),
        }
    }

    pub fn jobs_registry_path(&self) -> PathBuf {
        self.jobs
            .registry_path
            .clone()
            .unwrap_or_else(|| self.state_dir().join("jobs.json"))
    }

    pub fn jobs_outputs_dir(&self) -> PathBuf {
        self.jobs
            .outputs_dir
            .clone()
            .unwrap_or_else(|| self.queue.base_dir.join("task-outputs"))
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.update
            .snapshot_dir
            .clone()
            .unwrap_or_else(|| self.queue.base_dir.join("snapshots"))
    }

    /// Render this configuration as TOML.
    pub fn to_toml(&self) -> Result<String, PostboxError> {
        toml::to_string_pretty(self).map_err(|e| PostboxError::Config(e.to_string()))
    }
}

/// Process-wide settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Overrides `{queue.base_dir}/state`.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            state_dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Queue store location and delivery policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// Root directory holding every agent's message directories.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Agent whose directories are unprefixed (`inbox`, `outbox`, ...).
    #[serde(default = "default_agent_name")]
    pub default_agent: String,

    /// Attempts before a message is dead-lettered.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Age after which a claimed message is handed back to the inbox.
    #[serde(default = "default_stale_processing_secs")]
    pub stale_processing_secs: u64,

    /// First retry delay; doubles per attempt.
    #[serde(default = "default_retry_base_delay_secs")]
    pub retry_base_delay_secs: u64,

    /// Default page size for history queries.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Replies longer than this are truncated.
    #[serde(default = "default_max_reply_len")]
    pub max_reply_len: usize,

    /// Append queue mutations to `{base_dir}/audit.jsonl`.
    #[serde(default = "default_true")]
    pub audit: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            default_agent: default_agent_name(),
            max_attempts: default_max_attempts(),
            stale_processing_secs: default_stale_processing_secs(),
            retry_base_delay_secs: default_retry_base_delay_secs(),
            history_limit: default_history_limit(),
            max_reply_len: default_max_reply_len(),
            audit: true,
        }
    }
}

fn default_base_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("postbox/queue"))
        .unwrap_or_else(|| PathBuf::from("./postbox-queue"))
}

fn default_agent_name() -> String {
    "main".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_stale_processing_secs() -> u64 {
    300
}

fn default_retry_base_delay_secs() -> u64 {
    60
}

fn default_history_limit() -> usize {
    50
}

fn default_max_reply_len() -> usize {
    4096
}

fn default_true() -> bool {
    true
}

/// Blocking wait settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WaitConfig {
    /// Poll interval used when filesystem events are unavailable.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_wait_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Subscribe to inbox create events before falling back to polling.
    #[serde(default = "default_true")]
    pub use_watcher: bool,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            default_timeout_secs: default_wait_timeout_secs(),
            use_watcher: true,
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1500
}

fn default_wait_timeout_secs() -> u64 {
    300
}

/// Liveness supervisor settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SupervisorConfig {
    /// Cadence of supervisor passes when running continuously.
    #[serde(default = "default_supervisor_interval_secs")]
    pub interval_secs: u64,

    /// Heartbeat age after which a worker is declared stalled.
    #[serde(default = "default_max_stale_secs")]
    pub max_stale_secs: u64,

    /// Graceful stop window before SIGKILL.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_supervisor_interval_secs(),
            max_stale_secs: default_max_stale_secs(),
            grace_period_secs: default_grace_period_secs(),
        }
    }
}

fn default_supervisor_interval_secs() -> u64 {
    180
}

fn default_max_stale_secs() -> u64 {
    600
}

fn default_grace_period_secs() -> u64 {
    30
}

/// Self-check injector settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SelfCheckConfig {
    #[serde(default = "default_self_check_interval_secs")]
    pub interval_secs: u64,

    /// Minimum gap between two successful injections.
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,

    /// Fixed sender identity on injected messages.
    #[serde(default = "default_self_check_sender")]
    pub sender: String,

    #[serde(default = "default_self_check_text")]
    pub text: String,

    /// Agents to nudge. Empty means every declared agent.
    #[serde(default)]
    pub agents: Vec<String>,
}

impl Default for SelfCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_self_check_interval_secs(),
            min_interval_secs: default_min_interval_secs(),
            sender: default_self_check_sender(),
            text: default_self_check_text(),
            agents: Vec::new(),
        }
    }
}

fn default_self_check_interval_secs() -> u64 {
    180
}

fn default_min_interval_secs() -> u64 {
    120
}

fn default_self_check_sender() -> String {
    "system".to_string()
}

fn default_self_check_text() -> String {
    "Self-check: confirm you are responsive and process anything pending in your inbox."
        .to_string()
}

/// Channel routing settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RouterConfig {
    /// Fallback agent for unmapped topics. Defaults to `queue.default_agent`.
    #[serde(default)]
    pub default_agent: Option<String>,

    #[serde(default = "default_router_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Consecutive send failures before a channel's circuit opens.
    #[serde(default = "default_channel_failure_threshold")]
    pub channel_failure_threshold: u32,

    /// How long an open circuit rejects sends before a probe.
    #[serde(default = "default_channel_cooldown_secs")]
    pub channel_cooldown_secs: u64,

    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_agent: None,
            poll_interval_secs: default_router_poll_interval_secs(),
            channel_failure_threshold: default_channel_failure_threshold(),
            channel_cooldown_secs: default_channel_cooldown_secs(),
            routes: Vec::new(),
            channels: Vec::new(),
        }
    }
}

fn default_router_poll_interval_secs() -> u64 {
    5
}

fn default_channel_failure_threshold() -> u32 {
    5
}

fn default_channel_cooldown_secs() -> u64 {
    60
}

/// One `(channel, topic) -> agent` mapping. A missing topic matches every topic.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RouteConfig {
    pub channel: String,
    #[serde(default)]
    pub topic: Option<String>,
    pub agent: String,
}

/// Adapter implementations available to the router.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Directory-backed channel: JSON files in, JSON files out.
    #[default]
    Spool,
}

/// A channel adapter instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    pub name: String,
    #[serde(default)]
    pub kind: ChannelKind,
    pub inbound_dir: PathBuf,
    pub outbound_dir: PathBuf,
}

/// A supervised agent worker.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    pub name: String,

    /// Working directory for the worker process.
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,

    /// Program and arguments used to (re)start the worker.
    #[serde(default)]
    pub start_command: Vec<String>,

    /// Overrides `{state_dir}/{name}.heartbeat`.
    #[serde(default)]
    pub heartbeat_file: Option<PathBuf>,

    /// Whether the liveness supervisor manages this agent.
    #[serde(default = "default_true")]
    pub supervise: bool,
}

fn default_workspace() -> PathBuf {
    PathBuf::from(".")
}

/// Scheduled job settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct JobsConfig {
    /// Defaults to `{state_dir}/jobs.json`.
    #[serde(default)]
    pub registry_path: Option<PathBuf>,

    /// Defaults to `{queue.base_dir}/task-outputs`.
    #[serde(default)]
    pub outputs_dir: Option<PathBuf>,

    /// Binary written into crontab lines. Defaults to the running executable.
    #[serde(default)]
    pub executor_path: Option<PathBuf>,

    /// Edit this file instead of the user's crontab.
    #[serde(default)]
    pub crontab_path: Option<PathBuf>,

    /// Agent receiving job output. Defaults to `queue.default_agent`.
    #[serde(default)]
    pub agent: Option<String>,
}

/// Update and rollback settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateConfig {
    /// Defaults to `{queue.base_dir}/snapshots`.
    #[serde(default)]
    pub snapshot_dir: Option<PathBuf>,

    /// Command that installs the new code.
    #[serde(default)]
    pub apply_command: Vec<String>,

    /// Command that exits 0 when the updated system is healthy.
    #[serde(default)]
    pub health_command: Vec<String>,

    /// Extra files captured in each snapshot (e.g. the config file itself).
    #[serde(default)]
    pub include: Vec<PathBuf>,
}

impl UpdateConfig {
    pub fn includes(&self) -> impl Iterator<Item = &Path> {
        self.include.iter().map(PathBuf::as_path)
    }
}
