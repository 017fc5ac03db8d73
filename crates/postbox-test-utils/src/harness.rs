// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Temporary queue fixture.
//!
//! `TestQueue` owns a temp directory laid out like a real deployment
//! (queue base, state dir) and a `PostboxConfig` pointing at it, so tests
//! can build any component through its `from_config` constructor.

use std::path::Path;
use std::sync::Arc;

use postbox_config::PostboxConfig;
use postbox_config::model::{AgentConfig, RouteConfig};
use postbox_core::PostboxError;
use postbox_queue::DeliveryManager;

pub struct TestQueueBuilder {
    agents: Vec<String>,
    routes: Vec<RouteConfig>,
    max_attempts: u32,
}

impl TestQueueBuilder {
    fn new() -> Self {
        Self {
            agents: Vec::new(),
            routes: Vec::new(),
            max_attempts: 5,
        }
    }

    /// Declare a secondary agent besides `main`.
    pub fn with_agent(mut self, name: &str) -> Self {
        self.agents.push(name.to_string());
        self
    }

    pub fn with_route(mut self, channel: &str, topic: Option<&str>, agent: &str) -> Self {
        self.routes.push(RouteConfig {
            channel: channel.into(),
            topic: topic.map(Into::into),
            agent: agent.into(),
        });
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn build(self) -> Result<TestQueue, PostboxError> {
        let dir = tempfile::TempDir::new()
            .map_err(|e| PostboxError::Internal(format!("temp dir: {e}")))?;

        let mut config = PostboxConfig::default();
        config.queue.base_dir = dir.path().join("queue");
        config.queue.max_attempts = self.max_attempts;
        config.daemon.state_dir = Some(dir.path().join("state"));
        config.router.routes = self.routes;
        config.agents = self
            .agents
            .into_iter()
            .map(|name| AgentConfig {
                workspace: dir.path().join(&name),
                name,
                start_command: vec!["true".into()],
                heartbeat_file: None,
                supervise: true,
            })
            .collect();

        let manager = Arc::new(DeliveryManager::from_config(&config));
        Ok(TestQueue {
            dir,
            config,
            manager,
        })
    }
}

/// A queue rooted in a temporary directory, deleted on drop.
pub struct TestQueue {
    dir: tempfile::TempDir,
    pub config: PostboxConfig,
    pub manager: Arc<DeliveryManager>,
}

impl TestQueue {
    pub fn builder() -> TestQueueBuilder {
        TestQueueBuilder::new()
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn state_dir(&self) -> std::path::PathBuf {
        self.config.state_dir()
    }
}
