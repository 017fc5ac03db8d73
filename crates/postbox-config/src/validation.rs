// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation.
//!
//! Checks constraints serde cannot express: value ranges, name uniqueness,
//! and that every route points at an agent that owns a queue.

use std::collections::HashSet;

use crate::diagnostic::ConfigError;
use crate::model::PostboxConfig;

const GRACE_RANGE: std::ops::RangeInclusive<u64> = 10..=60;
const POLL_RANGE_MS: std::ops::RangeInclusive<u64> = 100..=2000;

/// Validate a deserialized configuration, collecting every error.
pub fn validate_config(config: &PostboxConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.queue.base_dir.as_os_str().is_empty() {
        errors.push(ConfigError::validation("queue.base_dir must not be empty"));
    }

    if !is_valid_agent_name(&config.queue.default_agent) {
        errors.push(ConfigError::validation(format!(
            "queue.default_agent `{}` must be lowercase letters, digits, `-` or `_`",
            config.queue.default_agent
        )));
    }

    if config.queue.max_attempts == 0 {
        errors.push(ConfigError::validation(
            "queue.max_attempts must be at least 1",
        ));
    }

    if config.queue.max_reply_len < 4 {
        errors.push(ConfigError::validation(format!(
            "queue.max_reply_len must be at least 4, got {}",
            config.queue.max_reply_len
        )));
    }

    if !POLL_RANGE_MS.contains(&config.wait.poll_interval_ms) {
        errors.push(ConfigError::validation(format!(
            "wait.poll_interval_ms must be between {} and {}, got {}",
            POLL_RANGE_MS.start(),
            POLL_RANGE_MS.end(),
            config.wait.poll_interval_ms
        )));
    }

    if !GRACE_RANGE.contains(&config.supervisor.grace_period_secs) {
        errors.push(ConfigError::validation(format!(
            "supervisor.grace_period_secs must be between {} and {}, got {}",
            GRACE_RANGE.start(),
            GRACE_RANGE.end(),
            config.supervisor.grace_period_secs
        )));
    }

    if config.supervisor.max_stale_secs == 0 {
        errors.push(ConfigError::validation(
            "supervisor.max_stale_secs must be greater than 0",
        ));
    }

    let mut seen = HashSet::new();
    for (i, agent) in config.agents.iter().enumerate() {
        if agent.name.trim().is_empty() {
            errors.push(ConfigError::validation(format!(
                "agents[{i}].name must not be empty"
            )));
            continue;
        }
        if !is_valid_agent_name(&agent.name) {
            errors.push(ConfigError::validation(format!(
                "agents[{i}].name `{}` must be lowercase letters, digits, `-` or `_`",
                agent.name
            )));
        }
        if !seen.insert(agent.name.as_str()) {
            errors.push(ConfigError::validation(format!(
                "duplicate agent name `{}` in [[agents]]",
                agent.name
            )));
        }
        if agent.supervise && agent.start_command.is_empty() {
            errors.push(ConfigError::validation(format!(
                "agents[{i}] `{}` is supervised but has no start_command",
                agent.name
            )));
        }
    }

    let known_agents: HashSet<String> = config.queue_agents().into_iter().collect();

    let router_default = config.router_default_agent();
    if !known_agents.contains(router_default) {
        errors.push(ConfigError::validation(format!(
            "router.default_agent `{router_default}` is not a configured agent"
        )));
    }

    for (i, route) in config.router.routes.iter().enumerate() {
        if !known_agents.contains(&route.agent) {
            errors.push(ConfigError::validation(format!(
                "router.routes[{i}] targets unknown agent `{}`",
                route.agent
            )));
        }
        if route.channel.trim().is_empty() {
            errors.push(ConfigError::validation(format!(
                "router.routes[{i}].channel must not be empty"
            )));
        }
    }

    let mut channel_names = HashSet::new();
    for channel in &config.router.channels {
        if !channel_names.insert(channel.name.as_str()) {
            errors.push(ConfigError::validation(format!(
                "duplicate channel name `{}` in [[router.channels]]",
                channel.name
            )));
        }
        if channel.inbound_dir == channel.outbound_dir {
            errors.push(ConfigError::validation(format!(
                "channel `{}` must use different inbound and outbound directories",
                channel.name
            )));
        }
    }

    for name in &config.self_check.agents {
        if !known_agents.contains(name) {
            errors.push(ConfigError::validation(format!(
                "self_check.agents lists unknown agent `{name}`"
            )));
        }
    }

    if let Some(agent) = &config.jobs.agent
        && !known_agents.contains(agent)
    {
        errors.push(ConfigError::validation(format!(
            "jobs.agent `{agent}` is not a configured agent"
        )));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Agent names become directory prefixes, so keep them filesystem-safe.
pub fn is_valid_agent_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AgentConfig, RouteConfig};

    fn agent(name: &str) -> AgentConfig {
        AgentConfig {
            name: name.to_string(),
            workspace: ".".into(),
            start_command: vec!["worker".into()],
            heartbeat_file: None,
            supervise: true,
        }
    }

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&PostboxConfig::default()).is_ok());
    }

    #[test]
    fn collects_all_errors() {
        let mut config = PostboxConfig::default();
        config.queue.max_attempts = 0;
        config.supervisor.grace_period_secs = 5;
        config.wait.poll_interval_ms = 10_000;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn routes_must_target_known_agents() {
        let mut config = PostboxConfig::default();
        config.agents.push(agent("ops"));
        config.router.routes.push(RouteConfig {
            channel: "slack".into(),
            topic: Some("C1".into()),
            agent: "ops".into(),
        });
        assert!(validate_config(&config).is_ok());

        config.router.routes.push(RouteConfig {
            channel: "slack".into(),
            topic: None,
            agent: "ghost".into(),
        });
        let errors = validate_config(&config).unwrap_err();
        assert!(errors[0].to_string().contains("ghost"));
    }

    #[test]
    fn supervised_agent_needs_start_command() {
        let mut config = PostboxConfig::default();
        let mut a = agent("ops");
        a.start_command.clear();
        config.agents.push(a);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn agent_names_are_path_safe() {
        assert!(is_valid_agent_name("ops-2"));
        assert!(!is_valid_agent_name("Ops"));
        assert!(!is_valid_agent_name("../x"));
        assert!(!is_valid_agent_name(""));
    }
}
