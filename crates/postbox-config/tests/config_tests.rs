// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for configuration loading.

use postbox_config::diagnostic::ConfigError;
use postbox_config::model::ChannelKind;
use postbox_config::{load_and_validate_path, load_and_validate_str, load_config_from_str};

const FULL: &str = r#"
[daemon]
log_level = "debug"

[queue]
base_dir = "/tmp/postbox-test"
default_agent = "main"
max_attempts = 3

[wait]
poll_interval_ms = 1000

[supervisor]
max_stale_secs = 600
grace_period_secs = 20

[self_check]
min_interval_secs = 120
agents = ["ops"]

[router]
default_agent = "main"

[[router.routes]]
channel = "slack"
topic = "C-OPS"
agent = "ops"

[[router.channels]]
name = "slack"
inbound_dir = "/tmp/slack/in"
outbound_dir = "/tmp/slack/out"

[[agents]]
name = "ops"
workspace = "/srv/ops"
start_command = ["ops-worker", "--loop"]

[jobs]
agent = "ops"
"#;

#[test]
fn full_config_deserializes_and_validates() {
    let config = load_and_validate_str(FULL).expect("valid config");
    assert_eq!(config.daemon.log_level, "debug");
    assert_eq!(config.queue.max_attempts, 3);
    assert_eq!(config.supervisor.grace_period_secs, 20);
    assert_eq!(config.router.routes.len(), 1);
    assert_eq!(config.router.channels[0].kind, ChannelKind::Spool);
    assert_eq!(config.agents[0].start_command, vec!["ops-worker", "--loop"]);
    assert_eq!(config.queue_agents(), vec!["main", "ops"]);
    assert_eq!(
        config.state_dir(),
        std::path::PathBuf::from("/tmp/postbox-test/state")
    );
    assert_eq!(
        config.heartbeat_path(&config.agents[0]),
        std::path::PathBuf::from("/tmp/postbox-test/state/ops.heartbeat")
    );
}

#[test]
fn empty_config_uses_defaults() {
    let config = load_config_from_str("").expect("empty TOML is valid");
    assert_eq!(config.queue.default_agent, "main");
    assert_eq!(config.queue.max_attempts, 5);
    assert_eq!(config.supervisor.max_stale_secs, 600);
    assert_eq!(config.self_check.min_interval_secs, 120);
    assert_eq!(config.wait.poll_interval_ms, 1500);
    assert_eq!(config.router_default_agent(), "main");
}

#[test]
fn unknown_key_gets_suggestion() {
    let errors = load_and_validate_str("[queue]\nmax_attempt = 3\n").unwrap_err();
    match &errors[0] {
        ConfigError::UnknownKey {
            key, suggestion, ..
        } => {
            assert_eq!(key, "max_attempt");
            assert_eq!(suggestion.as_deref(), Some("max_attempts"));
        }
        other => panic!("expected UnknownKey, got {other:?}"),
    }
}

#[test]
fn wrong_type_is_reported() {
    let errors = load_and_validate_str("[queue]\nmax_attempts = \"many\"\n").unwrap_err();
    assert!(matches!(errors[0], ConfigError::InvalidType { .. }));
}

#[test]
fn validation_errors_surface_through_loader() {
    let errors = load_and_validate_str("[supervisor]\ngrace_period_secs = 120\n").unwrap_err();
    assert!(errors[0].to_string().contains("grace_period_secs"));
}

#[test]
fn missing_explicit_path_is_an_error() {
    let errors = load_and_validate_path(std::path::Path::new("/nonexistent/postbox.toml"))
        .unwrap_err();
    assert!(errors[0].to_string().contains("does not exist"));
}

#[test]
fn explicit_path_is_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("postbox.toml");
    std::fs::write(&path, "[queue]\ndefault_agent = \"home\"\n").unwrap();

    let config = load_and_validate_path(&path).unwrap();
    assert_eq!(config.queue.default_agent, "home");
}

#[test]
fn rendered_toml_loads_back() {
    let config = load_and_validate_str(FULL).unwrap();
    let rendered = config.to_toml().unwrap();
    let again = load_and_validate_str(&rendered).unwrap();
    assert_eq!(again.router.routes, config.router.routes);
    assert_eq!(again.agents[0].name, "ops");
}
