// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered configuration loading with Figment.
//!
//! Merge order, later wins: compiled defaults, `/etc/postbox/postbox.toml`,
//! `~/.config/postbox/postbox.toml`, `./postbox.toml`, then `POSTBOX_*`
//! environment variables.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::PostboxConfig;

pub const SYSTEM_CONFIG: &str = "/etc/postbox/postbox.toml";
pub const LOCAL_CONFIG: &str = "postbox.toml";

/// Sections reachable from environment variables, longest first so that
/// `self_check_` wins over any shorter prefix.
const ENV_SECTIONS: &[&str] = &[
    "supervisor",
    "self_check",
    "daemon",
    "router",
    "update",
    "queue",
    "jobs",
    "wait",
];

/// `~/.config/postbox/postbox.toml`, when a config dir exists.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("postbox/postbox.toml"))
}

/// Build the Figment for the standard hierarchy without extracting it.
pub fn build_figment() -> Figment {
    let mut figment = Figment::new()
        .merge(Serialized::defaults(PostboxConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG));
    if let Some(user) = user_config_path() {
        figment = figment.merge(Toml::file(user));
    }
    figment.merge(Toml::file(LOCAL_CONFIG)).merge(env_provider())
}

/// Load configuration from the standard hierarchy with env var overrides.
pub fn load_config() -> Result<PostboxConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from one explicit file plus env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<PostboxConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(PostboxConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Load configuration from a TOML string only (no files, no env).
pub fn load_config_from_str(toml_content: &str) -> Result<PostboxConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(PostboxConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Environment provider mapping `POSTBOX_{SECTION}_{KEY}` to `section.key`.
///
/// Uses `Env::map()` rather than `Env::split("_")` because key names contain
/// underscores: `POSTBOX_QUEUE_MAX_ATTEMPTS` must become `queue.max_attempts`.
fn env_provider() -> Env {
    Env::prefixed("POSTBOX_").map(|key| map_env_key(key.as_str()).into())
}

fn map_env_key(key: &str) -> String {
    for section in ENV_SECTIONS {
        if let Some(rest) = key
            .strip_prefix(section)
            .and_then(|r| r.strip_prefix('_'))
        {
            return format!("{section}.{rest}");
        }
    }
    key.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_keys_map_to_sections() {
        assert_eq!(map_env_key("queue_max_attempts"), "queue.max_attempts");
        assert_eq!(
            map_env_key("self_check_min_interval_secs"),
            "self_check.min_interval_secs"
        );
        assert_eq!(
            map_env_key("supervisor_max_stale_secs"),
            "supervisor.max_stale_secs"
        );
        assert_eq!(map_env_key("unknown_thing"), "unknown_thing");
    }

    #[test]
    fn env_overrides_file_values() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("custom.toml", "[queue]\nmax_attempts = 3\n")?;
            jail.set_env("POSTBOX_QUEUE_MAX_ATTEMPTS", "7");
            jail.set_env("POSTBOX_SUPERVISOR_MAX_STALE_SECS", "900");

            let config = load_config_from_path(Path::new("custom.toml"))?;
            assert_eq!(config.queue.max_attempts, 7);
            assert_eq!(config.supervisor.max_stale_secs, 900);
            Ok(())
        });
    }

    #[test]
    fn local_file_is_picked_up() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(LOCAL_CONFIG, "[queue]\ndefault_agent = \"ops\"\n")?;
            let config = load_config()?;
            assert_eq!(config.queue.default_agent, "ops");
            Ok(())
        });
    }
}
