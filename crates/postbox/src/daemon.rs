// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic roles: supervisor, self-check injector and router.
//!
//! With `--once` each runs a single pass and prints its report; otherwise it
//! loops on its configured interval until SIGINT/SIGTERM.

use std::sync::Arc;
use std::time::SystemTime;

use postbox_config::PostboxConfig;
use postbox_core::PostboxError;
use postbox_queue::DeliveryManager;
use postbox_router::Router;
use postbox_supervisor::{
    HeartbeatStore, InjectOutcome, LivenessSupervisor, OsProcessControl, SelfCheckInjector,
};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::print_json;
use crate::shutdown::install_signal_handler;

#[derive(Serialize)]
struct Injection<'a> {
    agent: &'a str,
    #[serde(flatten)]
    outcome: &'a InjectOutcome,
}

pub async fn run_supervise(config: &PostboxConfig, once: bool) -> Result<(), PostboxError> {
    let supervisor = LivenessSupervisor::from_config(config, Arc::new(OsProcessControl::new()));
    if once {
        return print_json(&supervisor.run_pass(SystemTime::now()).await?);
    }
    info!(agents = supervisor.agents().count(), "supervisor started");
    supervisor.run(&install_signal_handler()).await;
    Ok(())
}

pub async fn run_self_check(
    config: &PostboxConfig,
    manager: Arc<DeliveryManager>,
    once: bool,
) -> Result<(), PostboxError> {
    let injector =
        SelfCheckInjector::from_config(config, manager, Arc::new(OsProcessControl::new()));
    if once {
        let results = injector.run_pass(SystemTime::now())?;
        let report: Vec<Injection<'_>> = results
            .iter()
            .map(|(agent, outcome)| Injection { agent, outcome })
            .collect();
        return print_json(&report);
    }
    info!("self-check injector started");
    injector.run(&install_signal_handler()).await;
    Ok(())
}

pub async fn run_route(
    config: &PostboxConfig,
    manager: Arc<DeliveryManager>,
    once: bool,
) -> Result<(), PostboxError> {
    let router = Router::from_config(config, manager).await?;
    if once {
        let (inbound, outbound) = router.run_once().await;
        return print_json(&json!({ "inbound": inbound, "outbound": outbound }));
    }
    info!(channels = ?router.channel_names(), "router started");
    router.run(&install_signal_handler()).await;
    Ok(())
}

/// Worker-side liveness signal.
pub fn run_heartbeat(config: &PostboxConfig, agent: &str) -> Result<(), PostboxError> {
    if !config.queue_agents().iter().any(|a| a == agent) {
        return Err(PostboxError::NotFound(format!("agent `{agent}` is not configured")));
    }
    let store = HeartbeatStore::new(config.agent_heartbeat_path(agent));
    store.touch()?;
    print_json(&json!({ "agent": agent, "heartbeat": store.path() }))
}
