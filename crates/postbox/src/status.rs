// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `postbox status` command implementation.
//!
//! Shows heartbeat age, worker process and queue depth for every agent.
//! `--json` prints the structured report for scripting.

use std::io::IsTerminal;
use std::time::SystemTime;

use postbox_config::PostboxConfig;
use postbox_core::PostboxError;
use postbox_queue::DeliveryManager;
use postbox_supervisor::{AgentStatus, OsProcessControl, collect_status};

/// Format an age in seconds the way operators read it.
fn format_age(secs: u64) -> String {
    let days = secs / 86400;
    let hours = (secs % 86400) / 3600;
    let minutes = (secs % 3600) / 60;

    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m")
    } else {
        format!("{secs}s")
    }
}

/// Run the `postbox status` command.
///
/// If `--plain` is passed or stdout is not a TTY, disables colors.
pub fn run_status(
    config: &PostboxConfig,
    manager: &DeliveryManager,
    json: bool,
    plain: bool,
) -> Result<(), PostboxError> {
    let report = collect_status(config, manager, &OsProcessControl::new(), SystemTime::now())?;

    if json {
        crate::print_json(&report)?;
    } else {
        let use_color = !plain && std::io::stdout().is_terminal();
        print_report(&report, use_color);
    }
    Ok(())
}

fn print_report(report: &[AgentStatus], use_color: bool) {
    println!();
    println!("  postbox status");
    println!("  {}", "-".repeat(35));

    for status in report {
        let healthy = status.alive && !status.stale;
        let age = status
            .heartbeat_age_secs
            .map(format_age)
            .unwrap_or_else(|| "never".to_string());

        if use_color {
            use colored::Colorize;
            let mark = match (status.supervised, healthy) {
                (false, _) => "-".dimmed(),
                (true, true) => "✓".green(),
                (true, false) => "✗".red(),
            };
            println!("    {mark} {}", status.summary());
            if status.stale {
                println!("        last heartbeat {} ago", age.yellow());
            }
        } else {
            let mark = match (status.supervised, healthy) {
                (false, _) => "[--]",
                (true, true) => "[OK]",
                (true, false) => "[FAIL]",
            };
            println!("    {mark} {}", status.summary());
            if status.stale {
                println!("        last heartbeat {age} ago");
            }
        }
    }
    println!();
}
