// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Queue subcommands: the worker-facing API of the broker.
//!
//! Each command operates on one agent's queue, chosen with the global
//! `--agent` flag (default: `queue.default_agent`), and prints JSON.

use std::time::Duration;

use clap::Subcommand;
use postbox_config::PostboxConfig;
use postbox_core::{ChatId, Message, MessageId, MessageKind, PostboxError};
use postbox_queue::{BlockingWait, DeliveryManager, HistoryFilter, ReplyRequest, WaitOptions};
use postbox_supervisor::HeartbeatStore;
use serde_json::json;

use crate::print_json;
use crate::shutdown::install_signal_handler;

/// Heartbeat refresh while a worker is blocked in `wait`.
const KEEPALIVE: Duration = Duration::from_secs(60);

#[derive(Subcommand, Debug)]
pub enum QueueCommand {
    /// Write a message into the agent's inbox.
    Enqueue {
        text: String,
        #[arg(long, default_value = "cli")]
        source: String,
        #[arg(long)]
        chat_id: Option<String>,
        #[arg(long)]
        topic: Option<String>,
        #[arg(long, default_value = "text")]
        kind: MessageKind,
    },
    /// Show pending inbox messages, oldest first, without removing them.
    Dequeue {
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Only messages from this source channel.
        #[arg(long)]
        source: Option<String>,
    },
    /// Block until the inbox has work or the timeout elapses, keeping the
    /// agent's heartbeat fresh meanwhile.
    Wait {
        /// Seconds; defaults to `wait.default_timeout_secs`.
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Claim a message: inbox -> processing.
    Processing { id: String },
    /// Acknowledge a handled message.
    Processed { id: String },
    /// Record a failed handling attempt.
    Failed {
        id: String,
        #[arg(long, default_value = "processing failed")]
        reason: String,
        /// Park the message in `failed` with exponential backoff.
        #[arg(long)]
        backoff: bool,
    },
    /// Move a dead-lettered message back to the inbox.
    Requeue { id: String },
    /// Queue a reply for delivery through a channel.
    Reply {
        text: String,
        #[arg(long)]
        source: String,
        #[arg(long)]
        chat_id: Option<String>,
        #[arg(long)]
        topic: Option<String>,
    },
    /// Mark an outbox message as delivered.
    Sent { id: String },
    /// Send a message to another agent's inbox.
    Ipc { to: String, text: String },
    /// Release stale processing claims and due retries.
    Recover,
    /// Per-directory counts.
    Stats,
    /// Processed and sent messages, newest first.
    History {
        #[arg(long)]
        chat_id: Option<String>,
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
}

pub async fn run_queue(
    config: &PostboxConfig,
    manager: &DeliveryManager,
    agent: Option<&str>,
    command: QueueCommand,
) -> Result<(), PostboxError> {
    let this_agent = agent.unwrap_or(&config.queue.default_agent);

    match command {
        QueueCommand::Enqueue {
            text,
            source,
            chat_id,
            topic,
            kind,
        } => {
            let mut msg = Message::text(source, text).with_kind(kind);
            if let Some(chat) = chat_id {
                msg = msg.with_chat(chat.as_str());
            }
            if let Some(topic) = topic {
                msg = msg.with_topic(topic);
            }
            let id = manager.enqueue(this_agent, msg)?;
            print_json(&json!({ "id": id }))
        }
        QueueCommand::Dequeue { limit, source } => {
            print_json(&manager.dequeue_from(this_agent, limit, source.as_deref())?)
        }
        QueueCommand::Wait { timeout } => {
            let timeout = Duration::from_secs(timeout.unwrap_or(config.wait.default_timeout_secs));
            let cancel = install_signal_handler();
            let heartbeat = HeartbeatStore::new(config.agent_heartbeat_path(this_agent));
            let half_stale = Duration::from_secs((config.supervisor.max_stale_secs / 2).max(1));
            let every = KEEPALIVE.min(half_stale);
            let outcome = BlockingWait::new(manager, WaitOptions::from_config(config))
                .with_keepalive(every, move || heartbeat.touch())
                .wait(this_agent, timeout, &cancel)
                .await?;
            print_json(&outcome)
        }
        QueueCommand::Processing { id } => {
            let id = MessageId::parse(&id)?;
            manager.mark_processing(this_agent, &id)?;
            print_json(&json!({ "id": id, "state": "processing" }))
        }
        QueueCommand::Processed { id } => {
            let id = MessageId::parse(&id)?;
            let moved = manager.mark_processed(this_agent, &id)?;
            print_json(&json!({ "id": id, "moved": moved }))
        }
        QueueCommand::Failed {
            id,
            reason,
            backoff,
        } => {
            let id = MessageId::parse(&id)?;
            let outcome = if backoff {
                manager.fail_with_backoff(this_agent, &id, &reason)?
            } else {
                manager.mark_failed(this_agent, &id, &reason)?
            };
            print_json(&outcome)
        }
        QueueCommand::Requeue { id } => {
            let id = MessageId::parse(&id)?;
            manager.requeue_dead_letter(this_agent, &id)?;
            print_json(&json!({ "id": id, "state": "inbox" }))
        }
        QueueCommand::Reply {
            text,
            source,
            chat_id,
            topic,
        } => {
            let reply = ReplyRequest {
                source,
                chat_id: chat_id.as_deref().map(ChatId::from),
                text,
                topic,
            };
            let id = manager.send_reply(this_agent, reply)?;
            print_json(&json!({ "id": id }))
        }
        QueueCommand::Sent { id } => {
            let id = MessageId::parse(&id)?;
            let moved = manager.mark_sent(this_agent, &id)?;
            print_json(&json!({ "id": id, "moved": moved }))
        }
        QueueCommand::Ipc { to, text } => {
            let id = manager.send_to_agent(this_agent, &to, &text)?;
            print_json(&json!({ "id": id, "to": to }))
        }
        QueueCommand::Recover => match agent {
            Some(agent) => print_json(&manager.recover(agent)?),
            None => print_json(&manager.recover_all()),
        },
        QueueCommand::Stats => match agent {
            Some(agent) => print_json(&manager.stats(agent)?),
            None => {
                let stats = config
                    .queue_agents()
                    .iter()
                    .map(|a| manager.stats(a))
                    .collect::<Result<Vec<_>, _>>()?;
                print_json(&stats)
            }
        },
        QueueCommand::History {
            chat_id,
            source,
            search,
            limit,
            offset,
        } => {
            let filter = HistoryFilter {
                chat_id,
                source,
                search,
                limit: limit.unwrap_or(config.queue.history_limit),
                offset,
            };
            print_json(&manager.history(this_agent, &filter)?)
        }
    }
}
