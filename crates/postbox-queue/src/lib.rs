// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Filesystem message queue for postbox.
//!
//! One JSON file per message; a message's state is the directory holding
//! it. Every write goes to a temporary file first and is renamed into
//! place, so a crash never leaves a half-written message visible.
//!
//! - [`QueueStore`] owns the directories and the lifecycle moves.
//! - [`DeliveryManager`] implements enqueue, peek, acknowledge, retry and
//!   dead-letter on top of it, plus replies, inter-agent messages and reports.
//! - [`BlockingWait`] lets a worker block until its inbox has work.

pub mod atomic;
pub mod attempts;
pub mod audit;
pub mod delivery;
pub mod id;
pub mod idempotency;
pub mod ipc;
pub mod layout;
pub mod outbound;
pub mod recovery;
pub mod report;
pub mod scheduler;
pub mod store;
pub mod wait;

pub use audit::AuditLog;
pub use delivery::{DeliveryManager, DeliveryPolicy, FailOutcome};
pub use id::{ipc_id, next_id};
pub use idempotency::IdempotencyTracker;
pub use layout::QueueLayout;
pub use outbound::{truncate_reply, ReplyRequest};
pub use recovery::RecoveryReport;
pub use report::{HistoryEntry, HistoryFilter, HistoryPage, QueueStats};
pub use scheduler::{run_every, wait_for_event_or_timeout, DirEvents, Wake};
pub use store::{QueueStore, Transitioned};
pub use wait::{BlockingWait, WaitOptions, WaitOutcome, WaitState};
