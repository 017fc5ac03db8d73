// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Liveness supervision for postbox agent workers.
//!
//! - [`LivenessSupervisor`] restarts workers whose heartbeat went stale.
//! - [`SelfCheckInjector`] enqueues rate-limited wake-up messages.
//! - [`OpLock`] keeps overlapping passes of the same operation apart.
//!
//! Processes are only ever addressed through a recorded [`ProcessHandle`],
//! never by matching command lines.

pub mod heartbeat;
pub mod injector;
pub mod lock;
pub mod process;
pub mod rate_limit;
pub mod status;
pub mod supervisor;

pub use heartbeat::HeartbeatStore;
pub use injector::{InjectOutcome, SelfCheckInjector};
pub use lock::OpLock;
pub use process::{HandleStore, OsProcessControl, ProcessControl, ProcessHandle};
pub use rate_limit::RateLimitStore;
pub use status::{AgentStatus, collect_status};
pub use supervisor::{AgentCheck, LivenessSupervisor, SupervisedAgent, SupervisorAction};
