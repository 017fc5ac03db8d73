// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel router for postbox.
//!
//! Maps inbound channel traffic to agent inboxes using a static route table,
//! persists a per-channel cursor so restarts resume where they left off, and
//! delivers agent replies through the adapter that matches their source.

pub mod breaker;
pub mod cursor;
pub mod router;
pub mod routes;
pub mod spool;

pub use breaker::{CircuitBreaker, CircuitState};
pub use cursor::CursorStore;
pub use router::{InboundReport, OutboundReport, Router, RouterSettings, SharedChannel, unavailable_reply};
pub use routes::RouteTable;
pub use spool::SpoolChannel;
