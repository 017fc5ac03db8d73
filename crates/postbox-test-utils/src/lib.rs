// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for postbox integration tests.
//!
//! Provides a mock channel adapter and a temporary queue fixture for fast,
//! deterministic tests without external services.
//!
//! # Components
//!
//! - [`MockChannel`] - Mock channel adapter with injectable inbound events and captured sends
//! - [`TestQueue`] - Temporary queue base directory with a matching config and delivery manager

pub mod harness;
pub mod mock_channel;

pub use harness::TestQueue;
pub use mock_channel::MockChannel;
