// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for postbox.
//!
//! Provides the error taxonomy, the on-disk message schema, the explicit
//! message lifecycle state machine, and the channel adapter traits used by
//! the router.

pub mod error;
pub mod lifecycle;
pub mod traits;
pub mod types;

pub use error::PostboxError;
pub use lifecycle::{MessageStatus, QueueState, Trigger};
pub use types::{
    ChannelCapabilities, ChatId, HealthStatus, InboundMessage, Message, MessageId, MessageKind,
    OutboundMessage,
};

pub use traits::{ChannelAdapter, PluginAdapter};
