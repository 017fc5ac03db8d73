// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel adapter trait for external message sources and sinks.

use async_trait::async_trait;

use crate::error::PostboxError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{ChannelCapabilities, InboundMessage, OutboundMessage};

/// Adapter for a bidirectional external channel.
///
/// Polling is cursor based: the router persists the highest cursor it has
/// enqueued and passes it back on the next poll, so a restart re-polls from
/// the last persisted position.
#[async_trait]
pub trait ChannelAdapter: PluginAdapter {
    /// Returns the capabilities supported by this channel.
    fn capabilities(&self) -> ChannelCapabilities;

    /// Establishes a connection to the channel.
    async fn connect(&mut self) -> Result<(), PostboxError>;

    /// Returns inbound messages strictly after `cursor`, oldest first.
    async fn poll(&self, cursor: Option<&str>) -> Result<Vec<InboundMessage>, PostboxError>;

    /// Delivers a reply. `Ok` means the channel confirmed delivery.
    async fn send(&self, msg: OutboundMessage) -> Result<String, PostboxError>;
}
