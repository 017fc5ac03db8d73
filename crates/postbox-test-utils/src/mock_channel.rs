// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock channel adapter for deterministic testing.
//!
//! `MockChannel` implements `ChannelAdapter` with injectable inbound events
//! and captured outbound messages for assertion in tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use postbox_core::{
    ChannelAdapter, ChannelCapabilities, ChatId, HealthStatus, InboundMessage, MessageKind,
    OutboundMessage, PluginAdapter, PostboxError,
};

/// A mock messaging channel for testing.
///
/// Provides two queues:
/// - **inbound**: events injected via `inject()` are returned by `poll()`
///   when their cursor is past the caller's cursor, like a real channel API
/// - **sent**: messages passed to `send()` are captured and retrievable via
///   `sent_messages()`
///
/// `set_failing(true)` makes `send()` fail with `ChannelUnreachable`.
pub struct MockChannel {
    name: String,
    inbound: Arc<Mutex<Vec<InboundMessage>>>,
    sent: Arc<Mutex<Vec<OutboundMessage>>>,
    next_cursor: AtomicU64,
    failing: AtomicBool,
}

impl MockChannel {
    /// Create a new mock channel with empty queues.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inbound: Arc::new(Mutex::new(Vec::new())),
            sent: Arc::new(Mutex::new(Vec::new())),
            next_cursor: AtomicU64::new(1),
            failing: AtomicBool::new(false),
        }
    }

    /// Build a text event with the next cursor value.
    pub fn event(&self, chat_id: i64, topic: Option<&str>, text: &str) -> InboundMessage {
        let cursor = self.next_cursor.fetch_add(1, Ordering::SeqCst).to_string();
        InboundMessage {
            external_id: format!("{}-{cursor}", self.name),
            cursor,
            topic: topic.map(Into::into),
            chat_id: Some(ChatId::Int(chat_id)),
            user_id: Some(chat_id),
            username: Some("tester".into()),
            user_name: Some("Test User".into()),
            text: text.into(),
            kind: MessageKind::Text,
            image_file: None,
            callback_data: None,
            is_bot: false,
        }
    }

    /// Inject an inbound event.
    pub async fn inject(&self, event: InboundMessage) {
        self.inbound.lock().await.push(event);
    }

    /// Get all messages that were sent through `send()`.
    pub async fn sent_messages(&self) -> Vec<OutboundMessage> {
        self.sent.lock().await.clone()
    }

    /// Get the count of sent messages.
    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl PluginAdapter for MockChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn health_check(&self) -> Result<HealthStatus, PostboxError> {
        if self.failing.load(Ordering::SeqCst) {
            Ok(HealthStatus::Degraded("send failures injected".into()))
        } else {
            Ok(HealthStatus::Healthy)
        }
    }

    async fn shutdown(&self) -> Result<(), PostboxError> {
        Ok(())
    }
}

#[async_trait]
impl ChannelAdapter for MockChannel {
    fn capabilities(&self) -> ChannelCapabilities {
        ChannelCapabilities::default()
    }

    async fn connect(&mut self) -> Result<(), PostboxError> {
        Ok(())
    }

    async fn poll(&self, cursor: Option<&str>) -> Result<Vec<InboundMessage>, PostboxError> {
        let after: u64 = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let inbound = self.inbound.lock().await;
        Ok(inbound
            .iter()
            .filter(|e| e.cursor.parse::<u64>().is_ok_and(|c| c > after))
            .cloned()
            .collect())
    }

    async fn send(&self, msg: OutboundMessage) -> Result<String, PostboxError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PostboxError::ChannelUnreachable {
                channel: self.name.clone(),
                message: "injected failure".into(),
            });
        }
        let receipt = format!("mock-msg-{}", uuid::Uuid::new_v4());
        self.sent.lock().await.push(msg);
        Ok(receipt)
    }
}
