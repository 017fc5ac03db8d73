// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message schema and common types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::PostboxError;

/// Unique, time-sortable identifier for a queued message.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Validate an id supplied from outside (CLI, worker API).
    ///
    /// Ids become file names, so path separators and parent references are rejected.
    pub fn parse(raw: &str) -> Result<Self, PostboxError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PostboxError::InvalidInput("message id is empty".into()));
        }
        if trimmed.contains("..") || trimmed.contains('/') || trimmed.contains('\\') {
            return Err(PostboxError::InvalidInput(format!(
                "invalid message id `{trimmed}`"
            )));
        }
        Ok(MessageId(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque sender identifier on the source channel.
///
/// Telegram uses integers, Slack and spool channels use strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatId {
    Int(i64),
    Text(String),
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatId::Int(v) => write!(f, "{v}"),
            ChatId::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for ChatId {
    fn from(v: i64) -> Self {
        ChatId::Int(v)
    }
}

impl From<&str> for ChatId {
    fn from(v: &str) -> Self {
        match v.parse::<i64>() {
            Ok(n) => ChatId::Int(n),
            Err(_) => ChatId::Text(v.to_string()),
        }
    }
}

/// What a message carries.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Voice,
    Callback,
    Consolidation,
    SelfCheck,
    UpdateNotice,
}

impl MessageKind {
    /// File name suffix for synthetic kinds, for operator readability only.
    pub fn file_suffix(self) -> &'static str {
        match self {
            MessageKind::SelfCheck => "_self",
            MessageKind::Consolidation => "_consolidation",
            _ => "",
        }
    }
}

/// The atomic unit of the queue. One JSON file per message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<ChatId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default)]
    pub text: String,
    /// Creation time, immutable.
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_message_text: Option<String>,
    /// Sending agent for inter-agent messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_agent: Option<String>,
    /// Channel-side id used to deduplicate re-polled messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default)]
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter_reason: Option<String>,
}

impl Message {
    /// A new text message from `source`. The id is assigned on enqueue.
    pub fn text(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: MessageId(String::new()),
            source: source.into(),
            chat_id: None,
            user_id: None,
            username: None,
            user_name: None,
            text: text.into(),
            timestamp: Utc::now(),
            kind: MessageKind::Text,
            topic: None,
            image_file: None,
            callback_data: None,
            original_message_text: None,
            from_agent: None,
            external_id: None,
            attempt_count: 0,
            retry_at: None,
            last_error: None,
            dead_letter_reason: None,
        }
    }

    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_chat(mut self, chat_id: impl Into<ChatId>) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// File name this message is stored under.
    pub fn file_name(&self) -> String {
        format!("{}{}.json", self.id, self.kind.file_suffix())
    }
}

/// Health status reported by channel adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

/// An inbound event produced by a channel adapter poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Monotonic position on the channel. The router persists the highest seen.
    pub cursor: String,
    /// Channel-side unique id.
    pub external_id: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub chat_id: Option<ChatId>,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub image_file: Option<String>,
    #[serde(default)]
    pub callback_data: Option<String>,
    /// Messages from bots (including ourselves) are skipped.
    #[serde(default)]
    pub is_bot: bool,
}

/// A reply handed to a channel adapter for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Queue id of the outbox message being delivered.
    pub id: MessageId,
    pub channel: String,
    pub chat_id: ChatId,
    #[serde(default)]
    pub topic: Option<String>,
    pub text: String,
    /// Agent that produced the reply.
    pub agent: String,
}

/// Capabilities reported by a channel adapter.
#[derive(Debug, Clone, Default)]
pub struct ChannelCapabilities {
    pub max_message_length: Option<usize>,
    pub supports_images: bool,
    pub supports_topics: bool,
}
