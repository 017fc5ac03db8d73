// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound replies: agents write into their outbox, the router delivers.

use postbox_core::{ChatId, Message, MessageId, PostboxError, QueueState, Trigger};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::delivery::DeliveryManager;
use crate::id::next_id;
use crate::store::Transitioned;

/// Sources the router knows how to deliver to without extra configuration.
pub const BUILTIN_CHANNELS: &[&str] = &["telegram", "slack", "sms", "signal"];

/// A reply produced by an agent worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyRequest {
    /// Channel the reply goes back through.
    pub source: String,
    pub chat_id: Option<ChatId>,
    pub text: String,
    #[serde(default)]
    pub topic: Option<String>,
}

impl ReplyRequest {
    pub fn new(source: impl Into<String>, chat_id: impl Into<ChatId>, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            chat_id: Some(chat_id.into()),
            text: text.into(),
            topic: None,
        }
    }
}

/// Cut `text` to at most `max` characters, marking the cut with `...`.
pub fn truncate_reply(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

impl DeliveryManager {
    fn is_known_channel(&self, source: &str) -> bool {
        BUILTIN_CHANNELS.contains(&source) || self.channels.iter().any(|c| c == source)
    }

    /// Validate a reply and place it in `agent`'s outbox.
    pub fn send_reply(&self, agent: &str, reply: ReplyRequest) -> Result<MessageId, PostboxError> {
        self.check_known_agent(agent)?;
        let chat_id = reply
            .chat_id
            .ok_or_else(|| PostboxError::InvalidInput("reply needs a chat_id".into()))?;
        if reply.text.trim().is_empty() {
            return Err(PostboxError::InvalidInput("reply text is empty".into()));
        }
        if !self.is_known_channel(&reply.source) {
            return Err(PostboxError::InvalidInput(format!(
                "unknown reply channel `{}`",
                reply.source
            )));
        }

        let text = truncate_reply(&reply.text, self.policy.max_reply_len);
        if text.len() != reply.text.len() {
            debug!(agent, original = reply.text.chars().count(), "reply truncated");
        }
        let mut msg = Message::text(&reply.source, text).with_chat(chat_id);
        msg.topic = reply.topic;
        msg.id = next_id();

        self.store.insert(agent, QueueState::Outbox, &msg)?;
        info!(agent, id = %msg.id, channel = %msg.source, "reply queued");
        self.audit("reply", agent, &msg.id, json!({"channel": msg.source, "chat_id": msg.chat_id}));
        Ok(msg.id)
    }

    /// Replies waiting in `agent`'s outbox, oldest first.
    ///
    /// Unparseable files are quarantined so they cannot wedge the dispatcher.
    pub fn pending_outbound(&self, agent: &str) -> Result<Vec<Message>, PostboxError> {
        let mut out = Vec::new();
        for path in self.store.list(agent, QueueState::Outbox)? {
            match self.store.read(&path) {
                Ok(msg) => out.push(msg),
                Err(PostboxError::MalformedMessage { path, reason }) => {
                    self.quarantine(agent, &path, &reason);
                }
                Err(PostboxError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Archive a delivered reply. Returns `false` if it was already archived or gone.
    pub fn mark_sent(&self, agent: &str, id: &MessageId) -> Result<bool, PostboxError> {
        let moved = matches!(
            self.store.transition(agent, id, Trigger::Deliver)?,
            Transitioned::Moved { .. }
        );
        if moved {
            self.audit("sent", agent, id, serde_json::Value::Null);
        }
        Ok(moved)
    }

    /// Number of replies in the outbox.
    pub fn outbox_len(&self, agent: &str) -> Result<usize, PostboxError> {
        self.store.count(agent, QueueState::Outbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::DeliveryPolicy;
    use crate::layout::QueueLayout;

    fn manager(max_reply_len: usize) -> (DeliveryManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let policy = DeliveryPolicy {
            max_reply_len,
            ..DeliveryPolicy::default()
        };
        let mgr = DeliveryManager::new(QueueLayout::new(dir.path(), "main"), policy)
            .with_channels(vec!["ops-spool".into()]);
        (mgr, dir)
    }

    #[test]
    fn truncation_keeps_limit() {
        assert_eq!(truncate_reply("hello", 10), "hello");
        assert_eq!(truncate_reply("hello world", 8), "hello...");
        assert_eq!(truncate_reply("héllo wörld", 8).chars().count(), 8);
    }

    #[test]
    fn reply_lands_in_outbox_and_is_sent_once() {
        let (mgr, _dir) = manager(4096);
        let id = mgr
            .send_reply("main", ReplyRequest::new("telegram", 42i64, "pong"))
            .unwrap();

        let pending = mgr.pending_outbound("main").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].chat_id, Some(ChatId::Int(42)));
        assert_eq!(mgr.outbox_len("main").unwrap(), 1);

        assert!(mgr.mark_sent("main", &id).unwrap());
        assert!(!mgr.mark_sent("main", &id).unwrap());
        assert!(mgr.pending_outbound("main").unwrap().is_empty());
    }

    #[test]
    fn reply_validation() {
        let (mgr, _dir) = manager(4096);
        let mut no_chat = ReplyRequest::new("slack", "C1", "hi");
        no_chat.chat_id = None;
        assert!(matches!(
            mgr.send_reply("main", no_chat),
            Err(PostboxError::InvalidInput(_))
        ));
        assert!(mgr
            .send_reply("main", ReplyRequest::new("slack", "C1", "   "))
            .is_err());
        assert!(mgr
            .send_reply("main", ReplyRequest::new("carrier-pigeon", "C1", "hi"))
            .is_err());
        assert!(mgr
            .send_reply("main", ReplyRequest::new("ops-spool", "C1", "hi"))
            .is_ok());
    }

    #[test]
    fn long_reply_is_truncated() {
        let (mgr, _dir) = manager(10);
        mgr.send_reply("main", ReplyRequest::new("sms", 1i64, "a".repeat(50)))
            .unwrap();
        let pending = mgr.pending_outbound("main").unwrap();
        assert_eq!(pending[0].text, "aaaaaaa...");
    }
}
