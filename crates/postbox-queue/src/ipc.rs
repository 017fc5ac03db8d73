// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Inter-agent messages.

use postbox_core::{Message, MessageId, PostboxError};
use serde_json::json;
use tracing::info;

use crate::delivery::DeliveryManager;
use crate::id::ipc_id;
use crate::layout::check_agent;

/// Source tag carried by inter-agent messages.
pub const IPC_SOURCE: &str = "internal";

impl DeliveryManager {
    /// Drop `text` into `to`'s inbox on behalf of agent `from`.
    pub fn send_to_agent(&self, from: &str, to: &str, text: &str) -> Result<MessageId, PostboxError> {
        check_agent(from)?;
        if from == to {
            return Err(PostboxError::InvalidInput(format!(
                "agent `{from}` cannot message itself"
            )));
        }
        if text.trim().is_empty() {
            return Err(PostboxError::InvalidInput("message text is empty".into()));
        }
        self.check_known_agent(to)?;

        let mut msg = Message::text(IPC_SOURCE, text);
        msg.id = ipc_id(from);
        msg.from_agent = Some(from.to_string());

        self.store.insert(to, postbox_core::QueueState::Inbox, &msg)?;
        info!(from, to, id = %msg.id, "inter-agent message queued");
        self.audit("ipc", to, &msg.id, json!({"from": from}));
        Ok(msg.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::DeliveryPolicy;
    use crate::layout::QueueLayout;

    #[test]
    fn ipc_message_keeps_fifo_with_channel_traffic() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = DeliveryManager::new(QueueLayout::new(dir.path(), "main"), DeliveryPolicy::default())
            .with_agents(vec!["main".into(), "ops".into()]);

        let first = mgr.enqueue("ops", Message::text("telegram", "from user")).unwrap();
        let second = mgr.send_to_agent("main", "ops", "handover").unwrap();
        assert!(second.as_str().ends_with("_ipc-main"));

        let batch = mgr.dequeue_batch("ops", 10).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].id, first);
        assert_eq!(batch[1].id, second);
        assert_eq!(batch[1].source, IPC_SOURCE);
        assert_eq!(batch[1].from_agent.as_deref(), Some("main"));
        assert!(mgr.dequeue_batch("main", 10).unwrap().is_empty());
    }

    #[test]
    fn ipc_rejects_unknown_target_and_self() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = DeliveryManager::new(QueueLayout::new(dir.path(), "main"), DeliveryPolicy::default())
            .with_agents(vec!["main".into(), "ops".into()]);
        assert!(mgr.send_to_agent("main", "ghost", "hi").is_err());
        assert!(mgr.send_to_agent("ops", "ops", "hi").is_err());
        assert!(mgr.send_to_agent("ops", "main", "").is_err());
    }
}
