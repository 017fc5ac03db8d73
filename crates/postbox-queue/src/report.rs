// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Read-only queue reports: per-directory counts and conversation history.

use std::collections::BTreeMap;

use postbox_core::{Message, MessageId, PostboxError, QueueState};
use serde::Serialize;
use strum::IntoEnumIterator;

use crate::delivery::DeliveryManager;
use crate::store::id_from_path;

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub agent: String,
    /// File count per directory, keyed by state name.
    pub counts: BTreeMap<String, usize>,
    /// Pending inbox messages per source channel.
    pub inbox_by_source: BTreeMap<String, usize>,
    pub oldest_pending: Option<MessageId>,
}

impl QueueStats {
    pub fn count(&self, state: QueueState) -> usize {
        self.counts.get(&state.to_string()).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub chat_id: Option<String>,
    pub source: Option<String>,
    /// Case-insensitive substring of the message text.
    pub search: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl HistoryFilter {
    fn matches(&self, msg: &Message) -> bool {
        if let Some(chat) = &self.chat_id
            && msg.chat_id.as_ref().map(ToString::to_string).as_deref() != Some(chat.as_str())
        {
            return false;
        }
        if let Some(source) = &self.source
            && &msg.source != source
        {
            return false;
        }
        if let Some(needle) = &self.search
            && !msg.text.to_lowercase().contains(&needle.to_lowercase())
        {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    /// `processed` for inbound traffic, `sent` for replies.
    pub state: QueueState,
    #[serde(flatten)]
    pub message: Message,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    /// Matches before pagination.
    pub total: usize,
    pub entries: Vec<HistoryEntry>,
}

impl DeliveryManager {
    pub fn stats(&self, agent: &str) -> Result<QueueStats, PostboxError> {
        let mut counts = BTreeMap::new();
        for state in QueueState::iter() {
            counts.insert(state.to_string(), self.store.count(agent, state)?);
        }

        let inbox = self.store.list(agent, QueueState::Inbox)?;
        let oldest_pending = inbox.first().and_then(|p| id_from_path(p));
        let mut inbox_by_source = BTreeMap::new();
        for path in &inbox {
            // Unparseable files are counted under their directory only.
            if let Ok(msg) = self.store.read(path) {
                *inbox_by_source.entry(msg.source).or_insert(0) += 1;
            }
        }

        Ok(QueueStats {
            agent: agent.to_string(),
            counts,
            inbox_by_source,
            oldest_pending,
        })
    }

    /// Processed and sent messages, newest first.
    pub fn history(&self, agent: &str, filter: &HistoryFilter) -> Result<HistoryPage, PostboxError> {
        let mut matched = Vec::new();
        for state in [QueueState::Processed, QueueState::Sent] {
            for path in self.store.list(agent, state)? {
                let Ok(message) = self.store.read(&path) else {
                    continue;
                };
                if filter.matches(&message) {
                    matched.push(HistoryEntry { state, message });
                }
            }
        }
        matched.sort_by(|a, b| b.message.id.cmp(&a.message.id));

        let total = matched.len();
        let limit = if filter.limit == 0 { total } else { filter.limit };
        let entries = matched.into_iter().skip(filter.offset).take(limit).collect();
        Ok(HistoryPage { total, entries })
    }
}
