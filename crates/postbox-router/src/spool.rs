// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Directory-backed channel adapter.
//!
//! Inbound events are JSON files named `{cursor}.json` in the inbound
//! directory; the file stem is the cursor and, unless the file says
//! otherwise, the external id. Replies are written atomically as
//! `{id}.json` into the outbound directory for an external bridge to pick up.
//!
//! A poll never returns an event past one it could not read, so the router
//! cursor cannot skip it. An unreadable file that has not changed for
//! [`SETTLE_TIME`] is moved into `rejected/` under the inbound directory;
//! a younger one may still be being written and simply ends the batch.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use postbox_config::model::ChannelConfig;
use postbox_core::{
    ChannelAdapter, ChannelCapabilities, HealthStatus, InboundMessage, OutboundMessage,
    PluginAdapter, PostboxError,
};
use postbox_queue::atomic::{ensure_dir, write_json_atomic};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cursor::compare_cursors;

pub const SETTLE_TIME: Duration = Duration::from_secs(30);

pub struct SpoolChannel {
    name: String,
    inbound_dir: PathBuf,
    outbound_dir: PathBuf,
}

impl SpoolChannel {
    pub fn new(
        name: impl Into<String>,
        inbound_dir: impl Into<PathBuf>,
        outbound_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            inbound_dir: inbound_dir.into(),
            outbound_dir: outbound_dir.into(),
        }
    }

    pub fn from_config(config: &ChannelConfig) -> Self {
        Self::new(&config.name, &config.inbound_dir, &config.outbound_dir)
    }

    pub fn rejected_dir(&self) -> PathBuf {
        self.inbound_dir.join("rejected")
    }

    /// Move an unreadable event out of the way of the cursor.
    fn reject(&self, path: &Path, reason: &str) -> Result<(), PostboxError> {
        let dir = self.rejected_dir();
        ensure_dir(&dir)?;
        let Some(file_name) = path.file_name() else {
            return Err(PostboxError::Internal(format!("{} has no file name", path.display())));
        };
        let target = dir.join(file_name);
        std::fs::rename(path, &target).map_err(|e| PostboxError::store(path, e))?;
        warn!(channel = %self.name, path = %target.display(), %reason, "rejected unreadable spool event");
        Ok(())
    }

    fn read_event(path: &Path, cursor: &str) -> Result<InboundMessage, PostboxError> {
        let bytes = std::fs::read(path).map_err(|e| PostboxError::store(path, e))?;
        let mut value: Value =
            serde_json::from_slice(&bytes).map_err(|e| PostboxError::MalformedMessage {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let Value::Object(map) = &mut value else {
            return Err(PostboxError::MalformedMessage {
                path: path.to_path_buf(),
                reason: "expected a JSON object".into(),
            });
        };
        map.insert("cursor".into(), Value::String(cursor.to_string()));
        map.entry("external_id")
            .or_insert_with(|| Value::String(cursor.to_string()));
        serde_json::from_value(value).map_err(|e| PostboxError::MalformedMessage {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl PluginAdapter for SpoolChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn health_check(&self) -> Result<HealthStatus, PostboxError> {
        for dir in [&self.inbound_dir, &self.outbound_dir] {
            if !dir.is_dir() {
                return Ok(HealthStatus::Unhealthy(format!(
                    "{} is not a directory",
                    dir.display()
                )));
            }
        }
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), PostboxError> {
        Ok(())
    }
}

#[async_trait]
impl ChannelAdapter for SpoolChannel {
    fn capabilities(&self) -> ChannelCapabilities {
        ChannelCapabilities {
            max_message_length: None,
            supports_images: true,
            supports_topics: true,
        }
    }

    async fn connect(&mut self) -> Result<(), PostboxError> {
        ensure_dir(&self.inbound_dir)?;
        ensure_dir(&self.outbound_dir)
    }

    async fn poll(&self, cursor: Option<&str>) -> Result<Vec<InboundMessage>, PostboxError> {
        let entries = match std::fs::read_dir(&self.inbound_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PostboxError::store(&self.inbound_dir, e)),
        };

        let mut pending: Vec<(String, PathBuf)> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| {
                let stem = path.file_stem()?.to_str()?.to_string();
                (!stem.starts_with('.')).then_some((stem, path))
            })
            .filter(|(stem, _)| {
                cursor.is_none_or(|c| compare_cursors(stem, c) == std::cmp::Ordering::Greater)
            })
            .collect();
        pending.sort_by(|(a, _), (b, _)| compare_cursors(a, b));

        let mut events = Vec::with_capacity(pending.len());
        for (stem, path) in pending {
            match Self::read_event(&path, &stem) {
                Ok(event) => events.push(event),
                Err(e) if !is_settled(&path) => {
                    debug!(channel = %self.name, path = %path.display(), error = %e, "spool event not settled yet");
                    break;
                }
                Err(PostboxError::MalformedMessage { reason, .. }) => {
                    if let Err(e) = self.reject(&path, &reason) {
                        warn!(channel = %self.name, error = %e, "could not reject spool event");
                        break;
                    }
                }
                Err(e) => {
                    warn!(channel = %self.name, path = %path.display(), error = %e, "spool event unreadable");
                    break;
                }
            }
        }
        debug!(channel = %self.name, count = events.len(), "spool polled");
        Ok(events)
    }

    async fn send(&self, msg: OutboundMessage) -> Result<String, PostboxError> {
        let path = self.outbound_dir.join(format!("{}.json", msg.id));
        write_json_atomic(&path, &msg).map_err(|e| PostboxError::ChannelUnreachable {
            channel: self.name.clone(),
            message: e.to_string(),
        })?;
        Ok(msg.id.to_string())
    }
}

fn is_settled(path: &Path) -> bool {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
        .is_some_and(|age| age >= SETTLE_TIME)
}

#[cfg(test)]
mod tests {
    use postbox_core::{ChatId, MessageId};

    use super::*;

    fn spool() -> (SpoolChannel, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let channel = SpoolChannel::new("ops-spool", dir.path().join("in"), dir.path().join("out"));
        (channel, dir)
    }

    #[tokio::test]
    async fn poll_returns_events_after_cursor_in_order() {
        let (mut channel, dir) = spool();
        channel.connect().await.unwrap();
        let inbound = dir.path().join("in");
        std::fs::write(inbound.join("10.json"), r#"{"text": "ten", "chat_id": 5}"#).unwrap();
        std::fs::write(inbound.join("9.json"), r#"{"text": "nine"}"#).unwrap();
        std::fs::write(inbound.join("11.json"), "not json").unwrap();

        let all = channel.poll(None).await.unwrap();
        let texts: Vec<&str> = all.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["nine", "ten"]);
        assert_eq!(all[1].cursor, "10");
        assert_eq!(all[1].external_id, "10");
        assert_eq!(all[1].chat_id, Some(ChatId::Int(5)));

        let after = channel.poll(Some("9")).await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].text, "ten");
    }

    fn age(path: &Path, by: Duration) {
        std::fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(SystemTime::now() - by)
            .unwrap();
    }

    #[tokio::test]
    async fn fresh_unreadable_event_ends_the_batch() {
        let (mut channel, dir) = spool();
        channel.connect().await.unwrap();
        let inbound = dir.path().join("in");
        std::fs::write(inbound.join("1.json"), r#"{"text": "one"}"#).unwrap();
        std::fs::write(inbound.join("2.json"), r#"{"text": "tw"#).unwrap();
        std::fs::write(inbound.join("3.json"), r#"{"text": "three"}"#).unwrap();

        let events = channel.poll(None).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].cursor, "1");
        assert!(inbound.join("2.json").exists());
    }

    #[tokio::test]
    async fn settled_unreadable_event_is_rejected() {
        let (mut channel, dir) = spool();
        channel.connect().await.unwrap();
        let inbound = dir.path().join("in");
        std::fs::write(inbound.join("1.json"), r#"{"text": "one"}"#).unwrap();
        std::fs::write(inbound.join("2.json"), "not json").unwrap();
        age(&inbound.join("2.json"), Duration::from_secs(120));
        std::fs::write(inbound.join("3.json"), r#"{"text": "three"}"#).unwrap();

        let events = channel.poll(None).await.unwrap();
        let cursors: Vec<&str> = events.iter().map(|m| m.cursor.as_str()).collect();
        assert_eq!(cursors, vec!["1", "3"]);
        assert!(!inbound.join("2.json").exists());
        assert_eq!(
            std::fs::read_to_string(channel.rejected_dir().join("2.json")).unwrap(),
            "not json"
        );
    }

    #[tokio::test]
    async fn send_writes_outbound_file() {
        let (mut channel, dir) = spool();
        channel.connect().await.unwrap();
        let msg = OutboundMessage {
            id: MessageId("0000000000001_abcd1234".into()),
            channel: "ops-spool".into(),
            chat_id: ChatId::Text("C1".into()),
            topic: None,
            text: "pong".into(),
            agent: "ops".into(),
        };
        channel.send(msg).await.unwrap();
        let written = std::fs::read_to_string(
            dir.path().join("out").join("0000000000001_abcd1234.json"),
        )
        .unwrap();
        assert!(written.contains("pong"));
        assert_eq!(channel.health_check().await.unwrap(), HealthStatus::Healthy);
    }
}
