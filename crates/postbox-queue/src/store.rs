// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Queue store: one JSON file per message, state encoded by directory.
//!
//! All state changes go through [`QueueStore::transition`], which consults
//! the lifecycle table before renaming a file. No other code in the
//! workspace touches message directories directly.

use std::path::{Path, PathBuf};

use postbox_core::{Message, MessageId, MessageKind, PostboxError, QueueState, Trigger};
use strum::IntoEnumIterator;
use tracing::debug;

use crate::atomic::{create_atomic, ensure_dir, read_json, safe_move, write_atomic, MoveOutcome};
use crate::layout::{check_agent, QueueLayout};

const SUFFIXES: &[&str] = &["_self", "_consolidation"];

/// Outcome of a lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transitioned {
    /// The file moved from `from` to `to` during this call.
    Moved {
        from: QueueState,
        to: QueueState,
        path: PathBuf,
    },
    /// The file was already in the target state.
    AlreadyThere { to: QueueState, path: PathBuf },
    /// No file with this id exists for the agent.
    Missing,
}

#[derive(Debug, Clone)]
pub struct QueueStore {
    layout: QueueLayout,
}

impl QueueStore {
    pub fn new(layout: QueueLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &QueueLayout {
        &self.layout
    }

    /// Write a new message file into `state`. The id must already be assigned.
    pub fn insert(
        &self,
        agent: &str,
        state: QueueState,
        msg: &Message,
    ) -> Result<PathBuf, PostboxError> {
        check_agent(agent)?;
        MessageId::parse(msg.id.as_str())?;
        let dir = self.layout.dir(agent, state);
        ensure_dir(&dir)?;
        let path = dir.join(msg.file_name());
        let bytes = serde_json::to_vec_pretty(msg)
            .map_err(|e| PostboxError::Internal(format!("serialize message {}: {e}", msg.id)))?;
        create_atomic(&path, &bytes)?;
        Ok(path)
    }

    /// Message files in `state`, sorted by id. A missing directory is empty.
    pub fn list(&self, agent: &str, state: QueueState) -> Result<Vec<PathBuf>, PostboxError> {
        check_agent(agent)?;
        let dir = self.layout.dir(agent, state);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PostboxError::store(&dir, e)),
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| is_message_file(path))
            .collect();
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(files)
    }

    pub fn count(&self, agent: &str, state: QueueState) -> Result<usize, PostboxError> {
        Ok(self.list(agent, state)?.len())
    }

    /// Parse a message file. The id is taken from the file name.
    pub fn read(&self, path: &Path) -> Result<Message, PostboxError> {
        let mut msg: Message = read_json(path)?.ok_or_else(|| {
            PostboxError::NotFound(format!("message file {}", path.display()))
        })?;
        if let Some(id) = id_from_path(path) {
            msg.id = id;
        }
        Ok(msg)
    }

    /// Find the file for `id` among `states`.
    pub fn locate(
        &self,
        agent: &str,
        id: &MessageId,
        states: &[QueueState],
    ) -> Option<(QueueState, PathBuf)> {
        states.iter().find_map(|state| {
            let dir = self.layout.dir(agent, *state);
            candidate_names(id)
                .into_iter()
                .map(|name| dir.join(name))
                .find(|path| path.is_file())
                .map(|path| (*state, path))
        })
    }

    /// Apply `trigger` to message `id`, moving its file to the resulting state.
    pub fn transition(
        &self,
        agent: &str,
        id: &MessageId,
        trigger: Trigger,
    ) -> Result<Transitioned, PostboxError> {
        check_agent(agent)?;
        let sources = QueueState::sources_of(trigger);

        if let Some((from, path)) = self.locate(agent, id, &sources) {
            let to = from.apply(trigger)?;
            let file_name = path
                .file_name()
                .ok_or_else(|| PostboxError::Internal(format!("{} has no file name", path.display())))?;
            let dest = self.layout.dir(agent, to).join(file_name);
            return match safe_move(&path, &dest)? {
                MoveOutcome::Moved => {
                    debug!(agent, %id, %from, %to, "message moved");
                    Ok(Transitioned::Moved { from, to, path: dest })
                }
                MoveOutcome::AlreadyMoved => Ok(Transitioned::AlreadyThere { to, path: dest }),
                MoveOutcome::Missing => Ok(Transitioned::Missing),
            };
        }

        let targets: Vec<QueueState> = sources
            .iter()
            .filter_map(|s| s.apply(trigger).ok())
            .collect();
        if let Some((to, path)) = self.locate(agent, id, &targets) {
            return Ok(Transitioned::AlreadyThere { to, path });
        }

        let everywhere: Vec<QueueState> = QueueState::iter().collect();
        match self.locate(agent, id, &everywhere) {
            Some((from, _)) => Err(PostboxError::IllegalTransition { from, trigger }),
            None => Ok(Transitioned::Missing),
        }
    }

    /// Replace a message file in a terminal or parked directory.
    ///
    /// Only used to annotate dead-lettered messages; live files are never rewritten.
    pub(crate) fn annotate(&self, path: &Path, msg: &Message) -> Result<(), PostboxError> {
        let bytes = serde_json::to_vec_pretty(msg)
            .map_err(|e| PostboxError::Internal(format!("serialize message {}: {e}", msg.id)))?;
        write_atomic(path, &bytes)
    }
}

fn is_message_file(path: &Path) -> bool {
    let visible = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| !n.starts_with('.'));
    visible && path.extension().is_some_and(|ext| ext == "json") && path.is_file()
}

fn candidate_names(id: &MessageId) -> Vec<String> {
    let mut names = vec![format!("{id}.json")];
    names.extend(SUFFIXES.iter().map(|s| format!("{id}{s}.json")));
    names
}

/// Recover the message id from a file name, dropping the kind suffix.
pub fn id_from_path(path: &Path) -> Option<MessageId> {
    let stem = path.file_stem()?.to_str()?;
    let id = SUFFIXES
        .iter()
        .find_map(|s| stem.strip_suffix(s))
        .unwrap_or(stem);
    Some(MessageId(id.to_string()))
}

/// Whether a file name marks a synthetic message of `kind`.
pub fn has_kind_suffix(path: &Path, kind: MessageKind) -> bool {
    let suffix = kind.file_suffix();
    !suffix.is_empty()
        && path
            .file_stem()
            .and_then(|s| s.to_str())
            .is_some_and(|s| s.ends_with(suffix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::next_id;

    fn store() -> (QueueStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (QueueStore::new(QueueLayout::new(dir.path(), "main")), dir)
    }

    fn message(kind: MessageKind) -> Message {
        let mut msg = Message::text("telegram", "hi").with_kind(kind);
        msg.id = next_id();
        msg
    }

    #[test]
    fn list_is_sorted_and_skips_temp_files() {
        let (store, _dir) = store();
        let a = message(MessageKind::Text);
        let b = message(MessageKind::SelfCheck);
        let c = message(MessageKind::Text);
        // Insert out of order.
        store.insert("main", QueueState::Inbox, &c).unwrap();
        store.insert("main", QueueState::Inbox, &a).unwrap();
        store.insert("main", QueueState::Inbox, &b).unwrap();
        let inbox = store.layout().dir("main", QueueState::Inbox);
        std::fs::write(inbox.join(".postbox-x.tmp"), "partial").unwrap();
        std::fs::write(inbox.join("notes.txt"), "ignored").unwrap();

        let ids: Vec<MessageId> = store
            .list("main", QueueState::Inbox)
            .unwrap()
            .iter()
            .filter_map(|p| id_from_path(p))
            .collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
    }

    #[test]
    fn transition_follows_the_table() {
        let (store, _dir) = store();
        let msg = message(MessageKind::Text);
        store.insert("main", QueueState::Inbox, &msg).unwrap();

        let moved = store.transition("main", &msg.id, Trigger::Ack).unwrap();
        assert!(matches!(
            moved,
            Transitioned::Moved {
                from: QueueState::Inbox,
                to: QueueState::Processed,
                ..
            }
        ));

        let again = store.transition("main", &msg.id, Trigger::Ack).unwrap();
        assert!(matches!(
            again,
            Transitioned::AlreadyThere {
                to: QueueState::Processed,
                ..
            }
        ));

        let err = store.transition("main", &msg.id, Trigger::Requeue).unwrap_err();
        assert!(matches!(err, PostboxError::IllegalTransition { .. }));
    }

    #[test]
    fn dead_letter_cannot_skip_requeue() {
        let (store, _dir) = store();
        let msg = message(MessageKind::Text);
        store.insert("main", QueueState::DeadLetter, &msg).unwrap();

        let err = store.transition("main", &msg.id, Trigger::Retry).unwrap_err();
        assert!(matches!(
            err,
            PostboxError::IllegalTransition {
                from: QueueState::DeadLetter,
                trigger: Trigger::Retry
            }
        ));
        assert!(matches!(
            store.transition("main", &msg.id, Trigger::Requeue).unwrap(),
            Transitioned::Moved {
                to: QueueState::Inbox,
                ..
            }
        ));
    }

    #[test]
    fn suffixed_files_are_found_by_id() {
        let (store, _dir) = store();
        let msg = message(MessageKind::SelfCheck);
        let path = store.insert("ops", QueueState::Inbox, &msg).unwrap();
        assert!(path.ends_with(format!("ops-inbox/{}_self.json", msg.id)));
        assert!(has_kind_suffix(&path, MessageKind::SelfCheck));
        assert_eq!(id_from_path(&path), Some(msg.id.clone()));

        let found = store.locate("ops", &msg.id, &[QueueState::Inbox]);
        assert_eq!(found.map(|(s, _)| s), Some(QueueState::Inbox));
    }

    #[test]
    fn missing_id_is_reported_not_errored() {
        let (store, _dir) = store();
        let id = next_id();
        assert_eq!(
            store.transition("main", &id, Trigger::Ack).unwrap(),
            Transitioned::Missing
        );
    }

    #[test]
    fn duplicate_insert_fails() {
        let (store, _dir) = store();
        let msg = message(MessageKind::Text);
        store.insert("main", QueueState::Inbox, &msg).unwrap();
        assert!(store.insert("main", QueueState::Inbox, &msg).is_err());
    }
}
