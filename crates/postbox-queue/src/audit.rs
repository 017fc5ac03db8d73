// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Append-only JSONL audit trail of queue mutations.

use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;

const REDACTED: &str = "[REDACTED]";
const SENSITIVE: &[&str] = &["token", "secret", "password", "api_key", "authorization"];

#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one entry. Failures are logged and swallowed.
    pub fn record(&self, action: &str, agent: &str, id: &str, details: Value) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "action": action,
            "agent": agent,
            "id": id,
            "details": redact(details),
        });
        if let Err(e) = self.append(&entry) {
            warn!(path = %self.path.display(), error = %e, "audit write failed");
        }
    }

    fn append(&self, entry: &Value) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)
    }
}

/// Replace values under sensitive-looking keys, recursively.
pub fn redact(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, v)| {
                    let lower = key.to_ascii_lowercase();
                    if SENSITIVE.iter().any(|s| lower.contains(s)) {
                        (key, Value::String(REDACTED.to_string()))
                    } else {
                        (key, redact(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(redact).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_nested_secrets() {
        let input = json!({
            "chat_id": 42,
            "Bot_Token": "123:abc",
            "nested": {"api_key": "sk-1", "ok": true},
            "list": [{"password": "hunter2"}]
        });
        let out = redact(input);
        assert_eq!(out["chat_id"], 42);
        assert_eq!(out["Bot_Token"], REDACTED);
        assert_eq!(out["nested"]["api_key"], REDACTED);
        assert_eq!(out["nested"]["ok"], true);
        assert_eq!(out["list"][0]["password"], REDACTED);
    }

    #[test]
    fn appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.jsonl"));
        log.record("enqueue", "main", "1", json!({"source": "telegram"}));
        log.record("processed", "main", "1", Value::Null);

        let content = std::fs::read_to_string(dir.path().join("audit.jsonl")).unwrap();
        let lines: Vec<Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["action"], "enqueue");
        assert_eq!(lines[1]["action"], "processed");
    }
}
