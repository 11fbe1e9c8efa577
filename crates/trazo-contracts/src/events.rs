use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

/// A line in the session log. The gallery task lifecycle is the whole
/// vocabulary; `item_id` is a first-class field so the file can be
/// filtered per item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionStarted {
        model: String,
    },
    ItemQueued {
        item_id: String,
        action: String,
    },
    ItemCompleted {
        item_id: String,
        action: String,
    },
    ItemError {
        item_id: String,
        action: String,
        error: String,
    },
}

impl SessionEvent {
    pub fn item_id(&self) -> Option<&str> {
        match self {
            SessionEvent::SessionStarted { .. } => None,
            SessionEvent::ItemQueued { item_id, .. }
            | SessionEvent::ItemCompleted { item_id, .. }
            | SessionEvent::ItemError { item_id, .. } => Some(item_id),
        }
    }
}

/// Append-only writer for `events.jsonl`. Each recorded event is stamped
/// with the session id and an RFC 3339 timestamp; the file handle is
/// opened on first use and kept for the life of the session.
#[derive(Debug, Clone)]
pub struct EventWriter {
    path: Arc<PathBuf>,
    session_id: Arc<str>,
    sink: Arc<Mutex<Option<File>>>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            path: Arc::new(path.into()),
            session_id: Arc::from(session_id.into()),
            sink: Arc::new(Mutex::new(None)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Writes one event as a compact JSON line and returns the stamped
    /// object as written.
    pub fn record(&self, event: SessionEvent) -> anyhow::Result<Value> {
        let mut stamped = serde_json::to_value(&event)?;
        let fields = stamped
            .as_object_mut()
            .context("session event did not serialize to an object")?;
        fields.insert(
            "session_id".to_string(),
            Value::String(self.session_id.to_string()),
        );
        fields.insert("ts".to_string(), Value::String(now_utc_iso()));
        let line = serde_json::to_string(&stamped)?;

        let mut guard = self
            .sink
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        if guard.is_none() {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.path.as_ref())
                .with_context(|| format!("failed to open {}", self.path.display()))?;
            *guard = Some(file);
        }
        if let Some(file) = guard.as_mut() {
            file.write_all(line.as_bytes())?;
            file.write_all(b"\n")?;
        }

        Ok(stamped)
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;
    use serde_json::Value;

    use super::{EventWriter, SessionEvent};

    #[test]
    fn recorded_events_carry_type_item_and_session_stamps() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "session-123");

        let stamped = writer.record(SessionEvent::ItemQueued {
            item_id: "100".to_string(),
            action: "generate".to_string(),
        })?;

        let content = fs::read_to_string(&path)?;
        let parsed: Value = serde_json::from_str(content.lines().next().unwrap_or(""))?;
        assert_eq!(parsed, stamped);
        assert_eq!(parsed["type"], Value::String("item_queued".to_string()));
        assert_eq!(parsed["item_id"], Value::String("100".to_string()));
        assert_eq!(parsed["action"], Value::String("generate".to_string()));
        assert_eq!(parsed["session_id"], Value::String("session-123".to_string()));
        DateTime::parse_from_rfc3339(parsed["ts"].as_str().unwrap_or(""))?;
        Ok(())
    }

    #[test]
    fn error_events_keep_the_failure_text() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "session-123");

        let stamped = writer.record(SessionEvent::ItemError {
            item_id: "100".to_string(),
            action: "improve".to_string(),
            error: "service error (500)".to_string(),
        })?;

        assert_eq!(stamped["type"], Value::String("item_error".to_string()));
        assert_eq!(
            stamped["error"],
            Value::String("service error (500)".to_string())
        );
        Ok(())
    }

    #[test]
    fn a_session_appends_one_line_per_event_in_order() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("logs").join("events.jsonl");
        let writer = EventWriter::new(&path, "session-123");

        writer.record(SessionEvent::SessionStarted {
            model: "test-model".to_string(),
        })?;
        writer.record(SessionEvent::ItemQueued {
            item_id: "100".to_string(),
            action: "generate".to_string(),
        })?;
        writer.record(SessionEvent::ItemCompleted {
            item_id: "100".to_string(),
            action: "generate".to_string(),
        })?;

        let content = fs::read_to_string(&path)?;
        let types: Vec<String> = content
            .lines()
            .map(|line| serde_json::from_str::<Value>(line).unwrap()["type"].to_string())
            .collect();
        assert_eq!(
            types,
            ["\"session_started\"", "\"item_queued\"", "\"item_completed\""]
        );
        Ok(())
    }

    #[test]
    fn item_id_is_exposed_for_lifecycle_events_only() {
        let started = SessionEvent::SessionStarted {
            model: "test-model".to_string(),
        };
        let queued = SessionEvent::ItemQueued {
            item_id: "100".to_string(),
            action: "generate".to_string(),
        };
        assert_eq!(started.item_id(), None);
        assert_eq!(queued.item_id(), Some("100"));
    }
}
