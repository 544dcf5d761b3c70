use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

pub const OVERLAY_STARTED: &str = "overlay_started";
pub const IMAGE_REPLACED: &str = "image_replaced";
pub const IMAGE_FALLBACK: &str = "image_fallback";
pub const IMAGE_UNCHANGED: &str = "image_unchanged";
pub const IMAGE_LOAD_FAILED: &str = "image_load_failed";
pub const OVERLAY_FINISHED: &str = "overlay_finished";
pub const IMAGES_RESTORED: &str = "images_restored";

const RESERVED_KEYS: [&str; 3] = ["type", "session_id", "ts"];

/// One journal line. `details` is flattened next to the envelope fields and
/// never shadows them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JournalEntry {
    #[serde(rename = "type")]
    pub event_type: String,
    pub session_id: String,
    pub ts: String,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// Append-only JSONL journal of overlay activity for one page session.
/// Clones write through the same open file.
#[derive(Debug, Clone)]
pub struct ActivityJournal {
    inner: Arc<JournalInner>,
}

#[derive(Debug)]
struct JournalInner {
    path: PathBuf,
    session_id: String,
    file: Mutex<Option<File>>,
}

impl ActivityJournal {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(JournalInner {
                path: path.into(),
                session_id: session_id.into(),
                file: Mutex::new(None),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn entry(&self, event_type: &str, details: Value) -> JournalEntry {
        let mut details = match details {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => Map::from_iter([("detail".to_string(), other)]),
        };
        details.retain(|key, _| !RESERVED_KEYS.contains(&key.as_str()));
        JournalEntry {
            event_type: event_type.to_string(),
            session_id: self.inner.session_id.clone(),
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            details,
        }
    }

    /// Journal trouble is logged and swallowed; overlay work never waits on it.
    pub fn record(&self, event_type: &str, details: Value) {
        let entry = self.entry(event_type, details);
        if let Err(err) = self.append(&entry) {
            tracing::warn!(
                event_type,
                path = %self.inner.path.display(),
                error = %format!("{err:#}"),
                "activity journal write failed"
            );
        }
    }

    fn append(&self, entry: &JournalEntry) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut slot = self
            .inner
            .file
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(open_append(&self.inner.path)?);
        }
        if let Some(file) = slot.as_mut() {
            file.write_all(&line)
                .with_context(|| format!("failed to append to {}", self.inner.path.display()))?;
        }
        Ok(())
    }
}

fn open_append(path: &Path) -> anyhow::Result<File> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))
}

/// Reads a journal back, skipping lines that are not JSON objects.
pub fn read_journal(path: &Path) -> anyhow::Result<Vec<Map<String, Value>>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(raw
        .lines()
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter_map(|row| match row {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect())
}
