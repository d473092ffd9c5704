//! Fallback persistence for topics without subscribers
//!
//! Each event becomes one indented JSON file under `<root>/<topic>/`, named
//! `<topic>-<subject>-<timestamp>.json`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use eg_common::{Event, SimulatorError, TopicSettings};
use tracing::debug;

use crate::Result;

/// Last timestamp handed out, process-wide
static LAST_TIMESTAMP: AtomicI64 = AtomicI64::new(0);

/// Stores events that no subscriber will receive
#[async_trait]
pub trait FallbackStore: Send + Sync {
    /// Persist `event` for `topic`, returning where it was written.
    async fn persist(&self, topic: &TopicSettings, event: &Event) -> Result<PathBuf>;
}

/// File-per-event store rooted at a (usually temporary) directory
#[derive(Debug, Clone)]
pub struct TempFolderStore {
    root: PathBuf,
}

impl TempFolderStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the files of one topic
    pub fn topic_dir(&self, topic: &TopicSettings) -> PathBuf {
        self.root.join(sanitize_file_component(&topic.name))
    }
}

#[async_trait]
impl FallbackStore for TempFolderStore {
    async fn persist(&self, topic: &TopicSettings, event: &Event) -> Result<PathBuf> {
        let dir = self.topic_dir(topic);
        let persistence_failed = |path: &Path, reason: String| SimulatorError::PersistenceFailed {
            event_id: event.id.clone(),
            path: path.display().to_string(),
            reason,
        };

        // create_dir_all succeeds when another task created it first
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| persistence_failed(dir.as_path(), e.to_string()))?;

        let path = dir.join(file_name(&topic.name, &event.subject, next_timestamp()));
        let json = event
            .to_pretty_json()
            .map_err(|e| persistence_failed(path.as_path(), e.to_string()))?;

        tokio::fs::write(&path, json)
            .await
            .map_err(|e| persistence_failed(path.as_path(), e.to_string()))?;

        debug!(event_id = %event.id, path = %path.display(), "Event written to fallback store");
        Ok(path)
    }
}

/// Nanoseconds since the Unix epoch, strictly increasing across calls
pub fn next_timestamp() -> i64 {
    let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX - 1);
    let next = |last: i64| now.max(last + 1);

    match LAST_TIMESTAMP.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(next(last))) {
        Ok(previous) | Err(previous) => next(previous),
    }
}

/// Longest subject fragment kept in a file name, in chars
const MAX_SUBJECT_CHARS: usize = 100;

fn file_name(topic: &str, subject: &str, timestamp: i64) -> String {
    let subject = sanitize_file_component(subject);
    format!(
        "{}-{}-{}.json",
        sanitize_file_component(topic),
        truncate_chars(&subject, MAX_SUBJECT_CHARS),
        timestamp
    )
}

fn truncate_chars(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((end, _)) => &value[..end],
        None => value,
    }
}

/// Replace characters that are not safe in a single path component
pub fn sanitize_file_component(value: &str) -> String {
    let sanitized: String = value
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if matches!(sanitized.as_str(), "" | "." | "..") {
        "_".repeat(sanitized.len().max(1))
    } else {
        sanitized
    }
}
