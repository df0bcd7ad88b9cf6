//! The shared transcript of a session.
//!
//! A [`Transcript`] is an append-only log of [`TranscriptEntry`] values. Insertion order is
//! conversation order, and each entry carries a zero-based `sequence` equal to its position.
//! Entries cannot be edited or removed once appended; only the
//! [`TurnScheduler`](crate::scheduler::TurnScheduler) and the
//! [`SessionDriver`](crate::session::SessionDriver) append, so outside the crate a transcript is
//! read-only.
//!
//! # Example
//!
//! ```
//! use tripcrew::transcript::Transcript;
//!
//! let transcript = Transcript::new();
//! assert!(transcript.is_empty());
//! assert!(transcript.last_from("Report_Writer_Agent").is_none());
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// One completed turn. Immutable once appended.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptEntry {
    speaker: Arc<str>,
    content: Arc<str>,
    sequence: usize,
    timestamp: DateTime<Utc>,
}

impl TranscriptEntry {
    /// Name of the registered role that produced this entry.
    pub fn speaker(&self) -> &str {
        &self.speaker
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Zero-based position in the transcript.
    pub fn sequence(&self) -> usize {
        self.sequence
    }

    /// UTC time at which the entry was appended.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Append-only ordered log of turns.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a complete turn. Callers guarantee `speaker` is a registered role.
    pub(crate) fn append(&mut self, speaker: &str, content: impl AsRef<str>) -> &TranscriptEntry {
        let sequence = self.entries.len();
        self.entries.push(TranscriptEntry {
            speaker: Arc::from(speaker),
            content: Arc::from(content.as_ref()),
            sequence,
            timestamp: Utc::now(),
        });
        &self.entries[sequence]
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&TranscriptEntry> {
        self.entries.last()
    }

    /// Most recent entry spoken by `speaker`, scanning from the end.
    pub fn last_from(&self, speaker: &str) -> Option<&TranscriptEntry> {
        self.entries.iter().rev().find(|e| e.speaker() == speaker)
    }

    /// Speaker names in conversation order.
    pub fn speakers(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.speaker()).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TranscriptEntry> {
        self.entries.iter()
    }

    /// Serialize the transcript for auditing.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl<'a> IntoIterator for &'a Transcript {
    type Item = &'a TranscriptEntry;
    type IntoIter = std::slice::Iter<'a, TranscriptEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
