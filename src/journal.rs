//! In-memory journal entry store
//!
//! Entries are write-once, delete-whole: created only by `save_entry`,
//! immutable afterwards, removable individually or in bulk. Everything
//! here is transient and lost when the session ends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single saved, immutable block of journaled text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub id: Uuid,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Ordered collection of saved entries, most recently saved first.
#[derive(Debug, Default)]
pub struct EntryStore {
    entries: Vec<JournalEntry>,
}

impl EntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Save `text` as a new entry at the head of the collection.
    ///
    /// Empty or whitespace-only input saves nothing and returns `false`;
    /// the caller clears its input field only on success. The saved text
    /// keeps its original whitespace.
    pub fn save_entry(&mut self, text: &str) -> bool {
        if text.trim().is_empty() {
            log::debug!("Rejected empty journal entry");
            return false;
        }

        self.entries.insert(
            0,
            JournalEntry {
                id: Uuid::new_v4(),
                text: text.to_string(),
                timestamp: Utc::now(),
            },
        );
        log::info!(
            "Saved journal entry ({} chars, {} total)",
            text.len(),
            self.entries.len()
        );
        true
    }

    /// Remove the entry with matching id, if present. Absent ids are a
    /// silent no-op; surviving entries keep their relative order.
    pub fn delete_entry(&mut self, id: Uuid) {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        if self.entries.len() < before {
            log::info!("Deleted journal entry {}", id);
        } else {
            log::debug!("Delete ignored, no entry with id {}", id);
        }
    }

    /// Empty the collection unconditionally.
    pub fn clear_all(&mut self) {
        log::info!("Cleared {} journal entries", self.entries.len());
        self.entries.clear();
    }

    /// Entries in save order, newest first.
    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
