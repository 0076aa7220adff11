//! Persistent error journal.
//!
//! Pipeline events that operators should see ("view recent errors") are kept
//! in a sled tree in insertion order, capped at [`MAX_ENTRIES`]. Every entry is
//! also emitted through `tracing` at the matching level.

use std::sync::OnceLock;

use chrono::Local;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sled::Tree;
use tracing::{debug, error, info, warn};

use crate::cache::SharedCache;
use crate::error::StorageError;

const TREE_JOURNAL: &str = "journal_entries";
const ENTRY_KEY_PAD: usize = 20;
pub const MAX_ENTRIES: usize = 1000;
const MAX_FIELD_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Error,
    Warning,
    Info,
    Debug,
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Level::Error => "error",
            Level::Warning => "warning",
            Level::Info => "info",
            Level::Debug => "debug",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub seq: u64,
    pub time: String,
    pub module: String,
    pub kind: String,
    pub description: String,
    pub level: Level,
}

#[derive(Clone)]
pub struct Journal {
    cache: SharedCache,
    entries: Tree,
}

impl Journal {
    pub fn new(cache: SharedCache) -> Result<Self, StorageError> {
        let entries = cache.db().open_tree(TREE_JOURNAL)?;
        Ok(Self { cache, entries })
    }

    /// Append an entry. Journal failures are reported through tracing only;
    /// recording an error must never raise another one.
    pub fn record(&self, module: &str, kind: &str, description: &str, level: Level) {
        let module = sanitize(module);
        let kind = sanitize(kind);
        let description = sanitize(description);

        match level {
            Level::Error => error!(module = %module, kind = %kind, "{}", description),
            Level::Warning => warn!(module = %module, kind = %kind, "{}", description),
            Level::Info => info!(module = %module, kind = %kind, "{}", description),
            Level::Debug => debug!(module = %module, kind = %kind, "{}", description),
        }

        if let Err(e) = self.append(module, kind, description, level) {
            warn!(error = %e, "Failed to write journal entry");
        }
    }

    fn append(
        &self,
        module: String,
        kind: String,
        description: String,
        level: Level,
    ) -> Result<(), StorageError> {
        let seq = self.cache.db().generate_id()?;
        let entry = JournalEntry {
            seq,
            time: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            module,
            kind,
            description,
            level,
        };
        self.entries
            .insert(encode_key(seq).as_bytes(), serde_json::to_vec(&entry)?)?;
        self.prune()
    }

    fn prune(&self) -> Result<(), StorageError> {
        let excess = self.entries.len().saturating_sub(MAX_ENTRIES);
        for _ in 0..excess {
            if self.entries.pop_min()?.is_none() {
                break;
            }
        }
        Ok(())
    }

    /// The `limit` most recent entries, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<JournalEntry>, StorageError> {
        let mut out = Vec::with_capacity(limit.min(MAX_ENTRIES));
        for result in self.entries.iter().rev().take(limit) {
            let (_, value) = result?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    /// Entries at `Error` level among the `window` most recent.
    pub fn recent_error_count(&self, window: usize) -> Result<usize, StorageError> {
        Ok(self
            .recent(window)?
            .iter()
            .filter(|e| e.level == Level::Error)
            .count())
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&self) -> Result<usize, StorageError> {
        let removed = self.entries.len();
        self.entries.clear()?;
        Ok(removed)
    }
}

fn encode_key(seq: u64) -> String {
    format!("{seq:0ENTRY_KEY_PAD$}")
}

fn ansi_escape() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("valid ANSI pattern"))
}

/// Strip ANSI escapes and control characters, cap the length.
fn sanitize(input: &str) -> String {
    ansi_escape()
        .replace_all(input, "")
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .take(MAX_FIELD_CHARS)
        .collect::<String>()
        .trim()
        .to_string()
}
