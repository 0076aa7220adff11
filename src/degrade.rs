//! Graceful degradation after a failed run.
//!
//! A failed run still leaves a renderable feed behind: the last good items
//! from the offline snapshot when there are any, otherwise a fixed pair of
//! placeholders.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Local;
use serde::Serialize;
use tracing::warn;

use crate::cache::SharedCache;
use crate::error::PipelineError;
use crate::feed;
use crate::journal::{Journal, Level};
use crate::response::score::context_score;
use crate::response::{time_label_now, timestamp_now, GeneratedItem};
use crate::writer::AtomicWriter;

/// Cache key of the last accepted items.
pub const OFFLINE_SNAPSHOT_KEY: &str = "offline_news_cache";
pub const OFFLINE_SNAPSHOT_TTL: Duration = Duration::from_secs(7 * 24 * 3600);
const OFFLINE_ITEMS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradeTier {
    OfflineCache,
    OfflineFallback,
}

impl DegradeTier {
    pub fn code(&self) -> &'static str {
        match self {
            DegradeTier::OfflineCache => "offline_cache",
            DegradeTier::OfflineFallback => "offline_fallback",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DegradeOutcome {
    pub tier: DegradeTier,
    /// Whether the substitute items reached the artifact
    pub persisted: bool,
    pub items: Vec<GeneratedItem>,
}

/// The static two-item feed used when nothing better exists.
pub fn placeholder_items() -> Vec<GeneratedItem> {
    let now = Local::now();
    let later = now + chrono::Duration::minutes(1);
    [
        (now, "Nattevakten holder vakt mens byen sover.", 50),
        (later, "Alt er rolig i nattens stillhet.", 25),
    ]
    .into_iter()
    .map(|(at, line, score)| {
        let tid = at.format("%H:%M").to_string();
        let tekst = format!("kl {} – Pjuskeby – {}", tid, line);
        let context = context_score(&tekst);
        GeneratedItem::new(tid, tekst, score, context)
    })
    .collect()
}

#[derive(Clone)]
pub struct Degrader {
    cache: SharedCache,
    journal: Journal,
    writer: AtomicWriter,
    output_path: PathBuf,
}

impl Degrader {
    pub fn new(
        cache: SharedCache,
        journal: Journal,
        writer: AtomicWriter,
        output_path: PathBuf,
    ) -> Self {
        Self {
            cache,
            journal,
            writer,
            output_path,
        }
    }

    /// Replace the offline snapshot with freshly accepted items.
    pub fn seed_snapshot(&self, items: &[GeneratedItem]) {
        if items.is_empty() {
            return;
        }
        if let Err(e) = self
            .cache
            .set(OFFLINE_SNAPSHOT_KEY, &items, Some(OFFLINE_SNAPSHOT_TTL))
        {
            warn!(error = %e, "Failed to seed offline snapshot");
        }
    }

    pub fn snapshot(&self) -> Vec<GeneratedItem> {
        match self.cache.get::<Vec<GeneratedItem>>(OFFLINE_SNAPSHOT_KEY) {
            Ok(items) => items.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Offline snapshot unreadable");
                Vec::new()
            }
        }
    }

    /// Record `error` and leave the best available substitute feed behind.
    pub fn degrade(&self, error: &PipelineError) -> DegradeOutcome {
        self.journal
            .record(error.module(), error.code(), &error.to_string(), Level::Error);

        let snapshot = self.snapshot();
        let (tier, items) = if snapshot.is_empty() {
            (DegradeTier::OfflineFallback, placeholder_items())
        } else {
            let tid = time_label_now();
            let generated_at = timestamp_now();
            let items = snapshot
                .into_iter()
                .take(OFFLINE_ITEMS)
                .map(|mut item| {
                    item.tid = tid.clone();
                    item.generated_at = generated_at.clone();
                    item
                })
                .collect();
            (DegradeTier::OfflineCache, items)
        };

        let persisted = self.persist(&items);
        match tier {
            DegradeTier::OfflineCache => self.journal.record(
                "degrade",
                "offline_mode",
                "Serving cached items after generation failure",
                Level::Info,
            ),
            DegradeTier::OfflineFallback => self.journal.record(
                "degrade",
                "offline_fallback",
                "Serving placeholder items after generation failure",
                Level::Warning,
            ),
        }
        DegradeOutcome {
            tier,
            persisted,
            items,
        }
    }

    fn persist(&self, items: &[GeneratedItem]) -> bool {
        match feed::render(items) {
            Ok(bytes) => self.writer.write(&self.output_path, &bytes),
            Err(e) => {
                warn!(error = %e, "Failed to render substitute feed");
                false
            }
        }
    }
}
