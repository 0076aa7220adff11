//! The output artifact: rendering it for the writer and reading it back for
//! the public feed.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::degrade::placeholder_items;
use crate::error::StorageError;
use crate::response::sanitize::to_plain_text;
use crate::response::score::clamp_explicit;
use crate::response::GeneratedItem;

/// Bytes of the artifact read when serving the feed.
pub const MAX_FEED_BYTES: u64 = 50_000;
pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 50;

/// Pretty-printed UTF-8 JSON array, the on-disk artifact format.
pub fn render(items: &[GeneratedItem]) -> Result<Vec<u8>, StorageError> {
    let mut bytes = serde_json::to_vec_pretty(items)?;
    bytes.push(b'\n');
    Ok(bytes)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedItem {
    pub tid: String,
    pub tekst: String,
    pub score: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct Feed {
    pub items: Vec<FeedItem>,
    pub fallback: bool,
    /// Why the fallback was served: `missing` or `invalid`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Feed {
    fn fallback(reason: &str) -> Self {
        Self {
            items: placeholder_items()
                .into_iter()
                .map(|item| FeedItem {
                    tid: item.tid,
                    tekst: item.tekst,
                    score: item.score,
                })
                .collect(),
            fallback: true,
            reason: Some(reason.to_string()),
        }
    }
}

pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

/// Read up to `limit` items from the artifact at `path`. Never fails: a
/// missing or unusable artifact yields the placeholder feed.
pub fn read_feed(path: &Path, limit: Option<usize>) -> Feed {
    let limit = clamp_limit(limit);
    let raw = match read_capped(path) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Feed::fallback("missing"),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Feed artifact unreadable");
            return Feed::fallback("invalid");
        }
    };

    let Ok(Value::Array(entries)) = serde_json::from_slice::<Value>(&raw) else {
        warn!(path = %path.display(), "Feed artifact is not a JSON array");
        return Feed::fallback("invalid");
    };

    Feed {
        items: entries.iter().take(limit).filter_map(project).collect(),
        fallback: false,
        reason: None,
    }
}

fn read_capped(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut raw = Vec::new();
    file.take(MAX_FEED_BYTES).read_to_end(&mut raw)?;
    Ok(Some(raw))
}

fn project(entry: &Value) -> Option<FeedItem> {
    let obj = entry.as_object()?;
    let tekst = to_plain_text(obj.get("tekst")?.as_str()?);
    if tekst.is_empty() {
        return None;
    }
    let tid = obj
        .get("tid")
        .and_then(Value::as_str)
        .map(to_plain_text)
        .unwrap_or_default();
    let score = obj.get("score").map_or(0, clamp_explicit);
    Some(FeedItem { tid, tekst, score })
}
