//! Context loading: reads the lore sources, validates them, and signs the
//! assembled bundle with a keyed hash before caching it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::cache::SharedCache;
use crate::error::{PipelineError, StorageError};
use crate::journal::{Journal, Level};
use crate::sources::{SourceShape, SourceSpec, EDITORIAL, MAX_SOURCE_BYTES, SOURCES};

const KEY_CONTEXT: &str = "nattevakt context bundle integrity v1";

/// Records inspected when deciding whether a source is usable.
const IDENTIFIER_PROBE: usize = 3;

/// Assembled context for one generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBundle {
    #[serde(flatten)]
    pub categories: BTreeMap<String, Value>,

    #[serde(rename = "_loaded_files")]
    pub loaded_files: Vec<String>,

    #[serde(rename = "_timestamp")]
    pub timestamp: i64,

    #[serde(rename = "_integrity")]
    pub integrity: String,
}

impl ContextBundle {
    /// Canonical bytes covered by the integrity hash: everything except the
    /// hash itself, with object keys sorted.
    fn canonical_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&json!({
            "categories": self.categories,
            "loaded_files": self.loaded_files,
            "timestamp": self.timestamp,
        }))
    }

    pub fn category(&self, name: &str) -> Option<&Value> {
        self.categories.get(name)
    }
}

pub struct ContextLoader {
    data_dir: PathBuf,
    cache: SharedCache,
    journal: Journal,
    key: [u8; 32],
    ttl: Duration,
}

impl ContextLoader {
    /// `secret` is the configured key material; without one the cache's
    /// installation secret is used.
    pub fn new(
        data_dir: PathBuf,
        cache: SharedCache,
        journal: Journal,
        secret: Option<&str>,
        ttl: Duration,
    ) -> Result<Self, StorageError> {
        let key = match secret {
            Some(s) if !s.is_empty() => blake3::derive_key(KEY_CONTEXT, s.as_bytes()),
            _ => blake3::derive_key(KEY_CONTEXT, &cache.installation_secret()?),
        };
        Ok(Self {
            data_dir,
            cache,
            journal,
            key,
            ttl,
        })
    }

    /// Cache key, qualified by crate version so upgrades never read an old layout.
    pub fn cache_key() -> String {
        format!("context_bundle_v{}", env!("CARGO_PKG_VERSION"))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Return the cached bundle when present and intact, otherwise rebuild.
    pub fn load_context(&self) -> Result<ContextBundle, PipelineError> {
        match self.cache.get::<ContextBundle>(&Self::cache_key()) {
            Ok(Some(bundle)) => match self.verify(&bundle) {
                Ok(()) => {
                    debug!("Context bundle served from cache");
                    return Ok(bundle);
                }
                Err(e) => self.journal.record(
                    "context",
                    e.code(),
                    "Cached context bundle failed verification, rebuilding",
                    Level::Warning,
                ),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Unreadable cached context bundle, rebuilding"),
        }

        let bundle = self.build()?;
        if let Err(e) = self.cache.set(&Self::cache_key(), &bundle, Some(self.ttl)) {
            warn!(error = %e, "Failed to cache context bundle");
        }
        Ok(bundle)
    }

    /// Read every source and sign the result. Unusable sources are skipped.
    pub fn build(&self) -> Result<ContextBundle, PipelineError> {
        let mut categories = BTreeMap::new();
        let mut loaded_files = Vec::new();

        for spec in SOURCES {
            match self.read_source(spec) {
                Some(data) => {
                    categories.insert(spec.category.to_string(), data);
                    loaded_files.push(spec.file.to_string());
                }
                None if spec.category == EDITORIAL => {
                    categories.insert(spec.category.to_string(), spec.default_data());
                }
                None => {}
            }
        }

        let mut bundle = ContextBundle {
            categories,
            loaded_files,
            timestamp: Utc::now().timestamp(),
            integrity: String::new(),
        };
        bundle.integrity = self.sign(&bundle)?.to_hex().to_string();
        Ok(bundle)
    }

    fn sign(&self, bundle: &ContextBundle) -> Result<blake3::Hash, PipelineError> {
        let bytes = bundle
            .canonical_bytes()
            .map_err(|e| PipelineError::Storage(e.into()))?;
        Ok(blake3::keyed_hash(&self.key, &bytes))
    }

    /// Recompute the hash and compare in constant time.
    pub fn verify(&self, bundle: &ContextBundle) -> Result<(), PipelineError> {
        let stored =
            blake3::Hash::from_hex(&bundle.integrity).map_err(|_| PipelineError::IntegrityMismatch)?;
        if self.sign(bundle)? == stored {
            Ok(())
        } else {
            Err(PipelineError::IntegrityMismatch)
        }
    }

    fn read_source(&self, spec: &SourceSpec) -> Option<Value> {
        let path = self.data_dir.join(spec.file);
        match std::fs::metadata(&path) {
            Ok(meta) if meta.len() > MAX_SOURCE_BYTES => {
                self.skip(spec, &format!("{} bytes exceeds {} byte limit", meta.len(), MAX_SOURCE_BYTES));
                return None;
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.warn_source(spec, "missing_file", "file is missing");
                return None;
            }
            Err(e) => {
                self.skip(spec, &format!("unreadable: {}", e));
                return None;
            }
        }

        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                self.skip(spec, &format!("unreadable: {}", e));
                return None;
            }
        };
        let data: Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                self.skip(spec, &format!("invalid JSON: {}", e));
                return None;
            }
        };

        let usable = match spec.shape {
            SourceShape::Records => data.as_array().map_or(false, |items| {
                items
                    .iter()
                    .take(IDENTIFIER_PROBE)
                    .any(|r| spec.has_identifier(r))
            }),
            SourceShape::Document => spec.has_identifier(&data),
        };
        if !usable {
            self.skip(spec, "no usable records");
            return None;
        }
        Some(data)
    }

    fn skip(&self, spec: &SourceSpec, reason: &str) {
        self.warn_source(spec, "source_skipped", reason);
    }

    fn warn_source(&self, spec: &SourceSpec, kind: &str, reason: &str) {
        self.journal.record(
            "context",
            kind,
            &format!("{}: {}", spec.file, reason),
            Level::Warning,
        );
    }

    pub fn invalidate(&self) -> Result<bool, StorageError> {
        self.cache.delete(&Self::cache_key())
    }
}
