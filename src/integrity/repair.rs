//! Automatic repair of the data directory.

use std::fs;
use std::path::Path;

use chrono::Local;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use super::{inspect, is_empty_data, validate_artifact, validate_source, FileState};
use crate::journal::{Journal, Level};
use crate::response::timestamp_now;
use crate::sources::{SourceSpec, DEPRECATED_FILES, SOURCES};
use crate::writer::AtomicWriter;

/// Directory under the data dir receiving copies of removed files.
pub const BACKUP_DIR: &str = "backup";
const MIN_MERGED_ENTRIES: usize = 2;
const MAX_MERGED_ENTRIES: usize = 5;
const ARTIFACT_DESCRIPTION: &str = "Generated news feed";

/// How structurally invalid data is combined with the built-in defaults.
pub trait RepairPolicy: Send + Sync {
    fn merge(&self, spec: &SourceSpec, existing: Value, defaults: &Value) -> Value;
}

/// Objects: defaults overlaid by existing fields. Arrays: existing non-empty
/// objects kept, topped up from defaults when fewer than two remain.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeWithDefaults;

impl RepairPolicy for MergeWithDefaults {
    fn merge(&self, spec: &SourceSpec, existing: Value, defaults: &Value) -> Value {
        match (existing, defaults) {
            (Value::Object(fields), Value::Object(base)) => {
                let mut merged = base.clone();
                merged.extend(fields);
                Value::Object(merged)
            }
            (Value::Array(entries), Value::Array(base)) => {
                let mut merged: Vec<Value> = entries
                    .into_iter()
                    .filter(|e| e.as_object().map_or(false, |o| !o.is_empty()))
                    .collect();
                if merged.len() < MIN_MERGED_ENTRIES {
                    for candidate in base {
                        if merged.len() >= MAX_MERGED_ENTRIES {
                            break;
                        }
                        let id = spec.identifier(candidate);
                        let duplicate =
                            id.is_some() && merged.iter().any(|m| spec.identifier(m) == id);
                        if !duplicate {
                            merged.push(candidate.clone());
                        }
                    }
                }
                Value::Array(merged)
            }
            _ => defaults.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStatus {
    Ok,
    Created,
    Repaired,
    Populated,
    Improved,
    Removed,
    Skipped,
    Failed,
}

impl std::fmt::Display for RepairStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RepairStatus::Ok => "ok",
            RepairStatus::Created => "created",
            RepairStatus::Repaired => "repaired",
            RepairStatus::Populated => "populated",
            RepairStatus::Improved => "improved",
            RepairStatus::Removed => "removed",
            RepairStatus::Skipped => "skipped",
            RepairStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RepairRecord {
    pub file: String,
    pub status: RepairStatus,
    pub critical: bool,
    pub description: String,
    pub time: String,
}

pub struct Repairer {
    writer: AtomicWriter,
    journal: Journal,
    policy: Box<dyn RepairPolicy>,
}

impl Repairer {
    pub fn new(writer: AtomicWriter, journal: Journal) -> Self {
        Self {
            writer,
            journal,
            policy: Box::new(MergeWithDefaults),
        }
    }

    pub fn with_policy(mut self, policy: Box<dyn RepairPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Bring every source and the artifact into a valid state and move
    /// deprecated files to the backup directory.
    pub fn auto_fix(&self, data_dir: &Path, output_file: &str) -> Vec<RepairRecord> {
        let mut records = self.repair_sources(data_dir);
        records.push(self.repair_artifact(data_dir, output_file));
        records
    }

    /// Repair the context sources and remove deprecated files. Leaves the
    /// artifact alone.
    pub fn repair_sources(&self, data_dir: &Path) -> Vec<RepairRecord> {
        let mut records = Vec::new();
        if let Err(e) = fs::create_dir_all(data_dir) {
            warn!(path = %data_dir.display(), error = %e, "Cannot create data directory");
        }

        for spec in SOURCES {
            let path = data_dir.join(spec.file);
            let defaults = spec.default_data();
            let planned = match inspect(&path) {
                FileState::Missing | FileState::Unreadable(_) => {
                    Some((RepairStatus::Created, defaults))
                }
                FileState::InvalidJson(_) => Some((RepairStatus::Repaired, defaults)),
                FileState::Empty => Some((RepairStatus::Populated, defaults)),
                FileState::Parsed(value) if is_empty_data(&value) => {
                    Some((RepairStatus::Populated, defaults))
                }
                FileState::Parsed(value) => match validate_source(spec, &value) {
                    Ok(()) => None,
                    Err(_) => Some((
                        RepairStatus::Improved,
                        self.policy.merge(spec, value, &defaults),
                    )),
                },
            };
            let status = self.apply(&path, planned);
            records.push(self.record(spec.file, status, spec.critical, spec.description));
        }

        for name in DEPRECATED_FILES {
            let path = data_dir.join(name);
            if path.exists() {
                let status = match remove_with_backup(data_dir, name) {
                    Ok(()) => RepairStatus::Removed,
                    Err(e) => {
                        warn!(file = name, error = %e, "Failed to remove deprecated file");
                        RepairStatus::Failed
                    }
                };
                records.push(self.record(name, status, false, "Deprecated file"));
            }
        }
        records
    }

    /// Repair the published artifact. The caller holds the generation lock.
    pub fn repair_artifact(&self, data_dir: &Path, output_file: &str) -> RepairRecord {
        let artifact = data_dir.join(output_file);
        let planned = match inspect(&artifact) {
            FileState::Missing | FileState::Unreadable(_) => {
                Some((RepairStatus::Created, Value::Array(Vec::new())))
            }
            FileState::InvalidJson(_) | FileState::Empty => {
                Some((RepairStatus::Repaired, Value::Array(Vec::new())))
            }
            FileState::Parsed(value) => match validate_artifact(&value) {
                Ok(()) => None,
                Err(_) => Some((RepairStatus::Improved, retain_valid_items(value))),
            },
        };
        let status = self.apply(&artifact, planned);
        self.record(output_file, status, false, ARTIFACT_DESCRIPTION)
    }

    /// Record for an artifact left untouched because a run holds the lock.
    pub fn artifact_skipped(&self, output_file: &str) -> RepairRecord {
        self.record(output_file, RepairStatus::Skipped, false, ARTIFACT_DESCRIPTION)
    }

    fn apply(&self, path: &Path, planned: Option<(RepairStatus, Value)>) -> RepairStatus {
        let Some((status, data)) = planned else {
            return RepairStatus::Ok;
        };
        let bytes = match serde_json::to_vec_pretty(&data) {
            Ok(mut bytes) => {
                bytes.push(b'\n');
                bytes
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to render repaired data");
                return RepairStatus::Failed;
            }
        };
        if self.writer.write(path, &bytes) {
            status
        } else {
            RepairStatus::Failed
        }
    }

    fn record(&self, file: &str, status: RepairStatus, critical: bool, description: &str) -> RepairRecord {
        match status {
            RepairStatus::Ok => {}
            RepairStatus::Failed => self.journal.record(
                "integrity",
                "repair_failed",
                &format!("Could not repair {}", file),
                Level::Error,
            ),
            RepairStatus::Skipped => self.journal.record(
                "integrity",
                "repair_skipped",
                &format!("{} skipped: generation in progress", file),
                Level::Warning,
            ),
            _ => self.journal.record(
                "integrity",
                &format!("file_{}", status),
                &format!("{}: {}", file, status),
                Level::Info,
            ),
        }
        RepairRecord {
            file: file.to_string(),
            status,
            critical,
            description: description.to_string(),
            time: timestamp_now(),
        }
    }
}

fn retain_valid_items(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .filter(|item| validate_artifact(&Value::Array(vec![item.clone()])).is_ok())
                .collect(),
        ),
        _ => Value::Array(Vec::new()),
    }
}

fn remove_with_backup(data_dir: &Path, name: &str) -> std::io::Result<()> {
    let backup_dir = data_dir.join(BACKUP_DIR);
    fs::create_dir_all(&backup_dir)?;
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    fs::copy(
        data_dir.join(name),
        backup_dir.join(format!("{}.{}.bak", name, stamp)),
    )?;
    fs::remove_file(data_dir.join(name))
}
