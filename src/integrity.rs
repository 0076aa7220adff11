//! Data directory integrity checks.
//!
//! Every catalog source and the output artifact is inspected for presence,
//! readability, JSON validity and per-category structure. Repairs live in
//! [`repair`].

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::response::timestamp_now;
use crate::sources::{SourceShape, SourceSpec, DEPRECATED_FILES, EDITORIAL, SOURCES};

pub mod repair;

pub use repair::{MergeWithDefaults, RepairPolicy, RepairRecord, RepairStatus, Repairer};

/// Bytes read from any checked file.
const MAX_CHECK_BYTES: u64 = 100 * 1024;
const SUSPICIOUSLY_SMALL: u64 = 10;
const SUSPICIOUSLY_LARGE: u64 = 1024 * 1024;
/// Non-critical issues tolerated before the status becomes `warning`.
const WARNING_THRESHOLD: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    DataDirMissing,
    DataDirNotWritable,
    Missing,
    Unreadable,
    Empty,
    InvalidJson,
    InvalidStructure,
    SuspiciousSize,
    DeprecatedFile,
    CharacterConsistency,
}

impl IssueKind {
    pub fn code(&self) -> &'static str {
        match self {
            IssueKind::DataDirMissing => "data_dir_missing",
            IssueKind::DataDirNotWritable => "data_dir_not_writable",
            IssueKind::Missing => "missing",
            IssueKind::Unreadable => "unreadable",
            IssueKind::Empty => "empty",
            IssueKind::InvalidJson => "invalid_json",
            IssueKind::InvalidStructure => "invalid_structure",
            IssueKind::SuspiciousSize => "suspicious_size",
            IssueKind::DeprecatedFile => "deprecated_file",
            IssueKind::CharacterConsistency => "character_consistency",
        }
    }

    /// Whether [`Repairer::auto_fix`] resolves this kind of issue.
    pub fn is_fixable(&self) -> bool {
        !matches!(
            self,
            IssueKind::DataDirNotWritable
                | IssueKind::SuspiciousSize
                | IssueKind::CharacterConsistency
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityIssue {
    pub file: String,
    pub kind: IssueKind,
    pub critical: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityStatus {
    Healthy,
    NeedsAttention,
    Warning,
    Critical,
}

impl std::fmt::Display for IntegrityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IntegrityStatus::Healthy => "healthy",
            IntegrityStatus::NeedsAttention => "needs_attention",
            IntegrityStatus::Warning => "warning",
            IntegrityStatus::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegritySummary {
    pub total: usize,
    pub critical: usize,
    pub fixable: usize,
    pub status: IntegrityStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub checked_at: String,
    pub version: String,
    pub summary: IntegritySummary,
    pub issues: Vec<IntegrityIssue>,
    pub recommendations: Vec<String>,
}

impl IntegrityReport {
    fn from_issues(issues: Vec<IntegrityIssue>) -> Self {
        let critical = issues.iter().filter(|i| i.critical).count();
        let fixable = issues.iter().filter(|i| i.kind.is_fixable()).count();
        let warnings = issues.len() - critical;
        let status = if critical > 0 {
            IntegrityStatus::Critical
        } else if warnings > WARNING_THRESHOLD {
            IntegrityStatus::Warning
        } else if warnings > 0 {
            IntegrityStatus::NeedsAttention
        } else {
            IntegrityStatus::Healthy
        };

        let count = |kind: IssueKind| issues.iter().filter(|i| i.kind == kind).count();
        let mut recommendations = Vec::new();
        if critical > 0 {
            recommendations.push("Resolve critical issues before the next scheduled run".to_string());
        }
        if fixable > 0 {
            recommendations.push(format!("Run auto-fix to resolve {} issue(s) automatically", fixable));
        }
        let broken = count(IssueKind::InvalidJson) + count(IssueKind::InvalidStructure);
        if broken > 0 {
            recommendations.push(format!("{} file(s) have JSON or structure errors", broken));
        }
        let deprecated = count(IssueKind::DeprecatedFile);
        if deprecated > 0 {
            recommendations.push(format!("Remove {} deprecated file(s)", deprecated));
        }
        if issues.is_empty() {
            recommendations.push("All data files are in order".to_string());
        }

        Self {
            checked_at: timestamp_now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            summary: IntegritySummary {
                total: issues.len(),
                critical,
                fixable,
                status,
            },
            issues,
            recommendations,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.summary.status == IntegrityStatus::Healthy
    }
}

/// What reading a checked file produced.
pub(crate) enum FileState {
    Missing,
    Unreadable(String),
    Empty,
    InvalidJson(String),
    Parsed(Value),
}

pub(crate) fn inspect(path: &Path) -> FileState {
    let bytes = match fs::File::open(path) {
        Ok(file) => {
            use std::io::Read;
            let mut bytes = Vec::new();
            match file.take(MAX_CHECK_BYTES).read_to_end(&mut bytes) {
                Ok(_) => bytes,
                Err(e) => return FileState::Unreadable(e.to_string()),
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return FileState::Missing,
        Err(e) => return FileState::Unreadable(e.to_string()),
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return FileState::Empty;
    }
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(value) => FileState::Parsed(value),
        Err(e) => FileState::InvalidJson(e.to_string()),
    }
}

/// Non-null, non-blank, non-false.
fn is_filled(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
        Some(Value::Number(_)) | Some(Value::Bool(true)) => true,
    }
}

fn is_numeric(value: &Value) -> bool {
    match value {
        Value::Number(_) => true,
        Value::String(s) => s.trim().parse::<f64>().is_ok(),
        _ => false,
    }
}

fn house_number() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+[a-zA-Z]?$").expect("valid house number pattern"))
}

fn is_house_number(value: &Value) -> bool {
    match value {
        Value::String(s) => house_number().is_match(s),
        Value::Number(n) => n.is_u64(),
        _ => false,
    }
}

/// Whether parsed content counts as empty for repair purposes.
pub(crate) fn is_empty_data(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Strict per-category structure check. The error names the first offending
/// entry (1-based).
pub fn validate_source(spec: &SourceSpec, data: &Value) -> Result<(), String> {
    match spec.shape {
        SourceShape::Document => {
            let obj = data
                .as_object()
                .ok_or_else(|| format!("{} must be an object", spec.category))?;
            if !spec.id_fields.iter().any(|f| is_filled(obj.get(*f))) {
                return Err(format!(
                    "{} is missing required field {}",
                    spec.category,
                    spec.id_fields.join(" or ")
                ));
            }
            Ok(())
        }
        SourceShape::Records => {
            let entries = data
                .as_array()
                .ok_or_else(|| format!("{} must be an array", spec.category))?;
            for (index, entry) in entries.iter().enumerate() {
                let n = index + 1;
                let obj = entry
                    .as_object()
                    .ok_or_else(|| format!("entry #{} must be an object", n))?;
                if !spec.id_fields.iter().any(|f| is_filled(obj.get(*f))) {
                    return Err(format!(
                        "entry #{} is missing required field {}",
                        n,
                        spec.id_fields.join(" or ")
                    ));
                }
                check_field_types(spec.category, obj).map_err(|e| format!("entry #{}: {}", n, e))?;
            }
            Ok(())
        }
    }
}

#[derive(Clone, Copy)]
enum FieldRule {
    Numeric,
    HouseNumber,
    Array,
    Text,
}

impl FieldRule {
    fn accepts(self, value: &Value) -> bool {
        match self {
            FieldRule::Numeric => is_numeric(value),
            FieldRule::HouseNumber => is_house_number(value),
            FieldRule::Array => value.is_array(),
            FieldRule::Text => value.is_string(),
        }
    }

    fn message(self) -> &'static str {
        match self {
            FieldRule::Numeric => "must be a number",
            FieldRule::HouseNumber => "is not a valid house number",
            FieldRule::Array => "must be an array",
            FieldRule::Text => "must be text",
        }
    }
}

fn check_field_types(category: &str, obj: &serde_json::Map<String, Value>) -> Result<(), String> {
    let (field, rule) = match category {
        "businesses" => ("employees", FieldRule::Numeric),
        "streets" => ("number", FieldRule::HouseNumber),
        "sports" => ("participants", FieldRule::Array),
        "tourist_spots" => ("visit_time", FieldRule::Text),
        "places" | "lakes" => ("activities", FieldRule::Array),
        "surroundings" => ("inhabitants", FieldRule::Numeric),
        _ => return Ok(()),
    };
    match obj.get(field) {
        Some(value) if !rule.accepts(value) => Err(format!("{} {}", field, rule.message())),
        _ => Ok(()),
    }
}

/// Generated items: objects with non-empty `tekst` and a score within 0-100.
/// An empty array is valid.
pub fn validate_artifact(data: &Value) -> Result<(), String> {
    let entries = data.as_array().ok_or("feed must be an array")?;
    for (index, entry) in entries.iter().enumerate() {
        let n = index + 1;
        let obj = entry
            .as_object()
            .ok_or_else(|| format!("item #{} must be an object", n))?;
        if !is_filled(obj.get("tekst")) {
            return Err(format!("item #{} has no text", n));
        }
        if let Some(score) = obj.get("score") {
            let in_range = match score {
                Value::Number(n) => n.as_f64().map_or(false, |s| (0.0..=100.0).contains(&s)),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map_or(false, |s| (0.0..=100.0).contains(&s)),
                _ => false,
            };
            if !in_range {
                return Err(format!("item #{} score must be between 0 and 100", n));
            }
        }
    }
    Ok(())
}

/// Whether a file can be created in `dir`.
pub fn dir_writable(dir: &Path) -> bool {
    tempfile::tempfile_in(dir).is_ok()
}

fn issue(file: &str, kind: IssueKind, critical: bool, detail: impl Into<String>) -> IntegrityIssue {
    IntegrityIssue {
        file: file.to_string(),
        kind,
        critical,
        detail: detail.into(),
    }
}

/// Inspect every source, the artifact `output_file` and the deprecated files
/// under `data_dir`.
pub fn check(data_dir: &Path, output_file: &str) -> IntegrityReport {
    let mut issues = Vec::new();

    if !data_dir.is_dir() {
        issues.push(issue(
            &data_dir.display().to_string(),
            IssueKind::DataDirMissing,
            true,
            "data directory does not exist",
        ));
    } else if !dir_writable(data_dir) {
        issues.push(issue(
            &data_dir.display().to_string(),
            IssueKind::DataDirNotWritable,
            true,
            "data directory is not writable",
        ));
    }

    let mut parsed = std::collections::BTreeMap::new();
    for spec in SOURCES {
        let path = data_dir.join(spec.file);
        match inspect(&path) {
            FileState::Missing => issues.push(issue(spec.file, IssueKind::Missing, spec.critical, "file is missing")),
            FileState::Unreadable(e) => issues.push(issue(spec.file, IssueKind::Unreadable, true, e)),
            FileState::Empty => issues.push(issue(spec.file, IssueKind::Empty, spec.critical, "file is empty")),
            FileState::InvalidJson(e) => {
                issues.push(issue(spec.file, IssueKind::InvalidJson, spec.critical, e))
            }
            FileState::Parsed(value) => {
                if is_empty_data(&value) {
                    issues.push(issue(spec.file, IssueKind::Empty, spec.critical, "no entries"));
                } else if let Err(e) = validate_source(spec, &value) {
                    issues.push(issue(spec.file, IssueKind::InvalidStructure, spec.critical, e));
                } else {
                    parsed.insert(spec.category, value);
                }
                check_size(&path, spec.file, true, &mut issues);
            }
        }
    }

    let artifact = data_dir.join(output_file);
    match inspect(&artifact) {
        // The artifact appears after the first run.
        FileState::Missing => {}
        FileState::Unreadable(e) => issues.push(issue(output_file, IssueKind::Unreadable, false, e)),
        FileState::Empty => issues.push(issue(output_file, IssueKind::Empty, false, "file is empty")),
        FileState::InvalidJson(e) => issues.push(issue(output_file, IssueKind::InvalidJson, false, e)),
        FileState::Parsed(value) => {
            if let Err(e) = validate_artifact(&value) {
                issues.push(issue(output_file, IssueKind::InvalidStructure, false, e));
            }
            check_size(&artifact, output_file, false, &mut issues);
        }
    }

    for name in DEPRECATED_FILES {
        if data_dir.join(name).exists() {
            issues.push(issue(
                name,
                IssueKind::DeprecatedFile,
                false,
                "deprecated file should be removed",
            ));
        }
    }

    if let Some(detail) = character_consistency(&parsed) {
        issues.push(issue("editorial.json", IssueKind::CharacterConsistency, false, detail));
    }

    for found in &issues {
        if found.critical {
            warn!(file = %found.file, kind = ?found.kind, detail = %found.detail, "Integrity issue");
        } else {
            debug!(file = %found.file, kind = ?found.kind, detail = %found.detail, "Integrity issue");
        }
    }
    IntegrityReport::from_issues(issues)
}

fn check_size(path: &Path, name: &str, flag_small: bool, issues: &mut Vec<IntegrityIssue>) {
    let Ok(meta) = fs::metadata(path) else {
        return;
    };
    if flag_small && meta.len() < SUSPICIOUSLY_SMALL {
        issues.push(issue(
            name,
            IssueKind::SuspiciousSize,
            false,
            format!("only {} bytes", meta.len()),
        ));
    } else if meta.len() > SUSPICIOUSLY_LARGE {
        issues.push(issue(
            name,
            IssueKind::SuspiciousSize,
            false,
            format!("{} bytes is unexpectedly large", meta.len()),
        ));
    }
}

/// The editorial main character should live on one of the streets.
fn character_consistency(parsed: &std::collections::BTreeMap<&str, Value>) -> Option<String> {
    let character = parsed.get(EDITORIAL)?.get("main_character")?.as_str()?;
    let streets = parsed.get("streets")?.as_array()?;
    let found = streets.iter().any(|s| {
        s.get("resident")
            .and_then(Value::as_str)
            .map_or(false, |r| r.contains(character))
    });
    (!found).then(|| format!("main character {} is not a resident of any street", character))
}
