//! CLI presentation: text and json formatters per command.

use comfy_table::{presets::UTF8_FULL, Table};
use serde::Serialize;

use crate::api::StatusReport;
use crate::error::{PipelineError, StorageError};
use crate::feed::Feed;
use crate::generation::RunReport;
use crate::integrity::{IntegrityReport, RepairRecord, RepairStatus};
use crate::journal::JournalEntry;

use super::parse::OutputFormat;

pub fn to_json<T: Serialize>(value: &T) -> Result<String, PipelineError> {
    serde_json::to_string_pretty(value).map_err(|e| PipelineError::Storage(StorageError::from(e)))
}

fn table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(header);
    table
}

pub fn format_run_report(report: &RunReport, format: OutputFormat) -> Result<String, PipelineError> {
    if format == OutputFormat::Json {
        return to_json(report);
    }
    let mut s = format!(
        "Generation {} ({} ms)\n  Items: {}",
        report.outcome, report.duration_ms, report.items
    );
    if let Some(ref strategy) = report.strategy {
        s.push_str(&format!("\n  Parse strategy: {}", strategy));
    }
    if !report.outcome.is_success() && !report.persisted {
        s.push_str("\n  Substitute feed could not be written");
    }
    if let Some(ref failure) = report.failure {
        s.push_str(&format!(
            "\n  Failure: [{}/{}] {}",
            failure.module, failure.code, failure.message
        ));
    }
    Ok(s)
}

pub fn format_journal(entries: &[JournalEntry], format: OutputFormat) -> Result<String, PipelineError> {
    if format == OutputFormat::Json {
        return to_json(&entries);
    }
    if entries.is_empty() {
        return Ok("Journal is empty.".to_string());
    }
    let mut t = table(vec!["Time", "Level", "Module", "Kind", "Description"]);
    for e in entries {
        t.add_row(vec![
            e.time.clone(),
            e.level.to_string(),
            e.module.clone(),
            e.kind.clone(),
            e.description.clone(),
        ]);
    }
    Ok(t.to_string())
}

pub fn format_integrity_report(
    report: &IntegrityReport,
    format: OutputFormat,
) -> Result<String, PipelineError> {
    if format == OutputFormat::Json {
        return to_json(report);
    }
    let mut s = format!(
        "Integrity: {} ({} issues, {} critical, {} fixable)",
        report.summary.status,
        report.summary.total,
        report.summary.critical,
        report.summary.fixable
    );
    if !report.issues.is_empty() {
        let mut t = table(vec!["File", "Issue", "Critical", "Detail"]);
        for issue in &report.issues {
            t.add_row(vec![
                issue.file.clone(),
                issue.kind.code().to_string(),
                (if issue.critical { "yes" } else { "no" }).to_string(),
                issue.detail.clone(),
            ]);
        }
        s.push('\n');
        s.push_str(&t.to_string());
    }
    for r in &report.recommendations {
        s.push_str(&format!("\n  - {}", r));
    }
    Ok(s)
}

pub fn format_repair_records(
    records: &[RepairRecord],
    format: OutputFormat,
) -> Result<String, PipelineError> {
    if format == OutputFormat::Json {
        return to_json(&records);
    }
    let changed = records
        .iter()
        .filter(|r| !matches!(r.status, RepairStatus::Ok | RepairStatus::Skipped))
        .count();
    let failed = records
        .iter()
        .filter(|r| r.status == RepairStatus::Failed)
        .count();
    let mut t = table(vec!["File", "Status", "Critical", "Description"]);
    for r in records {
        t.add_row(vec![
            r.file.clone(),
            r.status.to_string(),
            (if r.critical { "yes" } else { "no" }).to_string(),
            r.description.clone(),
        ]);
    }
    Ok(format!(
        "Repair finished: {} changed, {} failed\n{}",
        changed, failed, t
    ))
}

pub fn format_status(report: &StatusReport, format: OutputFormat) -> Result<String, PipelineError> {
    if format == OutputFormat::Json {
        return to_json(report);
    }
    let mut t = table(vec!["Field", "Value"]);
    let yes_no = |b: bool| (if b { "yes" } else { "no" }).to_string();
    t.add_row(vec!["Health".to_string(), report.health.to_string()]);
    t.add_row(vec!["Version".to_string(), report.version.clone()]);
    t.add_row(vec!["API key set".to_string(), yes_no(report.config.api_key_set)]);
    t.add_row(vec!["Prompt set".to_string(), yes_no(report.config.prompt_set)]);
    t.add_row(vec!["Model".to_string(), report.config.model.clone()]);
    t.add_row(vec![
        "Temperature".to_string(),
        report.config.temperature.to_string(),
    ]);
    t.add_row(vec!["Max tokens".to_string(), report.config.max_tokens.to_string()]);
    t.add_row(vec![
        "Lock backend".to_string(),
        report.config.lock_backend.to_string(),
    ]);
    t.add_row(vec![
        "Data directory".to_string(),
        report.data_dir.display().to_string(),
    ]);
    t.add_row(vec!["Writable".to_string(), yes_no(report.data_dir_writable)]);
    t.add_row(vec![
        "Last generation".to_string(),
        report
            .last_generation
            .clone()
            .unwrap_or_else(|| "never".to_string()),
    ]);
    match &report.runtime {
        Some(runtime) => {
            t.add_row(vec![
                "Calls this hour".to_string(),
                format!("{} / {}", runtime.calls_this_hour, report.config.calls_per_hour),
            ]);
            t.add_row(vec!["Recent errors".to_string(), runtime.recent_errors.to_string()]);
            t.add_row(vec![
                "Circuit".to_string(),
                format!("{} ({} failures)", runtime.circuit, runtime.circuit_failures),
            ]);
        }
        None => {
            t.add_row(vec![
                "Runtime state".to_string(),
                "unavailable: cache in use by a running generation".to_string(),
            ]);
        }
    }
    Ok(t.to_string())
}

pub fn format_feed(feed: &Feed, format: OutputFormat) -> Result<String, PipelineError> {
    if format == OutputFormat::Json {
        return to_json(feed);
    }
    let mut lines: Vec<String> = feed
        .items
        .iter()
        .map(|i| format!("{}  {}", i.tid, i.tekst))
        .collect();
    if let Some(ref reason) = feed.reason {
        lines.insert(0, format!("(fallback feed: {})", reason));
    }
    Ok(lines.join("\n"))
}
