//! CLI route: single route table and run context. Dispatches to the admin facade and presentation.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};

use crate::api::NattevaktApi;
use crate::config::{ConfigLoader, NattevaktConfig};
use crate::error::{PipelineError, StorageError};

use super::parse::{Commands, ConfigCommands, OutputFormat};
use super::presentation::{
    format_feed, format_integrity_report, format_journal, format_repair_records,
    format_run_report, format_status,
};

const REDACTED: &str = "********";

/// Runtime context for CLI execution: workspace, config path, the facade and an async runtime.
pub struct RunContext {
    api: NattevaktApi,
    workspace_root: PathBuf,
    config_path: Option<PathBuf>,
    runtime: tokio::runtime::Runtime,
}

impl RunContext {
    /// Create run context from workspace root and optional config path. Uses ConfigLoader only.
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, PipelineError> {
        let config = if let Some(ref cfg_path) = config_path {
            ConfigLoader::load_from_file(cfg_path)?
        } else {
            ConfigLoader::load(&workspace_root)?
        };
        let api = NattevaktApi::from_config(config, &workspace_root)?;
        let runtime = tokio::runtime::Runtime::new().map_err(StorageError::from)?;
        Ok(Self {
            api,
            workspace_root,
            config_path,
            runtime,
        })
    }

    pub fn api(&self) -> &NattevaktApi {
        &self.api
    }

    /// Execute a CLI command via the single route table.
    pub fn execute(&self, command: &Commands) -> Result<String, PipelineError> {
        match command {
            Commands::Generate { format } => {
                let report = self.runtime.block_on(self.api.generate_now());
                format_run_report(&report, *format)
            }
            Commands::Schedule { interval, runs } => {
                let secs = interval.unwrap_or(self.api.config().generation.schedule_interval_secs);
                self.handle_schedule(Duration::from_secs(secs.max(1)), *runs)
            }
            Commands::Errors { limit, format } => {
                let entries = self.api.recent_errors(*limit)?;
                format_journal(&entries, *format)
            }
            Commands::ClearLogs => {
                let removed = self.api.clear_logs()?;
                Ok(format!("Cleared {} journal entries", removed))
            }
            Commands::Check { format } => {
                format_integrity_report(&self.api.check_integrity(), *format)
            }
            Commands::Fix { format } => {
                let records = self.runtime.block_on(self.api.auto_fix())?;
                format_repair_records(&records, *format)
            }
            Commands::Status { format } => format_status(&self.api.status(), *format),
            Commands::Feed { limit, format } => format_feed(&self.api.feed(*limit), *format),
            Commands::Config { command } => self.handle_config(command),
        }
    }

    fn handle_schedule(&self, interval: Duration, max_runs: Option<u64>) -> Result<String, PipelineError> {
        info!(interval_secs = interval.as_secs(), "Scheduler started");
        let (runs, successes) = self.runtime.block_on(async {
            let shutdown = tokio::signal::ctrl_c();
            tokio::pin!(shutdown);
            let mut runs = 0u64;
            let mut successes = 0u64;
            loop {
                let report = tokio::select! {
                    report = self.api.generate_now() => report,
                    _ = &mut shutdown => break,
                };
                runs += 1;
                if report.outcome.is_success() {
                    successes += 1;
                }
                match format_run_report(&report, OutputFormat::Text) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!(error = %e, "Failed to render run report"),
                }
                if max_runs.map_or(false, |max| runs >= max) {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = &mut shutdown => break,
                }
            }
            (runs, successes)
        });
        info!(runs, successes, "Scheduler stopped");
        Ok(format!(
            "Scheduler stopped after {} runs ({} successful)",
            runs, successes
        ))
    }

    fn handle_config(&self, command: &ConfigCommands) -> Result<String, PipelineError> {
        match command {
            ConfigCommands::Show => ConfigLoader::render(&redacted(self.api.config())),
            ConfigCommands::Paths => {
                let global = ConfigLoader::global_config_path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "-".to_string());
                let workspace = ConfigLoader::workspace_config_path(&self.workspace_root);
                let mut s = format!(
                    "Global: {}\nWorkspace: {}",
                    global,
                    workspace.display()
                );
                if let Some(ref explicit) = self.config_path {
                    s.push_str(&format!("\nExplicit: {}", explicit.display()));
                }
                Ok(s)
            }
        }
    }
}

fn redacted(config: &NattevaktConfig) -> NattevaktConfig {
    let mut config = config.clone();
    if config.provider.api_key.is_some() {
        config.provider.api_key = Some(REDACTED.to_string());
    }
    if config.context.secret.is_some() {
        config.context.secret = Some(REDACTED.to_string());
    }
    config
}
