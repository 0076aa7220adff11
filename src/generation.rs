//! Generation orchestrator: one scheduled run from lock to published feed.
//!
//! Each stage returns a `Result`; the first error hands the run to the
//! [`Degrader`], whose outcome becomes the run's outcome. The lock on the
//! output resource is held by a guard for the whole run, degradation included.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::breaker::CircuitBreaker;
use crate::cache::SharedCache;
use crate::config::GenerationConfig;
use crate::context::ContextLoader;
use crate::degrade::{DegradeTier, Degrader, OFFLINE_SNAPSHOT_KEY};
use crate::error::{PipelineError, ProviderError};
use crate::feed;
use crate::journal::{Journal, Level};
use crate::lock::LockManager;
use crate::provider::{ChatMessage, CompletionOptions, ModelProviderClient, SYSTEM_INSTRUCTION};
use crate::rate::RateLimiter;
use crate::response::{timestamp_now, GeneratedItem, ResponseParser};
use crate::writer::AtomicWriter;

pub mod prompt;

/// Operation name combined with the output path into the lock resource key.
const LOCK_OPERATION: &str = "generation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Locking,
    RateCheck,
    ContextLoad,
    Prompting,
    ApiCall,
    Parsing,
    Writing,
    CacheInvalidate,
    Degrading,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    LockFailed,
    OfflineCache,
    OfflineFallback,
}

impl RunOutcome {
    pub fn code(&self) -> &'static str {
        match self {
            RunOutcome::Success => "success",
            RunOutcome::LockFailed => "lock_failed",
            RunOutcome::OfflineCache => "offline_cache",
            RunOutcome::OfflineFallback => "offline_fallback",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success)
    }
}

impl From<DegradeTier> for RunOutcome {
    fn from(tier: DegradeTier) -> Self {
        match tier {
            DegradeTier::OfflineCache => RunOutcome::OfflineCache,
            DegradeTier::OfflineFallback => RunOutcome::OfflineFallback,
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// The error that ended a run early.
#[derive(Debug, Clone, Serialize)]
pub struct RunFailure {
    pub code: String,
    pub module: String,
    pub message: String,
}

impl From<&PipelineError> for RunFailure {
    fn from(e: &PipelineError) -> Self {
        Self {
            code: e.code().to_string(),
            module: e.module().to_string(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub phases: Vec<RunPhase>,
    /// Items now in the artifact (generated or substituted)
    pub items: usize,
    /// False when a degraded run could not persist its substitute feed
    pub persisted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    pub started_at: String,
    pub duration_ms: u64,
}

impl RunReport {
    /// Report for a run that never got exclusive access.
    pub fn lock_failed(
        error: &PipelineError,
        phases: Vec<RunPhase>,
        started_at: String,
        started: Instant,
    ) -> Self {
        Self {
            outcome: RunOutcome::LockFailed,
            phases,
            items: 0,
            persisted: false,
            failure: Some(RunFailure::from(error)),
            strategy: None,
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Lock resource key guarding the artifact at `output_path` and its backup.
pub fn resource_key(output_path: &std::path::Path) -> String {
    format!("{}:{}", output_path.display(), LOCK_OPERATION)
}

struct RunState {
    phases: Vec<RunPhase>,
    strategy: Option<String>,
}

impl RunState {
    fn new() -> Self {
        Self {
            phases: vec![RunPhase::Idle],
            strategy: None,
        }
    }

    fn enter(&mut self, phase: RunPhase) {
        self.phases.push(phase);
    }
}

/// Every collaborator of a run, built and injected by the caller.
pub struct Orchestrator {
    pub(crate) settings: GenerationConfig,
    pub(crate) lock: LockManager,
    pub(crate) rate: RateLimiter,
    pub(crate) context: ContextLoader,
    pub(crate) breaker: CircuitBreaker,
    pub(crate) provider: Option<Arc<dyn ModelProviderClient>>,
    pub(crate) parser: ResponseParser,
    pub(crate) writer: AtomicWriter,
    pub(crate) degrader: Degrader,
    pub(crate) cache: SharedCache,
    pub(crate) journal: Journal,
    pub(crate) output_path: PathBuf,
}

impl Orchestrator {
    pub fn resource_key(&self) -> String {
        resource_key(&self.output_path)
    }

    pub fn output_path(&self) -> &std::path::Path {
        &self.output_path
    }

    /// Run one generation. Never fails; the report carries the outcome.
    pub async fn run(&self) -> RunReport {
        let started = Instant::now();
        let started_at = timestamp_now();
        let mut state = RunState::new();

        state.enter(RunPhase::Locking);
        let Some(mut guard) = self.lock.acquire(&self.resource_key()).await else {
            let error = PipelineError::LockUnavailable(self.resource_key());
            self.journal.record(
                "generation",
                "lock_failed",
                "Could not get exclusive access for generation",
                Level::Error,
            );
            state.enter(RunPhase::Done);
            return RunReport::lock_failed(&error, state.phases, started_at, started);
        };

        let (outcome, items, persisted, failure) = match self.pipeline(&mut state).await {
            Ok(items) => {
                self.journal.record(
                    "generation",
                    "success",
                    &format!("Generated {} items", items.len()),
                    Level::Info,
                );
                (RunOutcome::Success, items.len(), true, None)
            }
            Err(error) => {
                state.enter(RunPhase::Degrading);
                let degraded = self.degrader.degrade(&error);
                (
                    RunOutcome::from(degraded.tier),
                    degraded.items.len(),
                    degraded.persisted,
                    Some(RunFailure::from(&error)),
                )
            }
        };
        state.enter(RunPhase::Done);
        guard.release();

        let report = RunReport {
            outcome,
            phases: state.phases,
            items,
            persisted,
            failure,
            strategy: state.strategy,
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            outcome = %report.outcome,
            items = report.items,
            duration_ms = report.duration_ms,
            "Generation run finished"
        );
        report
    }

    async fn pipeline(&self, state: &mut RunState) -> Result<Vec<GeneratedItem>, PipelineError> {
        state.enter(RunPhase::RateCheck);
        self.rate.check()?;

        state.enter(RunPhase::ContextLoad);
        let bundle = self.context.load_context()?;

        state.enter(RunPhase::Prompting);
        let user_prompt = prompt::build_prompt(&self.settings.prompt, &bundle)?;

        state.enter(RunPhase::ApiCall);
        let provider = self.provider.clone().ok_or_else(|| {
            ProviderError::NotConfigured("no API key configured".to_string())
        })?;
        let messages = vec![
            ChatMessage::system(SYSTEM_INSTRUCTION),
            ChatMessage::user(user_prompt),
        ];
        let options =
            CompletionOptions::for_generation(self.settings.temperature, self.settings.max_tokens);
        let response = self
            .breaker
            .call(|| async move { provider.complete(messages, options).await })
            .await?;
        if let Err(e) = self.rate.record_call() {
            warn!(error = %e, "Failed to record API call");
        }

        state.enter(RunPhase::Parsing);
        let parsed = self.parser.parse_with_report(&response.content);
        state.strategy = parsed.strategy.map(|s| s.to_string());
        if parsed.security_rejections() > 0 {
            self.journal.record(
                "response",
                "security_rejection",
                &format!("Dropped {} items with active content", parsed.security_rejections()),
                Level::Warning,
            );
        }
        if parsed.items.is_empty() {
            return Err(PipelineError::ParseEmpty);
        }
        let items = parsed.items;

        state.enter(RunPhase::Writing);
        let bytes = feed::render(&items)?;
        if !self.writer.write(&self.output_path, &bytes) {
            return Err(PipelineError::WriteVerificationFailed(
                self.output_path.clone(),
            ));
        }

        state.enter(RunPhase::CacheInvalidate);
        self.invalidate_derived_caches();
        self.degrader.seed_snapshot(&items);
        Ok(items)
    }

    /// Drop the context bundle, the keys earlier releases cached under, and
    /// the offline snapshot.
    pub fn invalidate_derived_caches(&self) {
        if let Err(e) = self.context.invalidate() {
            warn!(error = %e, "Failed to invalidate context bundle");
        }
        let legacy = [
            format!("data_sources_secure_{}", env!("CARGO_PKG_VERSION")),
            "nattevakten_data_sources".to_string(),
            OFFLINE_SNAPSHOT_KEY.to_string(),
        ];
        for key in &legacy {
            if let Err(e) = self.cache.delete(key) {
                warn!(key = %key, error = %e, "Failed to invalidate cache entry");
            }
        }
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }
}
