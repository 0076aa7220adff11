//! Administrative facade.
//!
//! [`NattevaktApi`] holds the validated [`NattevaktConfig`] and builds every
//! pipeline component explicitly. Components that keep cross-run state are
//! built per cache session, so the cache database is only open while an
//! operation needs it. The CLI and tests go through this type only.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{info, warn};

use crate::breaker::{BreakerState, CircuitBreaker};
use crate::cache::{CacheStore, SharedCache};
use crate::config::{LockBackendKind, NattevaktConfig, ResolvedPaths};
use crate::context::ContextLoader;
use crate::degrade::Degrader;
use crate::error::{PipelineError, StorageError};
use crate::feed::{self, Feed};
use crate::generation::{self, Orchestrator, RunPhase, RunReport};
use crate::integrity::{self, IntegrityReport, RepairRecord, Repairer};
use crate::journal::{Journal, JournalEntry};
use crate::lock::{LockBackend, LockManager};
use crate::provider::{ModelProviderClient, ProviderFactory};
use crate::rate::RateLimiter;
use crate::response::{timestamp_now, ResponseParser};
use crate::writer::AtomicWriter;

/// Circuit name for the generation API.
const BREAKER_NAME: &str = "generation_api";
/// Journal entries inspected when judging health.
const HEALTH_WINDOW: usize = 50;
/// Recent errors tolerated before the service counts as degraded.
const HEALTH_ERROR_THRESHOLD: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Health::Healthy => "healthy",
            Health::Degraded => "degraded",
            Health::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

/// Settings that matter to an operator, without secrets.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSnapshot {
    pub api_key_set: bool,
    pub prompt_set: bool,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub calls_per_hour: u64,
    pub lock_backend: LockBackendKind,
}

/// Counters read from the cache database.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeState {
    pub recent_errors: usize,
    pub calls_this_hour: u64,
    pub circuit: BreakerState,
    pub circuit_failures: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub version: String,
    pub config: ConfigSnapshot,
    pub data_dir: PathBuf,
    pub data_dir_writable: bool,
    /// Modification time of the artifact
    pub last_generation: Option<String>,
    /// `None` while another process holds the cache database
    pub runtime: Option<RuntimeState>,
    pub health: Health,
}

/// Health verdict from the raw status inputs. Unknown runtime state counts
/// as degraded.
pub fn assess_health(
    data_dir_writable: bool,
    api_key_set: bool,
    runtime: Option<&RuntimeState>,
) -> Health {
    if !data_dir_writable || !api_key_set {
        return Health::Unhealthy;
    }
    match runtime {
        Some(state)
            if state.recent_errors <= HEALTH_ERROR_THRESHOLD
                && state.circuit != BreakerState::Open =>
        {
            Health::Healthy
        }
        _ => Health::Degraded,
    }
}

pub struct NattevaktApi {
    config: NattevaktConfig,
    paths: ResolvedPaths,
    store: CacheStore,
    provider: Option<Arc<dyn ModelProviderClient>>,
    writer: AtomicWriter,
}

impl NattevaktApi {
    /// Build the facade over the cache database in the state directory.
    /// Nothing is opened yet. A missing API key is not an error here: runs
    /// degrade instead.
    pub fn from_config(config: NattevaktConfig, workspace_root: &Path) -> Result<Self, PipelineError> {
        let paths = config.storage.resolve_paths(workspace_root);
        std::fs::create_dir_all(&paths.cache_dir).map_err(StorageError::from)?;
        let store = CacheStore::at(
            paths.cache_dir.clone(),
            Duration::from_millis(config.coordination.poll_interval_ms),
        );
        let provider = match ProviderFactory::create_client(&config.provider) {
            Ok(client) => Some(client),
            Err(e) => {
                warn!(error = %e, "Generation API not available");
                None
            }
        };
        Self::with_store(config, workspace_root, store, provider, AtomicWriter::new())
    }

    /// Build over an already open cache, with caller-supplied provider and writer.
    pub fn with_components(
        config: NattevaktConfig,
        workspace_root: &Path,
        cache: SharedCache,
        provider: Option<Arc<dyn ModelProviderClient>>,
        writer: AtomicWriter,
    ) -> Result<Self, PipelineError> {
        Self::with_store(config, workspace_root, CacheStore::fixed(cache), provider, writer)
    }

    pub fn with_store(
        config: NattevaktConfig,
        workspace_root: &Path,
        store: CacheStore,
        provider: Option<Arc<dyn ModelProviderClient>>,
        writer: AtomicWriter,
    ) -> Result<Self, PipelineError> {
        let paths = config.storage.resolve_paths(workspace_root);
        std::fs::create_dir_all(&paths.data_dir).map_err(StorageError::from)?;
        Ok(Self {
            config,
            paths,
            store,
            provider,
            writer,
        })
    }

    pub fn config(&self) -> &NattevaktConfig {
        &self.config
    }

    pub fn paths(&self) -> &ResolvedPaths {
        &self.paths
    }

    /// Open a cache session, waiting for a run in another process to finish.
    pub fn cache_session(&self) -> Result<SharedCache, PipelineError> {
        let timeout = Duration::from_millis(self.config.coordination.cache_open_timeout_ms);
        Ok(self.store.session_blocking(timeout)?)
    }

    fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.config.coordination.acquire_timeout_ms)
    }

    fn lock_manager(&self, cache: &SharedCache) -> LockManager {
        let backend = match self.config.coordination.lock_backend {
            LockBackendKind::LocalFile => LockBackend::LocalFile {
                dir: self.paths.lock_dir.clone(),
            },
            LockBackendKind::Shared => LockBackend::Shared {
                cache: cache.clone(),
            },
        };
        LockManager::new(
            backend,
            self.lock_timeout(),
            Duration::from_millis(self.config.coordination.poll_interval_ms),
        )
    }

    fn breaker(&self, cache: &SharedCache) -> CircuitBreaker {
        CircuitBreaker::new(
            cache.clone(),
            BREAKER_NAME,
            self.config.breaker.failure_threshold,
            Duration::from_secs(self.config.breaker.cooldown_secs),
        )
    }

    /// Every collaborator of a run, bound to one cache session.
    fn orchestrator(&self, cache: SharedCache) -> Result<Orchestrator, PipelineError> {
        let journal = Journal::new(cache.clone())?;
        let context = ContextLoader::new(
            self.paths.data_dir.clone(),
            cache.clone(),
            journal.clone(),
            self.config.context.secret.as_deref(),
            Duration::from_secs(self.config.context.cache_ttl_secs),
        )?;
        let degrader = Degrader::new(
            cache.clone(),
            journal.clone(),
            self.writer.clone(),
            self.paths.output_path.clone(),
        );
        Ok(Orchestrator {
            settings: self.config.generation.clone(),
            lock: self.lock_manager(&cache),
            rate: RateLimiter::new(cache.clone(), self.config.generation.calls_per_hour),
            context,
            breaker: self.breaker(&cache),
            provider: self.provider.clone(),
            parser: ResponseParser::default(),
            writer: self.writer.clone(),
            degrader,
            cache,
            journal,
            output_path: self.paths.output_path.clone(),
        })
    }

    /// Run one generation. A cache database held by another process counts
    /// as an unavailable lock.
    pub async fn generate_now(&self) -> RunReport {
        let started = Instant::now();
        let started_at = timestamp_now();
        let session = match self.store.session(self.lock_timeout()).await {
            Ok(cache) => self.orchestrator(cache),
            Err(e) => Err(e.into()),
        };
        match session {
            Ok(orchestrator) => orchestrator.run().await,
            Err(e) => {
                let error = match e {
                    PipelineError::Storage(StorageError::Busy(_)) => {
                        PipelineError::LockUnavailable(generation::resource_key(
                            &self.paths.output_path,
                        ))
                    }
                    other => other,
                };
                warn!(error = %error, "Generation skipped: cache database unavailable");
                RunReport::lock_failed(
                    &error,
                    vec![RunPhase::Idle, RunPhase::Locking, RunPhase::Done],
                    started_at,
                    started,
                )
            }
        }
    }

    pub fn recent_errors(&self, limit: usize) -> Result<Vec<JournalEntry>, PipelineError> {
        let journal = Journal::new(self.cache_session()?)?;
        Ok(journal.recent(limit)?)
    }

    pub fn clear_logs(&self) -> Result<usize, PipelineError> {
        let journal = Journal::new(self.cache_session()?)?;
        let removed = journal.clear()?;
        info!(removed, "Journal cleared");
        Ok(removed)
    }

    pub fn check_integrity(&self) -> IntegrityReport {
        integrity::check(&self.paths.data_dir, &self.config.storage.output_file)
    }

    /// Repair the data directory. The artifact is only touched under the
    /// generation lock; when a run holds it the artifact is reported as
    /// skipped. The context bundle is dropped afterwards so the next run
    /// reads the repaired sources.
    pub async fn auto_fix(&self) -> Result<Vec<RepairRecord>, PipelineError> {
        let timeout = Duration::from_millis(self.config.coordination.cache_open_timeout_ms);
        let orchestrator = self.orchestrator(self.store.session(timeout).await?)?;
        let repairer = Repairer::new(self.writer.clone(), orchestrator.journal.clone());
        let output_file = &self.config.storage.output_file;

        let mut records = repairer.repair_sources(&self.paths.data_dir);
        match orchestrator.lock.acquire(&orchestrator.resource_key()).await {
            Some(mut guard) => {
                records.push(repairer.repair_artifact(&self.paths.data_dir, output_file));
                guard.release();
            }
            None => {
                warn!(file = %output_file, "Artifact repair skipped: generation lock is held");
                records.push(repairer.artifact_skipped(output_file));
            }
        }

        if let Err(e) = orchestrator.context.invalidate() {
            warn!(error = %e, "Failed to invalidate context bundle after repair");
        }
        Ok(records)
    }

    /// Reads the artifact only; never touches the cache database.
    pub fn feed(&self, limit: Option<usize>) -> Feed {
        feed::read_feed(&self.paths.output_path, limit)
    }

    fn runtime_state(&self, cache: SharedCache) -> Result<RuntimeState, PipelineError> {
        let circuit = self.breaker(&cache).state()?;
        let calls_this_hour =
            RateLimiter::new(cache.clone(), self.config.generation.calls_per_hour)
                .calls_this_hour()?;
        let recent_errors = Journal::new(cache)?.recent_error_count(HEALTH_WINDOW)?;
        Ok(RuntimeState {
            recent_errors,
            calls_this_hour,
            circuit: circuit.state,
            circuit_failures: circuit.failures,
        })
    }

    /// Always renders. Counters kept in the cache are left out while a run
    /// in another process holds the database.
    pub fn status(&self) -> StatusReport {
        let api_key_set = self.provider.is_some();
        let data_dir_writable = integrity::dir_writable(&self.paths.data_dir);
        let runtime = match self
            .store
            .try_session()
            .map_err(PipelineError::from)
            .and_then(|cache| self.runtime_state(cache))
        {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(error = %e, "Runtime state unavailable");
                None
            }
        };
        let last_generation = std::fs::metadata(&self.paths.output_path)
            .and_then(|m| m.modified())
            .ok()
            .map(|t| {
                DateTime::<Local>::from(t)
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string()
            });

        StatusReport {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config: ConfigSnapshot {
                api_key_set,
                prompt_set: !self.config.generation.prompt.trim().is_empty(),
                model: self.config.provider.model.clone(),
                temperature: self.config.generation.temperature,
                max_tokens: self.config.generation.max_tokens,
                calls_per_hour: self.config.generation.calls_per_hour,
                lock_backend: self.config.coordination.lock_backend,
            },
            data_dir: self.paths.data_dir.clone(),
            data_dir_writable,
            last_generation,
            health: assess_health(data_dir_writable, api_key_set, runtime.as_ref()),
            runtime,
        }
    }
}
