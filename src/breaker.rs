//! Circuit breaker around the external generation API.
//!
//! State lives in the shared cache so that every process sees the same
//! circuit. Admission is decided in one atomic read-modify-write, which also
//! guarantees that a half-open circuit lets exactly one trial call through.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::{now_millis, SharedCache};
use crate::error::{PipelineError, ProviderError, StorageError};

const STATE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitState {
    pub failures: u32,
    /// Epoch milliseconds of the most recent failure, 0 if none
    pub last_failure: u64,
    pub state: BreakerState,
    /// Epoch milliseconds at which the in-flight half-open trial was admitted
    #[serde(default)]
    pub trial_started: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Admit { trial: bool },
    Reject { retry_in: Duration },
}

pub struct CircuitBreaker {
    cache: SharedCache,
    key: String,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(cache: SharedCache, name: &str, threshold: u32, cooldown: Duration) -> Self {
        Self {
            cache,
            key: format!("circuit_breaker_{}", name),
            threshold: threshold.max(1),
            cooldown,
        }
    }

    pub fn state(&self) -> Result<CircuitState, StorageError> {
        Ok(self.cache.get(&self.key)?.unwrap_or_default())
    }

    /// Force the circuit closed.
    pub fn reset(&self) -> Result<(), StorageError> {
        self.cache
            .set(&self.key, &CircuitState::default(), Some(STATE_TTL))
    }

    /// Run `f` if the circuit admits it and record the outcome. A rejected
    /// call fails with `CircuitOpen` without invoking `f`.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, PipelineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let trial = match self.admit()? {
            Admission::Admit { trial } => trial,
            Admission::Reject { retry_in } => {
                return Err(ProviderError::CircuitOpen {
                    retry_in_secs: retry_in.as_secs().max(1),
                }
                .into());
            }
        };

        match f().await {
            Ok(value) => {
                self.record_success(trial)?;
                Ok(value)
            }
            Err(e) => {
                self.record_failure(trial)?;
                Err(e.into())
            }
        }
    }

    fn admit(&self) -> Result<Admission, StorageError> {
        let cooldown_ms = self.cooldown.as_millis() as u64;
        self.cache
            .update::<CircuitState, Admission, _>(&self.key, Some(STATE_TTL), |current| {
                let mut state = current.unwrap_or_default();
                let now = now_millis();
                let admission = match state.state {
                    BreakerState::Closed => Admission::Admit { trial: false },
                    BreakerState::Open => {
                        let elapsed = now.saturating_sub(state.last_failure);
                        if elapsed >= cooldown_ms {
                            state.state = BreakerState::HalfOpen;
                            state.trial_started = Some(now);
                            Admission::Admit { trial: true }
                        } else {
                            Admission::Reject {
                                retry_in: Duration::from_millis(cooldown_ms - elapsed),
                            }
                        }
                    }
                    BreakerState::HalfOpen => match state.trial_started {
                        Some(started) if now.saturating_sub(started) < cooldown_ms => {
                            Admission::Reject {
                                retry_in: Duration::from_millis(
                                    cooldown_ms - now.saturating_sub(started),
                                ),
                            }
                        }
                        // No trial in flight, or the last one was abandoned.
                        _ => {
                            state.trial_started = Some(now);
                            Admission::Admit { trial: true }
                        }
                    },
                };
                (state, admission)
            })
    }

    fn record_success(&self, trial: bool) -> Result<(), StorageError> {
        let previous = self.state()?;
        self.reset()?;
        if trial || previous.failures > 0 {
            info!(circuit = %self.key, "Circuit closed after successful call");
        }
        Ok(())
    }

    fn record_failure(&self, trial: bool) -> Result<(), StorageError> {
        let threshold = self.threshold;
        let opened = self
            .cache
            .update::<CircuitState, bool, _>(&self.key, Some(STATE_TTL), |current| {
                let mut state = current.unwrap_or_default();
                let was_open = state.state == BreakerState::Open;
                state.failures = state.failures.saturating_add(1);
                state.last_failure = now_millis();
                state.trial_started = None;
                state.state = if trial
                    || state.state != BreakerState::Closed
                    || state.failures >= threshold
                {
                    BreakerState::Open
                } else {
                    BreakerState::Closed
                };
                let opened = !was_open && state.state == BreakerState::Open;
                (state, opened)
            })?;
        if opened {
            warn!(
                circuit = %self.key,
                cooldown_secs = self.cooldown.as_secs(),
                "Circuit opened"
            );
        }
        Ok(())
    }
}
