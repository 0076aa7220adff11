//! Hourly call ceiling for the external generation API.

use std::time::Duration;

use chrono::{DateTime, Local};

use crate::cache::SharedCache;
use crate::error::{PipelineError, StorageError};

const COUNTER_TTL: Duration = Duration::from_secs(3600);

/// Counts external API calls per local clock hour in the shared cache.
#[derive(Clone)]
pub struct RateLimiter {
    cache: SharedCache,
    ceiling: u64,
}

impl RateLimiter {
    pub fn new(cache: SharedCache, ceiling: u64) -> Self {
        Self { cache, ceiling }
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    /// Counter key for the hour containing `at`.
    pub fn key_for(at: DateTime<Local>) -> String {
        format!("api_calls_{}", at.format("%Y-%m-%d-%H"))
    }

    pub fn calls_this_hour(&self) -> Result<u64, StorageError> {
        Ok(self
            .cache
            .get::<u64>(&Self::key_for(Local::now()))?
            .unwrap_or(0))
    }

    /// Fails with `RateLimitExceeded` once the ceiling has been reached.
    pub fn check(&self) -> Result<(), PipelineError> {
        let calls = self.calls_this_hour()?;
        if calls >= self.ceiling {
            return Err(PipelineError::RateLimitExceeded {
                calls,
                ceiling: self.ceiling,
            });
        }
        Ok(())
    }

    /// Record one call. The counter expires an hour after its first call.
    pub fn record_call(&self) -> Result<u64, StorageError> {
        self.cache
            .increment(&Self::key_for(Local::now()), Some(COUNTER_TTL))
    }
}
