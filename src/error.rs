//! Error types for the night-watch generation pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Cache database {0:?} is in use by another process")]
    Busy(PathBuf),
}

impl StorageError {
    pub fn is_busy(&self) -> bool {
        matches!(self, StorageError::Busy(_))
    }
}

/// Errors raised by the external generation API client and its guard.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Provider request failed: {0}")]
    RequestFailed(String),

    #[error("Provider authentication failed: {0}")]
    AuthFailed(String),

    #[error("Provider rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Provider returned an invalid response: {0}")]
    InvalidResponse(String),

    #[error("Circuit open: external API calls suspended for another {retry_in_secs}s")]
    CircuitOpen { retry_in_secs: u64 },
}

/// Pipeline errors. Every variant is converted into a run outcome at the
/// orchestrator boundary.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Lock unavailable for resource '{0}'")]
    LockUnavailable(String),

    #[error("Rate limit exceeded: {calls} calls this hour (ceiling {ceiling})")]
    RateLimitExceeded { calls: u64, ceiling: u64 },

    #[error("Prompt rejected: {0}")]
    PromptRejected(String),

    #[error("External API error: {0}")]
    ExternalApi(#[from] ProviderError),

    #[error("No valid items could be extracted from the response")]
    ParseEmpty,

    #[error("Write verification failed for {0:?}")]
    WriteVerificationFailed(PathBuf),

    #[error("Context bundle integrity mismatch")]
    IntegrityMismatch,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Stable machine-readable code used in logs, the journal and run reports.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::LockUnavailable(_) => "lock_unavailable",
            PipelineError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            PipelineError::PromptRejected(_) => "prompt_rejected",
            PipelineError::ExternalApi(ProviderError::CircuitOpen { .. }) => "circuit_open",
            PipelineError::ExternalApi(_) => "external_api",
            PipelineError::ParseEmpty => "parse_empty",
            PipelineError::WriteVerificationFailed(_) => "write_verification_failed",
            PipelineError::IntegrityMismatch => "integrity_mismatch",
            PipelineError::Storage(_) => "storage",
            PipelineError::Config(_) => "config",
        }
    }

    /// Pipeline module the error originates from.
    pub fn module(&self) -> &'static str {
        match self {
            PipelineError::LockUnavailable(_) => "lock",
            PipelineError::RateLimitExceeded { .. } => "rate",
            PipelineError::PromptRejected(_) => "prompt",
            PipelineError::ExternalApi(ProviderError::CircuitOpen { .. }) => "breaker",
            PipelineError::ExternalApi(_) => "provider",
            PipelineError::ParseEmpty => "response",
            PipelineError::WriteVerificationFailed(_) => "writer",
            PipelineError::IntegrityMismatch => "context",
            PipelineError::Storage(_) => "storage",
            PipelineError::Config(_) => "config",
        }
    }
}

impl From<config::ConfigError> for PipelineError {
    fn from(err: config::ConfigError) -> Self {
        PipelineError::Config(err.to_string())
    }
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::IoError(std::io::Error::new(
            std::io::ErrorKind::Other,
            err.to_string(),
        ))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::InvalidData(err.to_string())
    }
}
