//! Configuration System
//!
//! Typed, layered configuration for the generator. Values come from built-in
//! defaults, the user-level config file, the workspace `nattevakt.toml` and
//! `NATTEVAKT__SECTION__KEY` environment variables, in that order. The result
//! is validated once at load time so the pipeline never sees out-of-range
//! values.

use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod loader;
mod merge;
mod sources;

pub use crate::provider::ProviderConfig;
pub use loader::ConfigLoader;

/// Longest operator prompt accepted.
pub const MAX_PROMPT_CHARS: usize = 2000;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NattevaktConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub coordination: CoordinationConfig,

    #[serde(default)]
    pub breaker: BreakerConfig,

    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage paths. Relative paths resolve against the workspace root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the lore sources and the generated feed
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Directory for the shared cache database and local lock files
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// File name of the generated feed inside `data_dir`
    #[serde(default = "default_output_file")]
    pub output_file: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".nattevakt")
}

fn default_output_file() -> String {
    "nattavis.json".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            state_dir: default_state_dir(),
            output_file: default_output_file(),
        }
    }
}

/// Absolute paths derived from [`StorageConfig`].
#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub lock_dir: PathBuf,
    pub output_path: PathBuf,
}

impl StorageConfig {
    pub fn resolve_paths(&self, workspace_root: &Path) -> ResolvedPaths {
        let data_dir = resolve(workspace_root, &self.data_dir);
        let state_dir = resolve(workspace_root, &self.state_dir);
        ResolvedPaths {
            output_path: data_dir.join(&self.output_file),
            cache_dir: state_dir.join("cache"),
            lock_dir: state_dir.join("locks"),
            data_dir,
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.data_dir.as_os_str().is_empty() {
            return Err("data_dir cannot be empty".to_string());
        }
        if self.state_dir.as_os_str().is_empty() {
            return Err("state_dir cannot be empty".to_string());
        }
        if self.output_file.is_empty()
            || self.output_file.contains('/')
            || self.output_file.contains('\\')
            || self.output_file == ".."
        {
            return Err(format!(
                "output_file must be a plain file name, got '{}'",
                self.output_file
            ));
        }
        Ok(())
    }
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Prompt and sampling settings for each run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Operator prompt, prepended to the context instructions
    #[serde(default = "default_prompt")]
    pub prompt: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// External API calls allowed per clock hour
    #[serde(default = "default_calls_per_hour")]
    pub calls_per_hour: u64,

    /// Interval between runs in `schedule` mode
    #[serde(default = "default_schedule_interval_secs")]
    pub schedule_interval_secs: u64,
}

fn default_prompt() -> String {
    "Generer 3-5 kreative lokalnyheter fra Pjuskeby på norsk.".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    500
}

fn default_calls_per_hour() -> u64 {
    60
}

fn default_schedule_interval_secs() -> u64 {
    3600
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            prompt: default_prompt(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            calls_per_hour: default_calls_per_hour(),
            schedule_interval_secs: default_schedule_interval_secs(),
        }
    }
}

impl GenerationConfig {
    fn validate(&self) -> Result<(), String> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(format!(
                "temperature must be within 0.0-2.0, got {}",
                self.temperature
            ));
        }
        if !(50..=1000).contains(&self.max_tokens) {
            return Err(format!(
                "max_tokens must be within 50-1000, got {}",
                self.max_tokens
            ));
        }
        if self.prompt.trim().is_empty() {
            return Err("prompt cannot be empty".to_string());
        }
        let chars = self.prompt.chars().count();
        if chars > MAX_PROMPT_CHARS {
            return Err(format!(
                "prompt is {} characters, limit is {}",
                chars, MAX_PROMPT_CHARS
            ));
        }
        if self.calls_per_hour == 0 {
            return Err("calls_per_hour must be at least 1".to_string());
        }
        if self.schedule_interval_secs == 0 {
            return Err("schedule_interval_secs must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Lock backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockBackendKind {
    /// Advisory file locks under the state directory (single host)
    #[default]
    LocalFile,
    /// Lock records in the shared cache database
    Shared,
}

impl std::fmt::Display for LockBackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockBackendKind::LocalFile => write!(f, "local_file"),
            LockBackendKind::Shared => write!(f, "shared"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    #[serde(default)]
    pub lock_backend: LockBackendKind,

    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long admin commands wait for a cache database held by a running
    /// generation in another process
    #[serde(default = "default_cache_open_timeout_ms")]
    pub cache_open_timeout_ms: u64,
}

fn default_acquire_timeout_ms() -> u64 {
    30_000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_cache_open_timeout_ms() -> u64 {
    60_000
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            lock_backend: LockBackendKind::default(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            cache_open_timeout_ms: default_cache_open_timeout_ms(),
        }
    }
}

impl CoordinationConfig {
    fn validate(&self) -> Result<(), String> {
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be at least 1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds the circuit stays open before a trial call
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cooldown_secs() -> u64 {
    300
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_context_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Key material for the bundle hash. Falls back to the installation secret.
    #[serde(default)]
    pub secret: Option<String>,
}

fn default_context_ttl_secs() -> u64 {
    1800
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_context_ttl_secs(),
            secret: None,
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    Storage(String),
    Generation(String),
    Provider(String),
    Coordination(String),
    Breaker(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Storage(msg) => write!(f, "Storage: {}", msg),
            ValidationError::Generation(msg) => write!(f, "Generation: {}", msg),
            ValidationError::Provider(msg) => write!(f, "Provider: {}", msg),
            ValidationError::Coordination(msg) => write!(f, "Coordination: {}", msg),
            ValidationError::Breaker(msg) => write!(f, "Breaker: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl NattevaktConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = self.storage.validate() {
            errors.push(ValidationError::Storage(e));
        }
        if let Err(e) = self.generation.validate() {
            errors.push(ValidationError::Generation(e));
        }
        if let Err(e) = self.provider.validate() {
            errors.push(ValidationError::Provider(e));
        }
        if let Err(e) = self.coordination.validate() {
            errors.push(ValidationError::Coordination(e));
        }
        if self.breaker.failure_threshold == 0 {
            errors.push(ValidationError::Breaker(
                "failure_threshold must be at least 1".to_string(),
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = NattevaktConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.generation.calls_per_hour, 60);
        assert_eq!(config.coordination.lock_backend, LockBackendKind::LocalFile);
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.context.cache_ttl_secs, 1800);
    }

    #[test]
    fn test_generation_bounds() {
        let mut config = NattevaktConfig::default();
        config.generation.temperature = 2.5;
        config.generation.max_tokens = 20;
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("temperature"));

        config.generation.temperature = 2.0;
        let errors = config.validate().unwrap_err();
        assert!(errors[0].to_string().contains("max_tokens"));

        config.generation.max_tokens = 1000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_prompt_length_counts_characters() {
        let mut config = NattevaktConfig::default();
        config.generation.prompt = "ø".repeat(MAX_PROMPT_CHARS);
        assert!(config.validate().is_ok());
        config.generation.prompt.push('ø');
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_output_file_must_be_plain_name() {
        let mut config = NattevaktConfig::default();
        config.storage.output_file = "../escape.json".to_string();
        assert!(matches!(
            config.validate().unwrap_err()[0],
            ValidationError::Storage(_)
        ));
    }

    #[test]
    fn test_resolve_paths() {
        let storage = StorageConfig::default();
        let paths = storage.resolve_paths(Path::new("/srv/nv"));
        assert_eq!(paths.data_dir, PathBuf::from("/srv/nv/data"));
        assert_eq!(paths.output_path, PathBuf::from("/srv/nv/data/nattavis.json"));
        assert_eq!(paths.cache_dir, PathBuf::from("/srv/nv/.nattevakt/cache"));
        assert_eq!(paths.lock_dir, PathBuf::from("/srv/nv/.nattevakt/locks"));

        let absolute = StorageConfig {
            data_dir: PathBuf::from("/var/lib/nattevakt"),
            ..StorageConfig::default()
        };
        assert_eq!(
            absolute.resolve_paths(Path::new("/srv/nv")).data_dir,
            PathBuf::from("/var/lib/nattevakt")
        );
    }

    #[test]
    fn test_lock_backend_deserializes_snake_case() {
        let config: CoordinationConfig = toml::from_str("lock_backend = \"shared\"").unwrap();
        assert_eq!(config.lock_backend, LockBackendKind::Shared);
        assert_eq!(config.poll_interval_ms, 100);
    }
}
