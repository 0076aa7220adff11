//! Shared test utilities for integration tests
//!
//! A scripted provider standing in for the external API, an isolated
//! workspace layout and serialized access to process environment variables.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use nattevakt::api::NattevaktApi;
use nattevakt::cache::{CacheStore, SharedCache};
use nattevakt::config::{LockBackendKind, NattevaktConfig};
use nattevakt::error::ProviderError;
use nattevakt::provider::{
    ChatMessage, CompletionOptions, CompletionResponse, ModelProviderClient, TokenUsage,
};
use nattevakt::writer::AtomicWriter;
use tempfile::TempDir;

/// Global mutex serializing environment variable access across tests.
static ENV_MUTEX: Mutex<()> = Mutex::new(());

/// Replays a fixed list of responses and records every prompt it receives.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<String, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn replying(content: &str) -> Arc<Self> {
        Self::new(vec![Ok(content.to_string())])
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    /// User message of every call, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelProviderClient for ScriptedProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        _options: CompletionOptions,
    ) -> Result<CompletionResponse, ProviderError> {
        let user = messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.prompts.lock().unwrap().push(user);
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::RequestFailed("script exhausted".into())));
        next.map(|content| CompletionResponse {
            content,
            model: "scripted".to_string(),
            usage: TokenUsage::default(),
            finish_reason: Some("stop".to_string()),
        })
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Configuration rooted in `workspace`, using the shared-cache lock backend
/// and short lock timeouts.
pub fn test_config(workspace: &Path) -> NattevaktConfig {
    let mut config = NattevaktConfig::default();
    config.storage.data_dir = workspace.join("data");
    config.storage.state_dir = workspace.join("state");
    config.coordination.lock_backend = LockBackendKind::Shared;
    config.coordination.acquire_timeout_ms = 200;
    config.coordination.poll_interval_ms = 10;
    config.context.secret = Some("integration-secret".to_string());
    config
}

/// Facade over a temporary cache with the given provider and writer.
pub fn build_api(
    workspace: &TempDir,
    config: NattevaktConfig,
    provider: Option<Arc<dyn ModelProviderClient>>,
    writer: AtomicWriter,
) -> NattevaktApi {
    let cache = SharedCache::temporary().unwrap();
    NattevaktApi::with_components(config, workspace.path(), cache, provider, writer).unwrap()
}

/// Facade over the on-disk cache database in the workspace state directory.
/// Two facades built this way contend for that database like two processes.
pub fn build_api_on_disk(
    workspace: &TempDir,
    config: NattevaktConfig,
    provider: Option<Arc<dyn ModelProviderClient>>,
) -> NattevaktApi {
    let cache_dir = config.storage.resolve_paths(workspace.path()).cache_dir;
    let store = CacheStore::at(
        cache_dir,
        std::time::Duration::from_millis(config.coordination.poll_interval_ms),
    );
    NattevaktApi::with_store(config, workspace.path(), store, provider, AtomicWriter::new()).unwrap()
}

pub fn write_source(workspace: &TempDir, file: &str, content: &str) {
    let dir = workspace.path().join("data");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(file), content).unwrap();
}

pub fn read_artifact(api: &NattevaktApi) -> serde_json::Value {
    let raw = std::fs::read_to_string(&api.paths().output_path).unwrap();
    serde_json::from_str(&raw).unwrap()
}

/// Run `f` with the given environment variables set, restoring the previous
/// values afterwards.
pub fn with_env<F, R>(vars: &[(&str, Option<&str>)], f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let saved: Vec<(String, Option<String>)> = vars
        .iter()
        .map(|(k, _)| (k.to_string(), std::env::var(k).ok()))
        .collect();
    for (key, value) in vars {
        match value {
            Some(v) => std::env::set_var(key, v),
            None => std::env::remove_var(key),
        }
    }
    let result = f();
    for (key, value) in saved {
        match value {
            Some(v) => std::env::set_var(&key, v),
            None => std::env::remove_var(&key),
        }
    }
    result
}
