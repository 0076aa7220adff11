//! Circuit breaker behavior observed through generation runs.

use std::time::Duration;

use nattevakt::breaker::{BreakerState, CircuitBreaker};
use nattevakt::cache::SharedCache;
use nattevakt::error::{PipelineError, ProviderError};
use nattevakt::generation::RunOutcome;
use nattevakt::writer::AtomicWriter;
use tempfile::TempDir;

use crate::integration::test_utils::{build_api, test_config, ScriptedProvider};

const GOOD: &str = r#"[{"tid":"02:30","tekst":"kl 02:30 – Elgen tok en tur over torget i Pjuskeby","score":60}]"#;

fn failure() -> Result<String, ProviderError> {
    Err(ProviderError::RequestFailed("upstream 503".into()))
}

#[tokio::test]
async fn three_failures_open_the_circuit_and_skip_the_provider() {
    let ws = TempDir::new().unwrap();
    let provider = ScriptedProvider::new(vec![failure(), failure(), failure(), Ok(GOOD.into())]);
    let api = build_api(&ws, test_config(ws.path()), Some(provider.clone()), AtomicWriter::new());

    for _ in 0..3 {
        let report = api.generate_now().await;
        assert_eq!(report.failure.unwrap().code, "external_api");
    }
    assert_eq!(provider.calls(), 3);

    let report = api.generate_now().await;
    let failure = report.failure.unwrap();
    assert_eq!(failure.code, "circuit_open");
    assert_eq!(failure.module, "breaker");
    assert_eq!(provider.calls(), 3);

    let status = api.status();
    assert_eq!(status.health.to_string(), "degraded");
    let runtime = status.runtime.unwrap();
    assert_eq!(runtime.circuit, BreakerState::Open);
    assert_eq!(runtime.circuit_failures, 3);
}

#[tokio::test]
async fn elapsed_cooldown_allows_a_trial_that_closes_the_circuit() {
    let ws = TempDir::new().unwrap();
    let mut config = test_config(ws.path());
    config.breaker.cooldown_secs = 0;
    let provider = ScriptedProvider::new(vec![failure(), failure(), failure(), Ok(GOOD.into())]);
    let api = build_api(&ws, config, Some(provider.clone()), AtomicWriter::new());

    for _ in 0..3 {
        api.generate_now().await;
    }
    assert_eq!(api.status().runtime.unwrap().circuit, BreakerState::Open);

    let report = api.generate_now().await;
    assert_eq!(report.outcome, RunOutcome::Success);
    assert_eq!(provider.calls(), 4);

    let runtime = api.status().runtime.unwrap();
    assert_eq!(runtime.circuit, BreakerState::Closed);
    assert_eq!(runtime.circuit_failures, 0);
}

#[tokio::test]
async fn state_is_shared_between_breakers_on_one_cache() {
    let cache = SharedCache::temporary().unwrap();
    let first = CircuitBreaker::new(cache.clone(), "generation_api", 2, Duration::from_secs(300));
    let second = CircuitBreaker::new(cache, "generation_api", 2, Duration::from_secs(300));

    for _ in 0..2 {
        let result: Result<(), PipelineError> = first
            .call(|| async { Err(ProviderError::AuthFailed("401".into())) })
            .await;
        assert!(result.is_err());
    }

    let mut invoked = false;
    let result = second
        .call(|| {
            invoked = true;
            async { Ok::<_, ProviderError>(()) }
        })
        .await;
    assert!(!invoked);
    assert!(matches!(
        result,
        Err(PipelineError::ExternalApi(ProviderError::CircuitOpen { .. }))
    ));

    second.reset().unwrap();
    assert_eq!(first.state().unwrap().state, BreakerState::Closed);
}
