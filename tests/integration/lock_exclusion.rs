//! Mutual exclusion across lock backends and through the generation run.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nattevakt::cache::SharedCache;
use nattevakt::config::LockBackendKind;
use nattevakt::generation::RunOutcome;
use nattevakt::lock::{LockBackend, LockManager};
use nattevakt::writer::AtomicWriter;
use tempfile::TempDir;

use crate::integration::test_utils::{build_api, test_config, ScriptedProvider};

const WORKERS: usize = 6;

async fn assert_never_two_holders(manager: Arc<LockManager>) {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let acquired = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..WORKERS {
        let manager = manager.clone();
        let active = active.clone();
        let peak = peak.clone();
        let acquired = acquired.clone();
        tasks.push(tokio::spawn(async move {
            if let Some(mut handle) = manager.acquire("nattavis.json:generation").await {
                acquired.fetch_add(1, Ordering::SeqCst);
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                assert!(handle.release());
                assert!(!handle.release());
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(acquired.load(Ordering::SeqCst), WORKERS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn file_backend_serializes_holders() {
    let dir = TempDir::new().unwrap();
    let manager = LockManager::new(
        LockBackend::LocalFile {
            dir: dir.path().to_path_buf(),
        },
        Duration::from_secs(10),
        Duration::from_millis(5),
    );
    assert_never_two_holders(Arc::new(manager)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shared_backend_serializes_holders() {
    let manager = LockManager::new(
        LockBackend::Shared {
            cache: SharedCache::temporary().unwrap(),
        },
        Duration::from_secs(10),
        Duration::from_millis(5),
    );
    assert_never_two_holders(Arc::new(manager)).await;
}

#[tokio::test]
async fn acquire_times_out_while_held() {
    let cache = SharedCache::temporary().unwrap();
    let manager = LockManager::new(
        LockBackend::Shared { cache },
        Duration::from_millis(50),
        Duration::from_millis(10),
    );
    let held = manager.try_acquire("key").unwrap().unwrap();
    assert!(held.is_held());
    assert!(manager.acquire("key").await.is_none());
    assert!(manager.acquire("other").await.is_some());
    drop(held);
    assert!(manager.acquire("key").await.is_some());
}

#[tokio::test]
async fn held_generation_lock_skips_the_run() {
    let ws = TempDir::new().unwrap();
    let mut config = test_config(ws.path());
    config.coordination.lock_backend = LockBackendKind::LocalFile;
    let provider = ScriptedProvider::replying("[]");
    let api = build_api(&ws, config, Some(provider.clone()), AtomicWriter::new());

    let external = LockManager::new(
        LockBackend::LocalFile {
            dir: api.paths().lock_dir.clone(),
        },
        Duration::from_millis(50),
        Duration::from_millis(10),
    );
    let key = format!("{}:generation", api.paths().output_path.display());
    let _held = external.try_acquire(&key).unwrap().unwrap();

    let report = api.generate_now().await;
    assert_eq!(report.outcome, RunOutcome::LockFailed);
    assert_eq!(provider.calls(), 0);
    assert!(!api.paths().output_path.exists());
}
