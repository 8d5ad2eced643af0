//! Tag invalidation over the LMDB backend.

mod support;

use std::sync::Arc;
use std::time::Duration;

use support::Harness;
use tagcache_storage::KeyNamespace;
use tagcache_tagging::{CacheBackend, IsolationLevel, LmdbBackend, SetOutcome};
use tagcache_test_utils::fixtures;
use tempfile::TempDir;

const TTL: Option<Duration> = Some(Duration::from_secs(120));

fn lmdb_harness(dir: &TempDir, level: IsolationLevel) -> Harness {
    let backend = LmdbBackend::new(dir.path(), 16, KeyNamespace::default()).unwrap();
    Harness::with_backend(Arc::new(backend), fixtures::config(level))
}

#[tokio::test]
async fn test_invalidation_over_lmdb() {
    let dir = TempDir::new().unwrap();
    let harness = lmdb_harness(&dir, IsolationLevel::ReadCommitted);
    let mut session = harness.session();

    session.set("a", "A", ["shared"], TTL, None).await.unwrap();
    session.set("b", "B", ["other"], TTL, None).await.unwrap();
    assert_eq!(session.get::<String>("a", None).await.unwrap().as_deref(), Some("A"));

    session.invalidate_tags(["shared"], None).await.unwrap();
    assert_eq!(session.get::<String>("a", None).await.unwrap(), None);
    assert_eq!(session.get::<String>("b", None).await.unwrap().as_deref(), Some("B"));
}

#[tokio::test]
async fn test_entries_and_versions_survive_reopen() {
    let dir = TempDir::new().unwrap();

    {
        let harness = lmdb_harness(&dir, IsolationLevel::ReadCommitted);
        let mut session = harness.session();
        session.set("page", &42, ["p"], TTL, None).await.unwrap();
    }

    let harness = lmdb_harness(&dir, IsolationLevel::ReadCommitted);
    let mut session = harness.session();
    assert_eq!(session.get::<i32>("page", None).await.unwrap(), Some(42));

    session.invalidate_tags(["p"], None).await.unwrap();
    assert_eq!(session.get::<i32>("page", None).await.unwrap(), None);
}

#[tokio::test]
async fn test_repeatable_read_over_lmdb() {
    let dir = TempDir::new().unwrap();
    let harness = lmdb_harness(&dir, IsolationLevel::RepeatableRead);
    let mut alice = harness.session_named("alice");
    let mut bob = harness.session_named("bob");

    alice.begin_transaction();
    alice.invalidate_tags(["t"], None).await.unwrap();

    bob.begin_transaction();
    assert_eq!(
        bob.set("n", &1, ["t"], TTL, None).await.unwrap(),
        SetOutcome::Skipped
    );
    bob.finish_transaction().await.unwrap();
    alice.finish_transaction().await.unwrap();

    let stats = harness.backend.stats().await.unwrap();
    assert!(stats.entry_count >= 1);
}
