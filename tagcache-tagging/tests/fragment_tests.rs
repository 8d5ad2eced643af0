//! Nested fragment caching: outer entries inherit the tags of inner ones.

mod support;

use std::time::Duration;

use futures_util::FutureExt;
use support::Harness;
use tagcache_core::StorageError;
use tagcache_tagging::{IsolationLevel, TagCacheError, NO_TAGS};
use tagcache_test_utils::{fixtures, CountingBackend};

const TTL: Option<Duration> = Some(Duration::from_secs(120));

#[tokio::test]
async fn test_inner_invalidation_reaches_outer_entry() {
    let harness = Harness::new(IsolationLevel::ReadCommitted);
    let mut session = harness.session();

    // Producing A: miss begins the fragment
    assert_eq!(session.get::<String>("A", None).await.unwrap(), None);
    // B produced inside A
    assert_eq!(session.get::<String>("B", None).await.unwrap(), None);
    session.set("B", "b", ["t2"], TTL, None).await.unwrap();
    session.set("A", "a", ["t1"], TTL, None).await.unwrap();

    assert_eq!(session.get::<String>("A", None).await.unwrap().as_deref(), Some("a"));
    assert_eq!(session.get::<String>("B", None).await.unwrap().as_deref(), Some("b"));

    session.invalidate_tags(["t2"], None).await.unwrap();

    assert_eq!(session.get::<String>("B", None).await.unwrap(), None);
    session.abort("B");
    assert_eq!(session.get::<String>("A", None).await.unwrap(), None);
}

#[tokio::test]
async fn test_outer_invalidation_does_not_reach_inner_entry() {
    let harness = Harness::new(IsolationLevel::ReadCommitted);
    let mut session = harness.session();

    let _ = session.get::<String>("A", None).await.unwrap();
    let _ = session.get::<String>("B", None).await.unwrap();
    session.set("B", "b", ["t2"], TTL, None).await.unwrap();
    session.set("A", "a", ["t1"], TTL, None).await.unwrap();

    session.invalidate_tags(["t1"], None).await.unwrap();

    assert_eq!(session.get::<String>("B", None).await.unwrap().as_deref(), Some("b"));
    assert_eq!(session.get::<String>("A", None).await.unwrap(), None);
}

#[tokio::test]
async fn test_cached_inner_hit_still_contributes_tags() {
    let harness = Harness::new(IsolationLevel::ReadCommitted);
    let mut session = harness.session();

    session.set("B", "b", ["t2"], TTL, None).await.unwrap();

    let _ = session.get::<String>("A", None).await.unwrap();
    // B is a hit; its tags still flow into A
    assert_eq!(session.get::<String>("B", None).await.unwrap().as_deref(), Some("b"));
    session.set("A", "a", NO_TAGS, TTL, None).await.unwrap();

    session.invalidate_tags(["t2"], None).await.unwrap();
    assert_eq!(session.get::<String>("A", None).await.unwrap(), None);
}

#[tokio::test]
async fn test_three_levels_deep() {
    let harness = Harness::new(IsolationLevel::ReadCommitted);
    let mut session = harness.session();

    let _ = session.get::<i32>("page", None).await.unwrap();
    let _ = session.get::<i32>("sidebar", None).await.unwrap();
    let _ = session.get::<i32>("widget", None).await.unwrap();
    session.set("widget", &3, ["w"], TTL, None).await.unwrap();
    session.set("sidebar", &2, ["s"], TTL, None).await.unwrap();
    session.set("page", &1, ["p"], TTL, None).await.unwrap();
    assert!(session.fragments().is_empty());

    session.invalidate_tags(["w"], None).await.unwrap();

    assert_eq!(session.get_final::<i32>("page", None).await.unwrap(), None);
    assert_eq!(session.get_final::<i32>("sidebar", None).await.unwrap(), None);
    assert_eq!(session.get_final::<i32>("widget", None).await.unwrap(), None);
}

#[tokio::test]
async fn test_final_read_does_not_nest() {
    let harness = Harness::new(IsolationLevel::ReadCommitted);
    let mut session = harness.session();

    session.set("B", "b", ["t2"], TTL, None).await.unwrap();

    let _ = session.get::<String>("A", None).await.unwrap();
    let _ = session.get_final::<String>("B", None).await.unwrap();
    session.set("A", "a", ["t1"], TTL, None).await.unwrap();

    // B was never begun as a fragment of A, so A does not depend on t2
    session.invalidate_tags(["t2"], None).await.unwrap();
    assert_eq!(session.get::<String>("A", None).await.unwrap().as_deref(), Some("a"));
    assert_eq!(session.get::<String>("B", None).await.unwrap(), None);
}

#[tokio::test]
async fn test_get_or_set_with_nests_fragments() {
    let harness = Harness::new(IsolationLevel::ReadCommitted);
    let mut session = harness.session();

    let page: String = session
        .get_or_set_with("page", ["layout"], TTL, None, |s| {
            async move {
                let body: String = s
                    .get_or_set_with("body", ["Article.pk:1"], TTL, None, |_| {
                        async { Ok("article body".to_string()) }.boxed()
                    })
                    .await?;
                Ok::<_, TagCacheError>(format!("<main>{}</main>", body))
            }
            .boxed()
        })
        .await
        .unwrap();
    assert_eq!(page, "<main>article body</main>");

    // Second call is a hit and does not run the producer
    let again: String = session
        .get_or_set_with("page", ["layout"], TTL, None, |_| {
            async {
                Err(TagCacheError::Storage(StorageError::Backend {
                    operation: "produce".to_string(),
                    reason: "producer ran on a hit".to_string(),
                }))
            }
            .boxed()
        })
        .await
        .unwrap();
    assert_eq!(again, page);

    session.invalidate_tags(["Article.pk:1"], None).await.unwrap();
    assert_eq!(session.get_final::<String>("page", None).await.unwrap(), None);
}

#[tokio::test]
async fn test_get_or_set_with_failure_aborts_fragment() {
    let harness = Harness::new(IsolationLevel::ReadCommitted);
    let mut session = harness.session();

    let result: Result<String, _> = session
        .get_or_set_with("page", ["t"], TTL, None, |_| {
            async {
                Err(TagCacheError::Storage(StorageError::Backend {
                    operation: "render".to_string(),
                    reason: "template missing".to_string(),
                }))
            }
            .boxed()
        })
        .await;

    assert!(result.is_err());
    assert!(session.fragments().is_empty());
    assert_eq!(session.get_final::<String>("page", None).await.unwrap(), None);
}

#[tokio::test]
async fn test_skipped_write_still_finishes_fragment() {
    let harness = Harness::new(IsolationLevel::RepeatableRead);
    let mut other = harness.session_named("other");
    let mut session = harness.session_named("me");

    other.begin_transaction();
    other.invalidate_tags(["locked"], None).await.unwrap();

    let _ = session.get::<String>("outer", None).await.unwrap();
    let _ = session.get::<String>("inner", None).await.unwrap();
    let outcome = session.set("inner", "x", ["locked"], TTL, None).await.unwrap();
    assert!(!outcome.is_stored());

    // inner popped, its tags handed to outer
    assert_eq!(session.fragments().current(), Some("outer"));
    assert!(session.fragments().current_tags(None).contains("locked"));

    other.flush_transactions().await.unwrap();
}

#[tokio::test]
async fn test_aborted_middle_fragment_still_passes_tags_outward() {
    let harness = Harness::new(IsolationLevel::ReadCommitted);
    let mut session = harness.session();

    let _ = session.get::<i32>("R", None).await.unwrap();
    let _ = session.get::<i32>("A", None).await.unwrap();
    let _ = session.get::<i32>("B", None).await.unwrap();
    session.abort("A");

    session.set("B", &1, ["t2"], TTL, None).await.unwrap();
    assert_eq!(session.fragments().current(), Some("R"));
    session.set("R", &2, NO_TAGS, TTL, None).await.unwrap();

    session.invalidate_tags(["t2"], None).await.unwrap();
    assert_eq!(session.get_final::<i32>("R", None).await.unwrap(), None);
}

#[tokio::test]
async fn test_failed_read_does_not_leave_fragment_open() {
    let backend = std::sync::Arc::new(CountingBackend::in_memory());
    let harness = Harness::with_backend(
        backend.clone(),
        fixtures::config(IsolationLevel::ReadCommitted),
    );
    let mut session = harness.session();

    let _ = session.get::<i32>("outer", None).await.unwrap();
    backend.set_failing(true);
    assert!(session.get::<i32>("inner", None).await.is_err());
    backend.set_failing(false);

    assert!(!session.fragments().contains("inner"));
    assert_eq!(session.fragments().current(), Some("outer"));

    // Later reads nest under the entry still being produced
    let _ = session.get::<i32>("sibling", None).await.unwrap();
    session.set("sibling", &1, ["s"], TTL, None).await.unwrap();
    assert!(session.fragments().current_tags(None).contains("s"));
}
