//! Integration tests for the `spendguard-db` data layer.
//!
//! Every test runs against a private in-memory database, except the
//! durability test which uses a temporary file.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use spendguard_cache::{CacheConfig, CacheManager, CacheStore, CacheWrite, LexicalEmbedder};
use spendguard_db::{
    CacheTier, CheckpointStore, Database, DbError, SqliteCacheStore, WorkflowFilter,
};
use spendguard_types::{CacheEntry, CacheEntryId, Clock, MatchType, WorkflowId};
use spendguard_workflow::{StepStatus, StepUsage, WorkflowCheckpoint, WorkflowStatus};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().unwrap()
}

async fn setup() -> Database {
    Database::in_memory()
        .await
        .expect("Failed to open in-memory database")
}

// =============================================================================
// Checkpoints
// =============================================================================

#[tokio::test]
async fn save_and_get_round_trip() {
    let db = setup().await;
    let store = CheckpointStore::new(db.pool());

    let mut wf = WorkflowCheckpoint::new(
        "alice",
        "summarize",
        ["fetch", "summarize"],
        Some(json!({"source": "inbox"})),
        t0(),
    );
    wf.start_step(t0()).unwrap();
    wf.complete_step(
        Some(json!({"docs": 3})),
        StepUsage {
            model: Some("claude-sonnet-4".to_owned()),
            input_tokens: 1_200,
            output_tokens: 300,
            cost: dec!(0.0081),
        },
        t0() + Duration::seconds(4),
    )
    .unwrap();
    store.save(&wf).await.unwrap();

    let loaded = store.get(wf.id).await.unwrap().expect("checkpoint present");
    assert_eq!(loaded, wf);
    assert_eq!(loaded.total_cost, dec!(0.0081));
    assert_eq!(loaded.steps[0].status, StepStatus::Completed);
}

#[tokio::test]
async fn get_missing_is_none() {
    let db = setup().await;
    let store = CheckpointStore::new(db.pool());
    assert!(store.get(WorkflowId::new()).await.unwrap().is_none());
    assert!(!store.delete(WorkflowId::new()).await.unwrap());
}

#[tokio::test]
async fn save_is_an_upsert() {
    let db = setup().await;
    let store = CheckpointStore::new(db.pool());

    let mut wf = WorkflowCheckpoint::new("alice", "draft", ["a"], None, t0());
    store.save(&wf).await.unwrap();
    wf.start_step(t0() + Duration::seconds(1)).unwrap();
    store.save(&wf).await.unwrap();

    assert_eq!(store.count().await.unwrap(), 1);
    let loaded = store.get(wf.id).await.unwrap().unwrap();
    assert_eq!(loaded.steps[0].status, StepStatus::Running);
    assert_eq!(loaded.updated_at, t0() + Duration::seconds(1));
}

#[tokio::test]
async fn resumable_listing_excludes_terminal_workflows() {
    let db = setup().await;
    let store = CheckpointStore::new(db.pool());

    let running = WorkflowCheckpoint::new("alice", "running", ["a"], None, t0());
    let mut paused = WorkflowCheckpoint::new("alice", "paused", ["a"], None, t0());
    paused.pause(t0() + Duration::seconds(5)).unwrap();
    let mut done = WorkflowCheckpoint::new("alice", "done", ["a"], None, t0());
    done.start_step(t0()).unwrap();
    done.complete_step(None, StepUsage::default(), t0()).unwrap();
    let other = WorkflowCheckpoint::new("bob", "other", ["a"], None, t0());
    for wf in [&running, &paused, &done, &other] {
        store.save(wf).await.unwrap();
    }

    let names = |list: Vec<WorkflowCheckpoint>| list.into_iter().map(|w| w.name).collect::<Vec<_>>();

    let strict = store.list_resumable(Some("alice"), false, None).await.unwrap();
    assert_eq!(names(strict), ["running"]);

    let with_paused = store.list_resumable(Some("alice"), true, None).await.unwrap();
    // Newest-updated first.
    assert_eq!(names(with_paused), ["paused", "running"]);

    let everyone = store.list_resumable(None, false, None).await.unwrap();
    assert_eq!(everyone.len(), 2);
}

#[tokio::test]
async fn list_honours_status_and_limit() {
    let db = setup().await;
    let store = CheckpointStore::new(db.pool());
    for i in 0..5 {
        let wf = WorkflowCheckpoint::new("alice", format!("wf-{i}"), ["a"], None, t0() + Duration::seconds(i));
        store.save(&wf).await.unwrap();
    }

    let filter = WorkflowFilter::owner("alice")
        .with_statuses(&[WorkflowStatus::Running])
        .with_limit(2);
    let page = store.list(&filter).await.unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].name, "wf-4");

    let none = store
        .list(&WorkflowFilter::owner("alice").with_statuses(&[WorkflowStatus::Failed]))
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn delete_old_prunes_by_updated_at() {
    let db = setup().await;
    let store = CheckpointStore::new(db.pool());

    let stale = WorkflowCheckpoint::new("alice", "stale", ["a"], None, t0());
    let fresh = WorkflowCheckpoint::new("alice", "fresh", ["a"], None, t0() + Duration::days(10));
    store.save(&stale).await.unwrap();
    store.save(&fresh).await.unwrap();

    let removed = store.delete_old(t0() + Duration::days(7)).await.unwrap();
    assert_eq!(removed, 1);
    assert!(store.get(stale.id).await.unwrap().is_none());
    assert!(store.get(fresh.id).await.unwrap().is_some());
}

#[tokio::test]
async fn corrupt_rows_surface_as_typed_errors() {
    let db = setup().await;
    let store = CheckpointStore::new(db.pool());
    let wf = WorkflowCheckpoint::new("alice", "broken", ["a"], None, t0());
    store.save(&wf).await.unwrap();

    sqlx::query("UPDATE workflows SET steps = 'not json' WHERE id = $1")
        .bind(wf.id.to_string())
        .execute(db.pool())
        .await
        .unwrap();

    let err = store.get(wf.id).await.unwrap_err();
    assert!(matches!(err, DbError::Corrupt { ref reason, .. } if reason.starts_with("steps")));
}

#[tokio::test]
async fn corrupt_row_does_not_block_listing() {
    let db = setup().await;
    let store = CheckpointStore::new(db.pool());
    let broken = WorkflowCheckpoint::new("alice", "broken", ["a"], None, t0());
    let healthy = WorkflowCheckpoint::new("alice", "healthy", ["a"], None, t0());
    store.save(&broken).await.unwrap();
    store.save(&healthy).await.unwrap();

    sqlx::query("UPDATE workflows SET steps = 'not json' WHERE id = $1")
        .bind(broken.id.to_string())
        .execute(db.pool())
        .await
        .unwrap();

    let listed = store.list(&WorkflowFilter::owner("alice")).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, healthy.id);

    let resumable = store.list_resumable(Some("alice"), false, None).await.unwrap();
    assert_eq!(resumable.len(), 1);
    assert_eq!(resumable[0].id, healthy.id);
}

#[tokio::test]
async fn checkpoints_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("spendguard.db").display());

    let wf = WorkflowCheckpoint::new("alice", "durable", ["a", "b"], None, t0());
    {
        let db = Database::connect_url(&url).await.unwrap();
        db.run_migrations().await.unwrap();
        CheckpointStore::new(db.pool()).save(&wf).await.unwrap();
        db.close().await;
    }

    let db = Database::connect_url(&url).await.unwrap();
    db.run_migrations().await.unwrap();
    let loaded = CheckpointStore::new(db.pool()).get(wf.id).await.unwrap();
    assert_eq!(loaded, Some(wf));
}

// =============================================================================
// Durable cache store
// =============================================================================

fn entry(key: &str, created_at: DateTime<Utc>, ttl: Duration) -> CacheEntry {
    CacheEntry {
        id: CacheEntryId::new(),
        key: key.to_owned(),
        scope: "scope".to_owned(),
        embedding: Some(vec![0.6, 0.8]),
        response: "cached answer".to_owned(),
        model: "gpt-4o".to_owned(),
        input_tokens: 100,
        output_tokens: 50,
        cost: dec!(0.00075),
        created_at,
        expires_at: created_at + ttl,
        hit_count: 0,
        metadata: Some(json!({"k": "v"})),
    }
}

#[tokio::test]
async fn cache_store_hides_expired_and_counts_hits() {
    let db = setup().await;
    let store = SqliteCacheStore::new(db.pool().clone(), CacheTier::Exact, 100, 1 << 20);

    store.put(entry("k1", t0(), Duration::seconds(60))).await.unwrap();
    store.record_hit("k1").await.unwrap();

    let live = store.get("k1", t0() + Duration::seconds(59)).await.unwrap().unwrap();
    assert_eq!(live.hit_count, 1);
    assert_eq!(live.embedding, Some(vec![0.6, 0.8]));
    assert_eq!(live.cost, dec!(0.00075));
    assert!(store.get("k1", t0() + Duration::seconds(60)).await.unwrap().is_none());

    assert_eq!(store.purge_expired(t0() + Duration::seconds(60)).await.unwrap(), 1);
    assert_eq!(store.len().await.unwrap(), 0);
}

#[tokio::test]
async fn tiers_are_isolated() {
    let db = setup().await;
    let exact = SqliteCacheStore::new(db.pool().clone(), CacheTier::Exact, 100, 1 << 20);
    let semantic = SqliteCacheStore::new(db.pool().clone(), CacheTier::Semantic, 100, 1 << 20);

    exact.put(entry("k", t0(), Duration::hours(1))).await.unwrap();
    assert!(semantic.get("k", t0()).await.unwrap().is_none());
    assert_eq!(semantic.clear().await.unwrap(), 0);
    assert_eq!(exact.len().await.unwrap(), 1);
}

#[tokio::test]
async fn cache_store_evicts_oldest_over_capacity() {
    let db = setup().await;
    let store = SqliteCacheStore::new(db.pool().clone(), CacheTier::Exact, 2, 1 << 20);

    for (i, key) in ["a", "b", "c"].into_iter().enumerate() {
        let created = t0() + Duration::seconds(i64::try_from(i).unwrap());
        store.put(entry(key, created, Duration::hours(1))).await.unwrap();
    }

    assert_eq!(store.len().await.unwrap(), 2);
    assert!(store.get("a", t0()).await.unwrap().is_none());
    assert!(store.get("c", t0()).await.unwrap().is_some());
}

#[tokio::test]
async fn manager_runs_over_sqlite_stores() {
    let db = setup().await;
    let config = CacheConfig::default();
    let exact = SqliteCacheStore::new(db.pool().clone(), CacheTier::Exact, 100, 1 << 20);
    let semantic = SqliteCacheStore::new(db.pool().clone(), CacheTier::Semantic, 100, 1 << 20);
    let manager = CacheManager::new(
        config,
        exact,
        semantic,
        LexicalEmbedder::default(),
        Clock::manual(t0()),
    );

    let write = CacheWrite {
        input_tokens: 400,
        output_tokens: 120,
        cost: Decimal::new(3, 3),
        ..CacheWrite::new("gpt-4o")
    };
    manager
        .set("What is the capital of France?", "Paris", write)
        .await
        .unwrap();

    let hit = manager
        .get("What is the capital of France?", None, Some("gpt-4o"), true)
        .await
        .unwrap();
    assert_eq!(hit.match_type, MatchType::Exact);
    assert_eq!(hit.entry.response, "Paris");

    let stats = manager.stats().await.unwrap();
    assert_eq!(stats.exact_entries, 1);
    assert_eq!(stats.semantic_entries, 1);
}
