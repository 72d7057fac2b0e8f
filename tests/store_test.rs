//! Store integration tests.
//!
//! Tests marked `#[ignore]` need a running Postgres. They read the usual
//! `WRKR_DB_*` variables (a `.env` file works) and otherwise fall back to
//! a local server on port 5432 with database `wrkr_tests`:
//! ```sh
//! cargo test --test store_test -- --ignored
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::{Connection, PgConnection};
use wrkr_store::config::StoreConfig;
use wrkr_store::db::Store;
use wrkr_store::error::Error;
use wrkr_store::model::criteria::{Criteria, Field, Op, Value};
use wrkr_store::model::{ItemId, NewQueueItem};

fn test_config() -> StoreConfig {
    dotenvy::dotenv().ok();
    StoreConfig::from_env().unwrap_or_else(|_| StoreConfig::new("wrkr_tests").port(5432))
}

/// Helper: connect + bootstrap for tests.
async fn test_store() -> Store {
    let mut store = Store::new(test_config()).unwrap();
    store.connect().await.unwrap();
    store
}

/// Queue and event names unique to one test run, so tests can share a database.
fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4())
}

// ---------------------------------------------------------------------------
// Connection lifecycle (no database needed)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disconnect_without_connect_is_a_noop() {
    let mut store = Store::new(StoreConfig::new("wrkr_tests")).unwrap();
    store.disconnect().await.unwrap();
    store.disconnect().await.unwrap();
    assert!(!store.is_connected());
}

#[tokio::test]
async fn operations_before_connect_fail_with_not_connected() {
    let store = Store::new(StoreConfig::new("wrkr_tests")).unwrap();

    assert!(matches!(store.fetch_next("q").await, Err(Error::NotConnected)));
    assert!(matches!(
        store.subscribe("event", "q").await,
        Err(Error::NotConnected)
    ));
    assert!(matches!(
        store.find(&Criteria::all()).await,
        Err(Error::NotConnected)
    ));
    assert!(matches!(
        store.publish(NewQueueItem::new("x", "q")).await,
        Err(Error::NotConnected)
    ));
}

#[tokio::test]
async fn publishing_nothing_needs_no_connection() {
    let store = Store::new(StoreConfig::new("wrkr_tests")).unwrap();
    let ids = store.publish(Vec::<NewQueueItem>::new()).await.unwrap();
    assert!(ids.is_empty());
}

#[tokio::test]
async fn invalid_criteria_are_rejected_before_io() {
    let store = Store::new(StoreConfig::new("wrkr_tests")).unwrap();
    let criteria = Criteria::all().filter(Field::Done, Op::Eq, Value::Int(1));
    assert!(matches!(
        store.find(&criteria).await,
        Err(Error::InvalidCriteria(_))
    ));
    assert!(matches!(
        store.remove(&criteria).await,
        Err(Error::InvalidCriteria(_))
    ));
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

#[tokio::test]
#[ignore] // Requires running Postgres
async fn connects_and_bootstraps_idempotently() {
    let mut store = test_store().await;
    assert!(store.health_check().await.is_ok());

    // Second bootstrap only performs existence checks.
    store.ensure_ready().await.unwrap();
    store.ensure_ready().await.unwrap();

    store.disconnect().await.unwrap();
    assert!(matches!(store.health_check().await, Err(Error::NotConnected)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore] // Requires running Postgres
async fn concurrent_connects_bootstrap_a_fresh_database() {
    const STORES: usize = 8;

    let mut config = test_config();
    config.db_name = format!("wrkr_boot_{}", uuid::Uuid::new_v4().simple());

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..STORES {
        let config = config.clone();
        tasks.spawn(async move {
            let mut store = Store::new(config)?;
            store.connect().await?;
            Ok::<_, Error>(store)
        });
    }

    let mut stores = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        stores.push(joined.unwrap().unwrap());
    }
    assert_eq!(stores.len(), STORES);

    for store in &mut stores {
        store.health_check().await.unwrap();
        store.disconnect().await.unwrap();
    }

    let mut admin = PgConnection::connect_with(&config.connect_options(&config.admin_db))
        .await
        .unwrap();
    sqlx::query(&format!("DROP DATABASE \"{}\"", config.db_name))
        .execute(&mut admin)
        .await
        .unwrap();
    admin.close().await.unwrap();
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

#[tokio::test]
#[ignore] // Requires running Postgres
async fn subscribe_is_idempotent() {
    let store = test_store().await;
    let event = unique("event");

    store.subscribe(&event, "q1").await.unwrap();
    store.subscribe(&event, "q1").await.unwrap();
    store.subscribe(&event, "q2").await.unwrap();

    let mut queues = store.subscriptions(&event).await.unwrap();
    queues.sort();
    assert_eq!(queues, vec!["q1", "q2"]);
}

#[tokio::test]
#[ignore] // Requires running Postgres
async fn unsubscribe_non_member_is_a_noop() {
    let store = test_store().await;
    let event = unique("event");

    // No record at all.
    store.unsubscribe(&event, "q1").await.unwrap();
    assert!(store.subscriptions(&event).await.unwrap().is_empty());

    store.subscribe(&event, "q1").await.unwrap();
    store.unsubscribe(&event, "other").await.unwrap();
    assert_eq!(store.subscriptions(&event).await.unwrap(), vec!["q1"]);

    // Empty set reads the same as no record.
    store.unsubscribe(&event, "q1").await.unwrap();
    let sub = store.subscription(&event).await.unwrap();
    assert!(sub.is_empty());
}

#[tokio::test]
#[ignore] // Requires running Postgres
async fn unknown_event_has_no_subscriptions() {
    let store = test_store().await;
    let queues = store.subscriptions(&unique("nobody")).await.unwrap();
    assert!(queues.is_empty());
}

// ---------------------------------------------------------------------------
// Publish / find / remove
// ---------------------------------------------------------------------------

#[tokio::test]
#[ignore] // Requires running Postgres
async fn publish_then_find_by_id_round_trips() {
    let store = test_store().await;
    let queue = unique("q");

    let ids = store
        .publish(NewQueueItem::new("x", &queue).payload(json!({"a": 1})))
        .await
        .unwrap();
    assert_eq!(ids.len(), 1);

    let found = store.find(&Criteria::by_id(ids[0])).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, ids[0]);
    assert_eq!(found[0].name, "x");
    assert_eq!(found[0].payload, json!({"a": 1}));
    assert!(found[0].done.is_none());
}

#[tokio::test]
#[ignore] // Requires running Postgres
async fn batch_publish_returns_ids_in_order() {
    let store = test_store().await;
    let queue = unique("q");
    let parent = ItemId::new();

    let ids = store
        .publish(vec![
            NewQueueItem::new("first", &queue).tid("t-1"),
            NewQueueItem::new("second", &queue).parent(parent),
            NewQueueItem::new("third", &queue).retry_count(2),
        ])
        .await
        .unwrap();
    assert_eq!(ids.len(), 3);
    assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 3);

    for (id, name) in ids.iter().zip(["first", "second", "third"]) {
        let found = store.find(&Criteria::by_id(*id)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, name);
    }

    let by_parent = store.find(&Criteria::all().parent(parent)).await.unwrap();
    assert_eq!(by_parent.len(), 1);
    assert_eq!(by_parent[0].id, ids[1]);

    let by_tid = store.find(&Criteria::all().tid("t-1").queue(&queue)).await.unwrap();
    assert_eq!(by_tid.len(), 1);
    assert_eq!(by_tid[0].retry_count, 0);
}

#[tokio::test]
#[ignore] // Requires running Postgres
async fn find_with_no_match_is_empty() {
    let store = test_store().await;
    let found = store.find(&Criteria::all().queue(unique("empty"))).await.unwrap();
    assert!(found.is_empty());

    let found = store.find(&Criteria::by_id(ItemId::new())).await.unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
#[ignore] // Requires running Postgres
async fn empty_id_list_matches_nothing() {
    let store = test_store().await;
    let queue = unique("q");

    store
        .publish(vec![NewQueueItem::new("x", &queue), NewQueueItem::new("y", &queue)])
        .await
        .unwrap();

    let found = store.find(&Criteria::by_ids(Vec::new())).await.unwrap();
    assert!(found.is_empty());

    let removed = store.remove(&Criteria::by_ids(Vec::new())).await.unwrap();
    assert_eq!(removed, 0);

    let left = store.find(&Criteria::all().queue(&queue)).await.unwrap();
    assert_eq!(left.len(), 2);
}

#[tokio::test]
#[ignore] // Requires running Postgres
async fn find_matches_nested_payload() {
    let store = test_store().await;
    let queue = unique("q");

    store
        .publish(vec![
            NewQueueItem::new("x", &queue).payload(json!({"user": {"id": 7}, "kind": "a"})),
            NewQueueItem::new("x", &queue).payload(json!({"user": {"id": 8}, "kind": "a"})),
        ])
        .await
        .unwrap();

    let found = store
        .find(
            &Criteria::all()
                .queue(&queue)
                .payload_contains(json!({"user": {"id": 7}})),
        )
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].payload["user"]["id"], 7);
}

#[tokio::test]
#[ignore] // Requires running Postgres
async fn remove_by_queue_leaves_other_queues() {
    let store = test_store().await;
    let q = unique("q");
    let r = unique("r");

    store
        .publish(vec![
            NewQueueItem::new("x", &q),
            NewQueueItem::new("x", &q),
            NewQueueItem::new("x", &q),
            NewQueueItem::new("x", &r),
        ])
        .await
        .unwrap();

    let removed = store.remove(&Criteria::all().queue(&q)).await.unwrap();
    assert_eq!(removed, 3);

    assert!(store.find(&Criteria::all().queue(&q)).await.unwrap().is_empty());
    assert_eq!(store.find(&Criteria::all().queue(&r)).await.unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Claim
// ---------------------------------------------------------------------------

#[tokio::test]
#[ignore] // Requires running Postgres
async fn claims_in_when_order_with_nulls_first() {
    let store = test_store().await;
    let queue = unique("q");
    let now = Utc::now();

    let ids = store
        .publish(vec![
            NewQueueItem::new("minus-1", &queue).when(now - Duration::minutes(1)),
            NewQueueItem::new("future", &queue).when(now + Duration::minutes(10)),
            NewQueueItem::new("minus-3", &queue).when(now - Duration::minutes(3)),
            NewQueueItem::new("immediate", &queue),
            NewQueueItem::new("minus-2", &queue).when(now - Duration::minutes(2)),
        ])
        .await
        .unwrap();
    assert_eq!(ids.len(), 5);

    let mut order = Vec::new();
    while let Some(item) = store.fetch_next_at(&queue, now).await.unwrap() {
        assert!(item.done.is_some());
        assert!(item.when.is_none());
        order.push(item.name);
    }
    assert_eq!(order, vec!["immediate", "minus-3", "minus-2", "minus-1"]);

    // The future item is still pending.
    let pending = store.find(&Criteria::all().queue(&queue).pending()).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].name, "future");
}

#[tokio::test]
#[ignore] // Requires running Postgres
async fn deferred_item_becomes_eligible_after_when() {
    let store = test_store().await;
    let queue = unique("q");
    let now = Utc::now();
    let when = now + Duration::minutes(10);

    let ids = store
        .publish(NewQueueItem::new("later", &queue).when(when))
        .await
        .unwrap();

    assert!(store.fetch_next(&queue).await.unwrap().is_none());

    let later = when + Duration::seconds(1);
    let item = store
        .fetch_next_at(&queue, later)
        .await
        .unwrap()
        .expect("item should be eligible after its when");
    assert_eq!(item.id, ids[0]);
    assert!(item.when.is_none());
    let done = item.done.expect("claimed item has done set");
    assert!((done - later).num_milliseconds().abs() < 1);

    // Claimed once, never again.
    assert!(store.fetch_next_at(&queue, later).await.unwrap().is_none());
}

#[tokio::test]
#[ignore] // Requires running Postgres
async fn claim_does_not_cross_queues() {
    let store = test_store().await;
    let q = unique("q");
    let r = unique("r");

    store.publish(NewQueueItem::new("x", &r)).await.unwrap();
    assert!(store.fetch_next(&q).await.unwrap().is_none());
    assert!(store.fetch_next(&r).await.unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore] // Requires running Postgres
async fn concurrent_claims_take_each_item_once() {
    const ITEMS: usize = 3;
    const WORKERS: usize = 10;

    let store = Arc::new(test_store().await);
    let queue = unique("q");

    let published: Vec<NewQueueItem> = (0..ITEMS)
        .map(|i| NewQueueItem::new("x", &queue).payload(json!({"n": i})))
        .collect();
    let ids = store.publish(published).await.unwrap();

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..WORKERS {
        let store = Arc::clone(&store);
        let queue = queue.clone();
        tasks.spawn(async move { store.fetch_next(&queue).await });
    }

    let mut claimed = Vec::new();
    let mut empty = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined.unwrap().unwrap() {
            Some(item) => claimed.push(item.id),
            None => empty += 1,
        }
    }

    assert_eq!(claimed.len(), ITEMS);
    assert_eq!(empty, WORKERS - ITEMS);

    let distinct: HashSet<ItemId> = claimed.into_iter().collect();
    assert_eq!(distinct, ids.into_iter().collect::<HashSet<_>>());

    let pending = store.find(&Criteria::all().queue(&queue).pending()).await.unwrap();
    assert!(pending.is_empty());
}
