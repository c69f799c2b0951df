//! Integration tests for EventStore.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

use bikesignal_events::{AppendEvent, EventPersister, EventStore};
use serde_json::json;
use sqlx::PgPool;

/// Get a migrated, empty store, or skip if no test DB is available.
async fn test_store() -> Option<EventStore> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;

    let store = EventStore::new(pool.clone());
    store.migrate().await.ok()?;

    // Clean slate for each test
    sqlx::query("TRUNCATE report_events RESTART IDENTITY")
        .execute(&pool)
        .await
        .ok()?;

    Some(store)
}

#[tokio::test]
async fn append_and_read_returns_assigned_seq_and_ts() {
    let Some(store) = test_store().await else {
        return;
    };

    let stored = store
        .append_and_read(AppendEvent::new("created", 11, json!({"bike_group_id": 3})).with_actor("system"))
        .await
        .unwrap();

    assert!(stored.seq > 0);
    assert_eq!(stored.report_id, 11);
    assert_eq!(stored.actor.as_deref(), Some("system"));
    assert_eq!(stored.payload["bike_group_id"], 3);
}

#[tokio::test]
async fn migrate_is_idempotent() {
    let Some(store) = test_store().await else {
        return;
    };
    store.migrate().await.unwrap();
    store.migrate().await.unwrap();
}

#[tokio::test]
async fn events_for_report_are_ordered_and_scoped() {
    let Some(store) = test_store().await else {
        return;
    };

    for (event_type, report_id) in [("created", 1), ("created", 2), ("status_changed", 1)] {
        store
            .persist(AppendEvent::new(event_type, report_id, json!({})))
            .await
            .unwrap();
    }

    let events = store.events_for_report(1).await.unwrap();
    assert_eq!(events.len(), 2);
    assert!(events[0].seq < events[1].seq);
    assert_eq!(events[1].event_type, "status_changed");

    let created = store.read_by_type("created", 0, 10).await.unwrap();
    assert_eq!(created.len(), 2);
}
