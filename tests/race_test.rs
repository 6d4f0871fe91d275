// Concurrency behavior through the store server: simultaneous duplicate
// submissions resolve to exactly one debit, and interleaved writers never
// lose an update.

use chrono::{Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;

use interviewd::engine::types::Segment;
use interviewd::ledger::TxnType;
use interviewd::store::server::{spawn_store_server, StoreHandle};
use interviewd::store::Store;

async fn seeded_handle(balance: i64) -> StoreHandle {
    let store = Store::in_memory().unwrap();
    if balance > 0 {
        store
            .apply_credit("u-1", balance, TxnType::Grant, "seed-grant", "test seed")
            .unwrap();
    }
    store
        .insert_session("s-1", "u-1", &serde_json::json!({}))
        .unwrap();
    let (handle, _join) = spawn_store_server(store);
    handle
}

fn segment(duration: i64, resume_offset_ms: i64) -> Segment {
    let resumed_at = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap()
        + Duration::milliseconds(resume_offset_ms);
    Segment {
        session_id: "s-1".into(),
        owner_id: "u-1".into(),
        resumed_at,
        ended_at: resumed_at + Duration::seconds(duration),
        duration_seconds: duration,
        transcript_start_index: 0,
        transcript_end_index: None,
    }
}

#[tokio::test]
async fn test_concurrent_duplicates_charge_once() {
    let handle = seeded_handle(600).await;

    // The same segment submitted from two tasks at once, as happens when a
    // client retries while the original request is still in flight.
    let a = tokio::spawn({
        let handle = handle.clone();
        async move { handle.record_segment(segment(45, 0)).await.unwrap() }
    });
    let b = tokio::spawn({
        let handle = handle.clone();
        async move { handle.record_segment(segment(45, 0)).await.unwrap() }
    });

    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    // Exactly one of the two was the real debit.
    assert_ne!(a.already_processed, b.already_processed);
    assert_eq!(handle.balance("u-1".to_string()).await.unwrap(), 555);
    assert_eq!(
        handle.get_session("s-1".to_string()).await.unwrap().duration_seconds,
        45
    );
    assert_eq!(handle.transactions("u-1".to_string()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_interleaved_distinct_segments_all_land() {
    let handle = seeded_handle(10_000).await;

    let mut tasks = Vec::new();
    for i in 0..20 {
        let handle = handle.clone();
        tasks.push(tokio::spawn(async move {
            handle
                .record_segment(segment(10, i * 1_000))
                .await
                .unwrap()
        }));
    }
    for task in tasks {
        assert!(!task.await.unwrap().already_processed);
    }

    assert_eq!(handle.balance("u-1".to_string()).await.unwrap(), 10_000 - 200);
    assert_eq!(
        handle.get_session("s-1".to_string()).await.unwrap().duration_seconds,
        200
    );
}

#[tokio::test]
async fn test_concurrent_grant_replays_apply_once() {
    let handle = seeded_handle(0).await;

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let handle = handle.clone();
        tasks.push(tokio::spawn(async move {
            handle
                .apply_credit(
                    "u-1".into(),
                    600,
                    TxnType::Grant,
                    "promo-1".into(),
                    "signup promo".into(),
                )
                .await
                .unwrap()
        }));
    }

    let applied: usize = {
        let mut count = 0;
        for task in tasks {
            if task.await.unwrap() {
                count += 1;
            }
        }
        count
    };
    assert_eq!(applied, 1);
    assert_eq!(handle.balance("u-1".to_string()).await.unwrap(), 600);
}
