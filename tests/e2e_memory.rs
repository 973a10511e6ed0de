//! End-to-end pipeline tests against the in-process store and bus.

use chrono::{TimeZone, Utc};
use loyalty_bus::{EventPublisher, MemoryBus};
use loyalty_clips::{lifecycle, run_load_read, run_simulation, PacingController, Pipeline, Settings};
use loyalty_core::{ClipEvent, Keyspace, Record, RecordFamily, Value};
use loyalty_generator::{ClipGenerator, RowGenerator};
use loyalty_store::{MemorySession, MemoryStore, StoreSession};
use std::sync::Arc;
use std::time::Duration;

async fn prepared(store: &MemoryStore) -> Pipeline<MemorySession> {
    let session = lifecycle::connect_memory(store, &["127.0.0.1".to_string()])
        .await
        .unwrap();
    lifecycle::create_schema(session.as_ref(), &Keyspace::loyalty())
        .await
        .unwrap();
    Pipeline::prepare(session, "loyalty").await.unwrap()
}

fn small_settings() -> Settings {
    Settings {
        iterations: 3,
        batch_size: 10,
        interval: Duration::from_secs(1),
        settle: Duration::ZERO,
        seed: 42,
        ..Settings::default()
    }
}

#[tokio::test]
async fn test_seed_loads_every_record_unclipped() {
    let store = MemoryStore::new().with_write_latency(Duration::from_millis(1));
    let pipeline = prepared(&store).await;
    let rows = RowGenerator::for_family(RecordFamily::ByZip);

    assert_eq!(pipeline.seed(RecordFamily::ByZip, &rows), 1900);
    pipeline.dispatcher().drain().await;
    assert_eq!(store.row_count("loyalty", "coupons").await, Some(1900));

    let summary = pipeline.read_back(rows.partition_keys()).await;
    assert_eq!(summary.reads, 100);
    assert_eq!(summary.rows, 1900);
    assert_eq!(summary.clipped, 0);
    assert_eq!(summary.failed, 0);
}

#[tokio::test]
async fn test_clip_then_read_sees_clipped() {
    let store = MemoryStore::new().with_write_latency(Duration::from_millis(5));
    let pipeline = prepared(&store).await;
    pipeline.seed(RecordFamily::ByZip, &RowGenerator::for_family(RecordFamily::ByZip));
    pipeline.dispatcher().drain().await;

    let publisher = EventPublisher::new(Arc::new(MemoryBus::new()), "test");
    let event = ClipEvent::new("90050", "1005", Utc::now());
    let handle = pipeline.clip(&event, &publisher).unwrap();
    handle.resolve().await.unwrap();

    let result = pipeline
        .dispatcher()
        .submit_and_wait(&pipeline.templates().read_coupons, vec![Value::from("90050")])
        .await
        .unwrap();
    let clipped: Vec<Record> = result
        .rows
        .iter()
        .map(|row| Record::from_row(RecordFamily::ByZip, row).unwrap())
        .filter(|r| r.clipped)
        .collect();
    assert_eq!(clipped.len(), 1);
    assert_eq!(clipped[0].clustering_key, "1005");
    assert_eq!(clipped[0].payload, "");
    assert_eq!(result.rows.len(), 20);
}

#[tokio::test]
async fn test_clip_publishes_wire_payload() {
    let store = MemoryStore::new();
    let pipeline = prepared(&store).await;
    let bus = Arc::new(MemoryBus::new());
    let publisher = EventPublisher::new(bus.clone(), "test");

    let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    pipeline
        .clip(&ClipEvent::new("90001", "1050", at), &publisher)
        .unwrap()
        .resolve()
        .await
        .unwrap();
    publisher.flush().await;

    let delivered = bus.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].key, "1050");
    assert_eq!(bus.payloads("test"), vec!["1050,2024-01-01 00:00:00,1"]);
}

#[tokio::test]
async fn test_failing_store_does_not_stop_publishing() {
    let store = MemoryStore::new();
    let pipeline = prepared(&store).await;
    store.fail_writes_to("coupons", "node down");
    let bus = Arc::new(MemoryBus::new());
    let publisher = EventPublisher::new(bus.clone(), "test");
    let mut pacing = PacingController::new(100, Duration::ZERO).unwrap();

    let accepted = pipeline
        .run_clips(&mut ClipGenerator::new(1), &publisher, 20, &mut pacing)
        .await
        .unwrap();
    pipeline.dispatcher().drain().await;
    publisher.flush().await;

    assert_eq!(accepted, 20);
    assert_eq!(pipeline.dispatcher().snapshot().failed, 20);
    assert_eq!(publisher.snapshot().published, 20);
    assert_eq!(bus.payloads("test").len(), 20);
    assert_eq!(store.row_count("loyalty", "coupons").await, Some(0));
}

#[tokio::test]
async fn test_failing_bus_does_not_stop_writes() {
    let store = MemoryStore::new();
    let pipeline = prepared(&store).await;
    let bus = Arc::new(MemoryBus::new());
    bus.fail_with("broker unreachable");
    let publisher = EventPublisher::new(bus.clone(), "test");
    let mut pacing = PacingController::new(100, Duration::ZERO).unwrap();

    pipeline
        .run_clips(&mut ClipGenerator::new(2), &publisher, 20, &mut pacing)
        .await
        .unwrap();
    pipeline.dispatcher().drain().await;
    publisher.flush().await;

    assert_eq!(pipeline.dispatcher().snapshot().succeeded, 20);
    assert_eq!(publisher.snapshot().failed, 20);
    let rows = store.row_count("loyalty", "coupons").await.unwrap();
    assert!(rows > 0 && rows <= 20);
}

#[tokio::test(start_paused = true)]
async fn test_simulation_run() {
    let store = MemoryStore::new();
    let session = lifecycle::connect_memory(&store, &["127.0.0.1".to_string()])
        .await
        .unwrap();
    let bus = Arc::new(MemoryBus::new());

    let metrics = run_simulation(session.clone(), bus.clone(), &small_settings())
        .await
        .unwrap();

    assert_eq!(metrics.seed_rows, 3800);
    assert_eq!(metrics.clip_writes, 30);
    assert_eq!(metrics.writes_succeeded, 3830);
    assert_eq!(metrics.writes_failed, 0);
    assert_eq!(metrics.messages_published, 30);
    assert_eq!(metrics.pace_sleeps, 3);
    assert_eq!(bus.payloads("test").len(), 30);
    assert_eq!(store.row_count("loyalty", "personalized_deals").await, Some(1900));
    assert!(store.row_count("loyalty", "coupons").await.unwrap() >= 1900);
    assert_eq!(store.row_count("loyalty", "coupon_counters").await, Some(0));
    assert!(session.as_ref().is_closed());
}

#[tokio::test]
async fn test_load_read_run() {
    let store = MemoryStore::new();
    let session = lifecycle::connect_memory(&store, &["127.0.0.1".to_string()])
        .await
        .unwrap();

    let metrics = run_load_read(session, &small_settings()).await.unwrap();

    assert_eq!(metrics.seed_rows, 1900);
    assert_eq!(metrics.reads_completed, 100);
    assert_eq!(metrics.rows_read, 1900);
    assert_eq!(metrics.writes_failed, 0);
}
