use std::sync::Arc;

use chrono::{DateTime, Utc};
use hostmeter_db::{create_pool, DbRuntimeSettings};
use hostmeter_outbox::find_by_org_id;
use hostmeter_server::clock::FixedClock;
use hostmeter_server::config::Config;
use hostmeter_server::consumer::{consume_lines, partition_for, ConsumerStats, PartitionedConsumer};
use hostmeter_server::retry::RetryPolicy;
use hostmeter_server::sink::run_event_sink;
use hostmeter_server::build_processor;
use hostmeter_types::{CanonicalEvent, EventType};
use serde_json::json;
use tokio::sync::{mpsc, watch};

fn line(kind: &str, inventory_id: &str, org_id: &str) -> String {
    json!({
        "type": kind,
        "host": {
            "id": inventory_id,
            "org_id": org_id,
            "subscription_manager_id": format!("sub-{inventory_id}"),
            "stale_timestamp": "2024-06-02T12:00:00Z",
            "system_profile": {"number_of_sockets": 2},
        },
    })
    .to_string()
}

#[test]
fn partitioning_is_stable_and_in_range() {
    for partitions in 1..8 {
        let p = partition_for("org123", partitions);
        assert!(p < partitions);
        assert_eq!(p, partition_for("org123", partitions));
    }
    assert_eq!(partition_for("anything", 0), 0);
}

#[tokio::test]
async fn lines_are_processed_and_counted() {
    let db = tempfile::NamedTempFile::new().unwrap();
    let pool = create_pool(db.path().to_str().unwrap(), DbRuntimeSettings::default()).unwrap();
    hostmeter_db::run_migrations(&pool.get().unwrap()).unwrap();

    let now: DateTime<Utc> = "2024-06-01T12:30:00Z".parse().unwrap();
    let stats = Arc::new(ConsumerStats::default());
    let consumer = PartitionedConsumer::start(
        3,
        4,
        pool.clone(),
        build_processor(&Config::default(), Arc::new(FixedClock(now))),
        RetryPolicy::default(),
        Arc::clone(&stats),
    );

    let input = [
        line("created", "inv-1", "org-a"),
        String::new(),
        "{not json".to_string(),
        line("updated", "inv-1", "org-a"),
        line("created", "inv-2", "org-b"),
        line("merged", "inv-3", "org-b"),
    ]
    .join("\n");

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let read = consume_lines(input.as_bytes(), &consumer, shutdown_rx)
        .await
        .unwrap();
    assert_eq!(read, 5, "blank lines are not counted");

    consumer.shutdown().await;

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.received, 5);
    assert_eq!(snapshot.malformed, 1);
    assert_eq!(snapshot.unsupported, 1);
    assert_eq!(snapshot.processed, 3);
    assert_eq!(snapshot.events_written, 3);
    assert_eq!(snapshot.failed, 0);

    let conn = pool.get().unwrap();
    let org_a: Vec<EventType> = find_by_org_id(&conn, "org-a")
        .unwrap()
        .into_iter()
        .map(|r| r.event.event_type)
        .collect();
    assert_eq!(org_a, vec![EventType::InstanceCreated, EventType::InstanceUpdated]);
    assert_eq!(find_by_org_id(&conn, "org-b").unwrap().len(), 1);
}

#[tokio::test]
async fn shutdown_stops_reading_input() {
    let db = tempfile::NamedTempFile::new().unwrap();
    let pool = create_pool(db.path().to_str().unwrap(), DbRuntimeSettings::default()).unwrap();
    hostmeter_db::run_migrations(&pool.get().unwrap()).unwrap();

    let consumer = PartitionedConsumer::start(
        1,
        1,
        pool,
        build_processor(&Config::default(), Arc::new(FixedClock(Utc::now()))),
        RetryPolicy::default(),
        Arc::new(ConsumerStats::default()),
    );

    // A reader that never yields a line.
    let (_writer, reader) = tokio::io::duplex(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    shutdown_tx.send(true).unwrap();

    let read = consume_lines(tokio::io::BufReader::new(reader), &consumer, shutdown_rx)
        .await
        .unwrap();
    assert_eq!(read, 0);
    consumer.shutdown().await;
}

#[tokio::test]
async fn sink_writes_one_json_line_per_event() {
    let (tx, rx) = mpsc::channel::<CanonicalEvent>(4);
    let event: CanonicalEvent = serde_json::from_value(json!({
        "event_id": "6f0c3f9e-1d1b-4d4e-9b8a-0c3c9d5d1a11",
        "org_id": "org123",
        "instance_id": "inv-1",
        "event_type": "INSTANCE_CREATED",
        "event_source": "HBI_HOST",
        "service_type": "RHEL System",
        "timestamp": "2024-06-01T12:00:00Z",
        "expiration": "2024-06-01T13:00:00Z",
        "product_ids": [],
        "product_tags": [],
        "is_virtual": false,
        "is_hypervisor": false,
        "is_unmapped_guest": false,
        "conversion": false,
        "measurements": [],
    }))
    .unwrap();
    tx.send(event.clone()).await.unwrap();
    tx.send(event).await.unwrap();
    drop(tx);

    let mut out = Vec::new();
    let written = run_event_sink(rx, &mut out).await.unwrap();
    assert_eq!(written, 2);

    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(parsed["instance_id"], "inv-1");
}
