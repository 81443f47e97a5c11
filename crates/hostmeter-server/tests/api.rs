use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{DateTime, Utc};
use hostmeter_db::{create_pool, DbPool, DbRuntimeSettings};
use hostmeter_outbox::{Emitter, OutboxFlusher, StaticFeatureFlags};
use hostmeter_server::api::SYNCHRONOUS_REQUEST_HEADER;
use hostmeter_server::clock::FixedClock;
use hostmeter_server::config::Config;
use hostmeter_server::consumer::ConsumerStats;
use hostmeter_server::{app, build_processor, AppState};
use hostmeter_types::{CanonicalEvent, HbiEvent};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tower::ServiceExt; // for oneshot

struct Harness {
    _db: tempfile::NamedTempFile,
    pool: DbPool,
    flusher: OutboxFlusher,
    events: mpsc::Receiver<CanonicalEvent>,
    _shutdown: watch::Sender<bool>,
}

fn harness(capacity: usize) -> Harness {
    let db = tempfile::NamedTempFile::new().unwrap();
    let pool = create_pool(db.path().to_str().unwrap(), DbRuntimeSettings::default()).unwrap();
    hostmeter_db::run_migrations(&pool.get().unwrap()).unwrap();

    let (tx, events) = mpsc::channel(capacity);
    let (shutdown, shutdown_rx) = watch::channel(false);
    let emitter = Emitter::new(
        tx,
        Arc::new(StaticFeatureFlags::new(true)),
        Duration::from_secs(60),
        shutdown_rx,
    );
    let flusher = OutboxFlusher::new(pool.clone(), emitter, 100);

    Harness {
        _db: db,
        pool,
        flusher,
        events,
        _shutdown: shutdown,
    }
}

fn router(h: &Harness, synchronous_operations_enabled: bool) -> Router {
    app(AppState {
        pool: h.pool.clone(),
        flusher: h.flusher.clone(),
        stats: Arc::new(ConsumerStats::default()),
        synchronous_operations_enabled,
    })
}

fn seed_hosts(pool: &DbPool, count: usize) {
    let now: DateTime<Utc> = "2024-06-01T12:30:00Z".parse().unwrap();
    let processor = build_processor(&Config::default(), Arc::new(FixedClock(now)));
    let mut conn = pool.get().unwrap();
    for i in 0..count {
        let event = HbiEvent::from_value(json!({
            "type": "created",
            "host": {
                "id": format!("inv-{i}"),
                "org_id": "org123",
                "subscription_manager_id": format!("sub-{i}"),
                "stale_timestamp": "2024-06-02T12:00:00Z",
                "system_profile": {"number_of_sockets": 2, "cores_per_socket": 2},
            },
        }))
        .unwrap();
        processor.process(&mut conn, &event).unwrap();
    }
}

fn flush_request(synchronous: bool) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/internal/rpc/outbox/flush");
    if synchronous {
        builder = builder.header(SYNCHRONOUS_REQUEST_HEADER, "true");
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn health_reports_pending_outbox() {
    let h = harness(8);
    seed_hosts(&h.pool, 2);

    let response = router(&h, false)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["pending_outbox"], 2);
    assert_eq!(json["flush_running"], false);
    assert_eq!(json["processing"]["received"], 0);
    assert_eq!(json["emitter"]["emitted"], 0);
}

#[tokio::test]
async fn synchronous_flush_returns_counts() {
    let mut h = harness(8);
    seed_hosts(&h.pool, 3);

    let response = router(&h, true).oneshot(flush_request(true)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "SUCCESS");
    assert_eq!(json["flushed"], 3);
    assert_eq!(json["skipped"], 0);

    for _ in 0..3 {
        assert_eq!(h.events.recv().await.unwrap().org_id, "org123");
    }
    let conn = h.pool.get().unwrap();
    assert_eq!(hostmeter_outbox::count_pending(&conn).unwrap(), 0);
}

#[tokio::test]
async fn synchronous_flush_rejected_when_disabled() {
    let h = harness(8);

    let response = router(&h, false).oneshot(flush_request(true)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("synchronous"));
}

#[tokio::test]
async fn asynchronous_flush_is_started() {
    let mut h = harness(8);
    seed_hosts(&h.pool, 1);

    let response = router(&h, false).oneshot(flush_request(false)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "STARTED");
    assert!(json.get("flushed").is_none());

    let event = tokio::time::timeout(Duration::from_secs(5), h.events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.instance_id, "inv-0");
}

#[tokio::test]
async fn flush_in_progress_is_reported() {
    // Capacity 1 with nobody reading: the second record blocks the flush.
    let h = harness(1);
    seed_hosts(&h.pool, 2);
    assert_eq!(h.flusher.trigger(), hostmeter_outbox::FlushStatus::Started);
    assert!(h.flusher.is_running());

    let sync = router(&h, true).oneshot(flush_request(true)).await.unwrap();
    assert_eq!(sync.status(), StatusCode::OK);
    assert_eq!(body_json(sync).await["status"], "ALREADY_RUNNING");

    let background = router(&h, true).oneshot(flush_request(false)).await.unwrap();
    assert_eq!(body_json(background).await["status"], "ALREADY_RUNNING");
}
