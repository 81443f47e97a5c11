//! Hostmeter server binary.
//!
//! Reads HBI host events as JSON lines, runs them through the pipeline,
//! publishes canonical events as JSON lines and serves the internal HTTP
//! surface. Shuts down gracefully on SIGTERM/SIGINT.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hostmeter_outbox::{Emitter, OutboxFlusher, StaticFeatureFlags};
use hostmeter_server::background::{start_outbox_flush_task, start_outbox_purge_task};
use hostmeter_server::clock::SystemClock;
use hostmeter_server::config::{self, Config};
use hostmeter_server::consumer::{consume_lines, ConsumerStats, PartitionedConsumer};
use hostmeter_server::sink::run_event_sink;
use hostmeter_server::{app, build_processor, AppState};
use tokio::io::BufReader;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("HOSTMETER_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration, the server cannot start without valid config");

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let pool = hostmeter_db::create_pool(
        &config.database.path,
        hostmeter_db::DbRuntimeSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            pool_max_size: config.database.pool_max_size,
            ..Default::default()
        },
    )
    .expect("failed to create database pool, check database.path in config");

    {
        let conn = pool
            .get()
            .expect("failed to get database connection for migrations");
        let applied =
            hostmeter_db::run_migrations(&conn).expect("failed to run database migrations");
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Outbound bus
    let (event_tx, event_rx) = mpsc::channel(config.emitter.buffer_capacity.max(1));
    let sink = spawn_sink(&config, event_rx).await;

    let flags = Arc::new(StaticFeatureFlags::new(config.emitter.emit_events));
    let emitter = Emitter::new(
        event_tx,
        flags,
        Duration::from_millis(config.emitter.send_timeout_ms),
        shutdown_rx.clone(),
    );
    let flusher = OutboxFlusher::new(pool.clone(), emitter, config.outbox.flush_batch_size);

    // Inbound stream
    let stats = Arc::new(ConsumerStats::default());
    let consumer = PartitionedConsumer::start(
        config.pipeline.partitions,
        config.pipeline.partition_buffer,
        pool.clone(),
        build_processor(&config, Arc::new(SystemClock)),
        config.retry.policy(),
        Arc::clone(&stats),
    );
    let input = spawn_input(config.pipeline.input_path.clone(), consumer, shutdown_rx);

    let mut maintenance = Vec::new();
    if config.outbox.flush_interval_seconds > 0 {
        maintenance.push(tokio::spawn(start_outbox_flush_task(
            flusher.clone(),
            config.outbox.flush_interval_seconds,
        )));
    }
    if config.outbox.purge_interval_seconds > 0 {
        maintenance.push(tokio::spawn(start_outbox_purge_task(
            pool.clone(),
            config.outbox.purge_interval_seconds,
            config.outbox.sent_retention_seconds,
        )));
    }

    let state = AppState {
        pool,
        flusher,
        stats,
        synchronous_operations_enabled: config.server.synchronous_operations_enabled,
    };
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting hostmeter server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address, is another process using this port?");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // Stop reading, let queued events finish, then cancel waiting sends.
    let _ = shutdown_tx.send(true);
    if let Err(e) = input.await {
        tracing::error!(error = %e, "input task panicked or was cancelled");
    }
    for task in maintenance {
        task.abort();
    }

    match tokio::time::timeout(Duration::from_secs(5), sink).await {
        Ok(Ok(Ok(written))) => tracing::debug!(written, "event sink drained"),
        Ok(Ok(Err(e))) => tracing::error!(error = %e, "event sink failed"),
        Ok(Err(e)) => tracing::error!(error = %e, "event sink panicked or was cancelled"),
        Err(_) => tracing::warn!("event sink did not drain before shutdown"),
    }

    tracing::info!("hostmeter server shut down");
}

/// Starts the writer for canonical events: the configured file, or stdout.
async fn spawn_sink(
    config: &Config,
    event_rx: mpsc::Receiver<hostmeter_types::CanonicalEvent>,
) -> JoinHandle<std::io::Result<u64>> {
    match &config.emitter.output_path {
        Some(path) => {
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .expect("failed to open emitter.output_path");
            tracing::info!(path = %path, "publishing canonical events to file");
            tokio::spawn(run_event_sink(event_rx, file))
        }
        None => tokio::spawn(run_event_sink(event_rx, tokio::io::stdout())),
    }
}

/// Feeds the configured input file, or stdin, to the consumer, then drains
/// the consumer.
fn spawn_input(
    input_path: Option<String>,
    consumer: PartitionedConsumer,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let result = match input_path.as_deref() {
            Some(path) => match tokio::fs::File::open(path).await {
                Ok(file) => consume_lines(BufReader::new(file), &consumer, shutdown).await,
                Err(e) => Err(e),
            },
            None => consume_lines(BufReader::new(tokio::io::stdin()), &consumer, shutdown).await,
        };
        match result {
            Ok(count) => tracing::info!(count, "finished reading host events"),
            Err(e) => tracing::error!(error = %e, "failed to read host events"),
        }
        consumer.shutdown().await;
    })
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
