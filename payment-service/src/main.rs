use anyhow::Context;
use common_observability::{init_tracing, PipelineMetrics, WorkerHealth, WorkerState};
use payment_service::{
    app_router,
    config::ServiceConfig,
    consumer::{run_log_tap, CreationRequestConsumer},
    oracle::WeightedRandomOracle,
    publisher::StatusPublisher,
    queue::QueueManager,
    repo::PaymentRepository,
    store::{InMemoryStore, RedisStore, Store},
    worker::{Supervisor, Worker},
    AppState, PaymentService,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, info_span, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = ServiceConfig::from_env().context("invalid payment-service configuration")?;

    let store: Arc<dyn Store> = if config.in_memory_store {
        warn!("KVSTORE_IN_MEMORY set; payments will not survive a restart");
        Arc::new(InMemoryStore::new())
    } else {
        Arc::new(
            RedisStore::new(&config.kvstore_url)
                .await
                .with_context(|| format!("connecting to key-value store at {}", config.kvstore_url))?,
        )
    };

    let metrics = PipelineMetrics::new();
    common_http_errors::register_error_metrics(&metrics.registry);
    let health = WorkerHealth::new();

    let names = config.queue_names();
    let queue = QueueManager::new(store.clone(), names.clone(), config.dequeue_timeout);
    let publisher = StatusPublisher::new(store.clone(), config.status_channel.clone(), names);
    let oracle = Arc::new(WeightedRandomOracle::new(config.success_ratio));
    let repo = PaymentRepository::new(store.clone(), queue, oracle, publisher);
    let service = PaymentService::new(repo.clone(), metrics.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = Worker::new(repo, config.retry, metrics.clone(), shutdown_rx, info_span!("settlement_worker"));
    let supervisor = Supervisor::new(
        config.supervisor_restarts,
        config.supervisor_pause,
        health.clone(),
        metrics.clone(),
        info_span!("worker_supervisor"),
    );
    let worker_task = tokio::spawn(async move {
        let final_state = supervisor.run(|| worker.run()).await;
        if final_state == WorkerState::Exhausted {
            warn!("Settlement halted; synchronous requests continue to be served");
        }
    });

    let consumer = CreationRequestConsumer::new(
        service.clone(),
        store.clone(),
        config.request_channel.clone(),
        info_span!("creation_requests"),
    );
    tokio::spawn(async move {
        if let Err(err) = consumer.run().await {
            warn!(%err, "Payment request consumer stopped");
        }
    });
    let tap_store = store.clone();
    let log_channel = config.log_channel.clone();
    tokio::spawn(async move {
        if let Err(err) = run_log_tap(tap_store, log_channel, info_span!("log_tap")).await {
            warn!(%err, "Log channel tap stopped");
        }
    });

    let app = app_router(AppState { service, metrics, health });
    info!(addr = %config.bind_addr, "starting payment-service");
    let listener = TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(err) = worker_task.await {
        warn!(%err, "Worker task ended abnormally");
    }
    info!("payment-service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(%err, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                warn!(%err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
