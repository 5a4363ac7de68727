use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder};
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber. `APP_LOG_LEVEL=debug` lowers the default filter;
/// `RUST_LOG` wins over both when set.
pub fn init_tracing() {
    let default_level = match std::env::var("APP_LOG_LEVEL") {
        Ok(level) if level.eq_ignore_ascii_case("debug") => "debug",
        _ => "info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[derive(Clone)]
pub struct PipelineMetrics {
    pub registry: Registry,
    pub payments_created: IntCounter,
    pub payments_settled: IntCounterVec,
    pub settlement_retries: IntCounter,
    pub deadlettered: IntCounter,
    pub worker_restarts: IntCounter,
    pub worker_up: IntGauge,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let payments_created = IntCounter::new(
            "payments_created_total",
            "Payments accepted and queued for settlement",
        ).unwrap();
        let payments_settled = IntCounterVec::new(
            prometheus::Opts::new(
                "payments_settled_total",
                "Settlement outcomes committed by the worker"
            ),
            &["outcome"]
        ).unwrap();
        let settlement_retries = IntCounter::new(
            "payment_settlement_retries_total",
            "Settlement attempts beyond the first",
        ).unwrap();
        let deadlettered = IntCounter::new(
            "payments_deadlettered_total",
            "Payments moved to the dead-letter list after exhausting retries",
        ).unwrap();
        let worker_restarts = IntCounter::new(
            "payment_worker_restarts_total",
            "Worker loop restarts performed by the supervisor",
        ).unwrap();
        let worker_up = IntGauge::new(
            "payment_worker_up",
            "1 while the settlement worker loop is running",
        ).unwrap();
        let _ = registry.register(Box::new(payments_created.clone()));
        let _ = registry.register(Box::new(payments_settled.clone()));
        let _ = registry.register(Box::new(settlement_retries.clone()));
        let _ = registry.register(Box::new(deadlettered.clone()));
        let _ = registry.register(Box::new(worker_restarts.clone()));
        let _ = registry.register(Box::new(worker_up.clone()));
        PipelineMetrics { registry, payments_created, payments_settled, settlement_retries, deadlettered, worker_restarts, worker_up }
    }

    /// Prometheus text exposition of every registered metric.
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&self.registry.gather(), &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self { Self::new() }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Starting,
    Running,
    Restarting,
    Stopped,
    /// Restart budget spent; settlements no longer progress.
    Exhausted,
}

impl WorkerState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => WorkerState::Running,
            2 => WorkerState::Restarting,
            3 => WorkerState::Stopped,
            4 => WorkerState::Exhausted,
            _ => WorkerState::Starting,
        }
    }
}

/// Shared liveness flag for the background worker, read by the health endpoint.
#[derive(Clone, Default)]
pub struct WorkerHealth {
    state: Arc<AtomicU8>,
}

impl WorkerHealth {
    pub fn new() -> Self { Self::default() }

    pub fn set(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_settling(&self) -> bool {
        matches!(self.state(), WorkerState::Starting | WorkerState::Running | WorkerState::Restarting)
    }
}
