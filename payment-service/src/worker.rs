//! Background settlement.
//!
//! One cycle: claim an id (`pending` -> `processing`), settle it, release it.
//! Transient failures are retried with exponential backoff; an id that keeps
//! failing is dead-lettered. Nothing here ever crashes the loop for a single
//! payment. Only losing the store itself ends `Worker::run` with an error,
//! which the `Supervisor` answers with a bounded number of restarts.

use common_observability::{PipelineMetrics, WorkerHealth, WorkerState};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument, Span};
use uuid::Uuid;

use crate::domain::PaymentStatus;
use crate::error::{PaymentError, PaymentResult, StoreError};
use crate::queue::QueueManager;
use crate::repo::PaymentRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(20))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, base_delay: Duration::from_secs(1) }
    }
}

/// What happened to one claimed id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Settled(PaymentStatus),
    /// Already past `pending` (a replayed or re-delivered id); only released.
    AlreadySettled(PaymentStatus),
    /// Malformed or unknown id; released without settlement.
    Dropped,
    DeadLettered,
    /// The dequeue wait elapsed with nothing to claim.
    Idle,
}

#[derive(Clone)]
pub struct Worker {
    repo: PaymentRepository,
    retry: RetryPolicy,
    metrics: PipelineMetrics,
    shutdown: watch::Receiver<bool>,
    span: Span,
}

impl Worker {
    pub fn new(
        repo: PaymentRepository,
        retry: RetryPolicy,
        metrics: PipelineMetrics,
        shutdown: watch::Receiver<bool>,
        span: Span,
    ) -> Self {
        Self { repo, retry, metrics, shutdown, span }
    }

    fn queue(&self) -> &QueueManager {
        self.repo.queue()
    }

    /// Run cycles until shutdown is signalled. Shutdown is only observed while
    /// waiting for the next id; a claimed payment always finishes its full
    /// retry sequence first.
    pub async fn run(&self) -> PaymentResult<()> {
        self.run_loop().instrument(self.span.clone()).await
    }

    async fn run_loop(&self) -> PaymentResult<()> {
        let mut shutdown = self.shutdown.clone();
        info!("Payment settlement worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let claimed = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                claimed = self.queue().dequeue_for_processing() => claimed,
            };
            match claimed {
                Ok(raw_id) => {
                    self.handle(&raw_id).await;
                }
                Err(StoreError::Timeout(_)) => {
                    debug!("No pending payments; waiting again");
                }
                Err(err) => {
                    error!(?err, "Dequeue failed; stopping worker loop");
                    return Err(err.into());
                }
            }
        }
        info!("Payment settlement worker shutting down");
        Ok(())
    }

    /// Claim and process exactly one id.
    pub async fn run_once(&self) -> PaymentResult<CycleOutcome> {
        match self.queue().dequeue_for_processing().await {
            Ok(raw_id) => Ok(self.handle(&raw_id).instrument(self.span.clone()).await),
            Err(StoreError::Timeout(_)) => Ok(CycleOutcome::Idle),
            Err(err) => Err(err.into()),
        }
    }

    /// Settle a claimed id, retrying transient failures, dead-lettering on exhaustion.
    pub async fn handle(&self, raw_id: &str) -> CycleOutcome {
        let Ok(id) = Uuid::parse_str(raw_id) else {
            warn!(payment_id = %raw_id, "Malformed payment id in processing; dropping");
            self.release_unsettled(raw_id).await;
            return CycleOutcome::Dropped;
        };

        let mut attempt: u32 = 0;
        loop {
            match self.settle(id).await {
                Ok(outcome) => return outcome,
                Err(PaymentError::NotFound(_)) => {
                    warn!(payment_id = %id, "Claimed payment has no record; dropping");
                    self.release_unsettled(raw_id).await;
                    return CycleOutcome::Dropped;
                }
                Err(err) if err.is_transient() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    attempt += 1;
                    warn!(payment_id = %id, attempt, ?delay, %err, "Settlement failed; retrying");
                    self.metrics.settlement_retries.inc();
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    let failure = PaymentError::DeadLettered {
                        id,
                        attempts: attempt + 1,
                        last_error: err.to_string(),
                    };
                    error!(payment_id = %id, %failure, "Settlement abandoned");
                    if let Err(cleanup) = self.queue().deadletter(raw_id).await {
                        error!(payment_id = %id, ?cleanup, "Dead-letter cleanup failed");
                    }
                    self.metrics.deadlettered.inc();
                    return CycleOutcome::DeadLettered;
                }
            }
        }
    }

    async fn settle(&self, id: Uuid) -> PaymentResult<CycleOutcome> {
        let key = id.to_string();
        let payment = self.repo.get(id).await?;
        if payment.status != PaymentStatus::Pending {
            debug!(payment_id = %id, status = %payment.status, "Payment already settled; releasing");
            self.queue().settle(&key, payment.status).await?;
            return Ok(CycleOutcome::AlreadySettled(payment.status));
        }
        let outcome = self.repo.decide(payment.status);
        let committed = self.repo.commit_settlement(payment, outcome).await?;
        self.queue().settle(&key, committed.status).await?;
        self.metrics.payments_settled.with_label_values(&[committed.status.as_str()]).inc();
        info!(payment_id = %id, status = %committed.status, "Payment settled");
        Ok(CycleOutcome::Settled(committed.status))
    }

    async fn release_unsettled(&self, raw_id: &str) {
        if let Err(err) = self.queue().discard(raw_id).await {
            error!(payment_id = %raw_id, ?err, "Failed to release id from processing");
        }
    }
}

/// Restarts a failing worker loop a bounded number of times, then leaves
/// settlement stopped while the rest of the service keeps serving.
#[derive(Clone)]
pub struct Supervisor {
    max_restarts: u32,
    pause: Duration,
    health: WorkerHealth,
    metrics: PipelineMetrics,
    span: Span,
}

impl Supervisor {
    pub fn new(max_restarts: u32, pause: Duration, health: WorkerHealth, metrics: PipelineMetrics, span: Span) -> Self {
        Self { max_restarts, pause, health, metrics, span }
    }

    pub fn health(&self) -> &WorkerHealth {
        &self.health
    }

    /// Drive `start` until it returns `Ok` or the restart budget is spent.
    pub async fn run<F, Fut>(&self, mut start: F) -> WorkerState
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PaymentResult<()>>,
    {
        let span = self.span.clone();
        async move {
            let mut restarts = 0u32;
            loop {
                self.health.set(WorkerState::Running);
                self.metrics.worker_up.set(1);
                let result = start().await;
                self.metrics.worker_up.set(0);
                match result {
                    Ok(()) => {
                        info!("Worker loop stopped");
                        self.health.set(WorkerState::Stopped);
                        return WorkerState::Stopped;
                    }
                    Err(err) if restarts < self.max_restarts => {
                        restarts += 1;
                        warn!(%err, restarts, pause = ?self.pause, "Worker loop failed; restarting");
                        self.health.set(WorkerState::Restarting);
                        self.metrics.worker_restarts.inc();
                        tokio::time::sleep(self.pause).await;
                    }
                    Err(err) => {
                        error!(%err, restarts, "Worker restart budget exhausted; settlement halted");
                        self.health.set(WorkerState::Exhausted);
                        return WorkerState::Exhausted;
                    }
                }
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_base() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = (0..3).map(|a| policy.delay_for(a)).collect();
        assert_eq!(delays, vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)]);
        assert_eq!(delays.iter().sum::<Duration>(), Duration::from_secs(7));
    }

    #[test]
    fn backoff_does_not_overflow() {
        let policy = RetryPolicy { max_retries: 100, base_delay: Duration::from_secs(u64::MAX / 2) };
        assert_eq!(policy.delay_for(64), Duration::MAX);
    }
}
