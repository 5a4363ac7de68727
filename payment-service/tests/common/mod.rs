#![allow(dead_code)]

use async_trait::async_trait;
use common_observability::PipelineMetrics;
use payment_service::{
    error::{StoreError, StoreResult},
    oracle::{FixedOracle, SettlementOracle},
    publisher::{StatusPublisher, DEFAULT_STATUS_CHANNEL},
    queue::{QueueManager, QueueNames},
    repo::PaymentRepository,
    service::{CreatePaymentRequest, PaymentService},
    store::{InMemoryStore, Store, Subscription},
    worker::{RetryPolicy, Worker},
    PaymentStatus,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::Span;
use uuid::Uuid;

pub const TEST_DEQUEUE_TIMEOUT: Duration = Duration::from_millis(100);

/// In-memory store with switchable failures, for driving retry and compensation paths.
#[derive(Default)]
pub struct FaultyStore {
    pub inner: InMemoryStore,
    pub fail_set: AtomicBool,
    pub fail_push: AtomicBool,
    pub fail_delete: AtomicBool,
    pub fail_publish: AtomicBool,
    pub fail_move: AtomicBool,
    pub set_calls: AtomicUsize,
    pub publish_calls: AtomicUsize,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(flag: &AtomicBool, op: &str) -> StoreResult<()> {
        if flag.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable(format!("{op} refused")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.inner.exists(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> StoreResult<()> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        Self::check(&self.fail_set, "set")?;
        self.inner.set(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        Self::check(&self.fail_delete, "delete")?;
        self.inner.delete(key).await
    }

    async fn push_head(&self, list: &str, value: &str) -> StoreResult<()> {
        Self::check(&self.fail_push, "lpush")?;
        self.inner.push_head(list, value).await
    }

    async fn remove_by_value(&self, list: &str, count: i64, value: &str) -> StoreResult<u64> {
        self.inner.remove_by_value(list, count, value).await
    }

    async fn atomic_move(&self, source: &str, dest: &str, timeout: Duration) -> StoreResult<String> {
        Self::check(&self.fail_move, "blmove")?;
        self.inner.atomic_move(source, dest, timeout).await
    }

    async fn list_members(&self, list: &str) -> StoreResult<Vec<String>> {
        self.inner.list_members(list).await
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> StoreResult<()> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        Self::check(&self.fail_publish, "publish")?;
        self.inner.publish(channel, payload).await
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<Subscription> {
        self.inner.subscribe(channel).await
    }
}

pub struct Harness {
    pub store: Arc<FaultyStore>,
    pub names: QueueNames,
    pub repo: PaymentRepository,
    pub service: PaymentService,
    pub metrics: PipelineMetrics,
}

impl Harness {
    pub fn new(oracle: Arc<dyn SettlementOracle>) -> Self {
        let store = Arc::new(FaultyStore::new());
        let names = QueueNames::default();
        let queue = QueueManager::new(store.clone(), names.clone(), TEST_DEQUEUE_TIMEOUT);
        let publisher = StatusPublisher::new(store.clone(), DEFAULT_STATUS_CHANNEL, names.clone());
        let repo = PaymentRepository::new(store.clone(), queue, oracle, publisher);
        let metrics = PipelineMetrics::new();
        let service = PaymentService::new(repo.clone(), metrics.clone());
        Self { store, names, repo, service, metrics }
    }

    pub fn paying() -> Self {
        Self::new(Arc::new(FixedOracle(PaymentStatus::Paid)))
    }

    pub fn worker(&self, shutdown: watch::Receiver<bool>) -> Worker {
        self.worker_with(RetryPolicy::default(), shutdown, Span::none())
    }

    pub fn worker_with(&self, retry: RetryPolicy, shutdown: watch::Receiver<bool>, span: Span) -> Worker {
        Worker::new(self.repo.clone(), retry, self.metrics.clone(), shutdown, span)
    }

    pub async fn create(&self, id: Uuid) {
        self.service
            .create_payment(create_request(id, "10.00"))
            .await
            .expect("create payment");
    }

    pub async fn list(&self, list: &str) -> Vec<String> {
        self.store.list_members(list).await.expect("list members")
    }
}

pub fn create_request(id: Uuid, amount: &str) -> CreatePaymentRequest {
    CreatePaymentRequest {
        id: id.to_string(),
        order_id: Uuid::new_v4().to_string(),
        amount: amount.to_string(),
    }
}
