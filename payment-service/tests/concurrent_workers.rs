mod common;

use common::Harness;
use futures::future::join_all;
use payment_service::PaymentStatus;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

const WORKERS: usize = 6;
const PAYMENTS: usize = 60;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_payment_is_settled_exactly_once() {
    let h = Harness::paying();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut ids = Vec::with_capacity(PAYMENTS);
    for _ in 0..PAYMENTS {
        let id = Uuid::new_v4();
        h.create(id).await;
        ids.push(id.to_string());
    }

    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let worker = h.worker(shutdown_rx.clone());
            tokio::spawn(async move { worker.run().await })
        })
        .collect();

    let drained = tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            let snapshot = h.service.queue_snapshot().await.unwrap();
            let settled = h.list(&h.names.paid).await.len();
            if snapshot.pending.is_empty() && snapshot.processing.is_empty() && settled >= PAYMENTS {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(drained.is_ok(), "workers did not drain the queue");

    shutdown_tx.send(true).unwrap();
    for result in join_all(handles).await {
        result.expect("worker task panicked").expect("worker loop failed");
    }

    let paid = h.list(&h.names.paid).await;
    assert_eq!(paid.len(), PAYMENTS, "an id was settled more than once");
    let unique: HashSet<_> = paid.iter().cloned().collect();
    assert_eq!(unique, ids.iter().cloned().collect::<HashSet<_>>());
    assert_eq!(h.store.publish_calls.load(Ordering::SeqCst), PAYMENTS);
    assert_eq!(h.metrics.payments_settled.with_label_values(&["paid"]).get(), PAYMENTS as u64);
    assert!(h.list(&h.names.deadletter).await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_stops_idle_workers() {
    let h = Harness::paying();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = h.worker(shutdown_rx);
    let handle = tokio::spawn(async move { worker.run().await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(true).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("worker observed shutdown")
        .expect("worker task panicked");
    assert!(result.is_ok());

    // nothing queued after shutdown is picked up
    let id = Uuid::new_v4();
    h.create(id).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    let got = h.repo.get(id).await.unwrap();
    assert_eq!(got.status, PaymentStatus::Pending);
}
