mod common;

use common::Harness;
use payment_service::{
    consumer::{ConsumerAction, CreationRequestConsumer, DEFAULT_REQUEST_CHANNEL},
    service::GetPaymentRequest,
    store::Store,
    PaymentError, PaymentStatus,
};
use serde_json::json;
use std::time::Duration;
use tracing::Span;
use uuid::Uuid;

fn consumer(h: &Harness) -> CreationRequestConsumer {
    CreationRequestConsumer::new(h.service.clone(), h.store.clone(), DEFAULT_REQUEST_CHANNEL, Span::none())
}

fn request(id: Uuid, price: serde_json::Value, order_status: &str) -> Vec<u8> {
    json!({
        "id": id,
        "created_at": "2024-03-01T12:00:00Z",
        "updated_at": "2024-03-01T12:00:00Z",
        "price": price,
        "order_id": Uuid::new_v4(),
        "status": order_status,
    })
    .to_string()
    .into_bytes()
}

#[tokio::test]
async fn open_order_creates_pending_payment_with_exact_price() {
    let h = Harness::paying();
    let id = Uuid::new_v4();
    let action = consumer(&h).handle(&request(id, json!(19.99), "Aguardando Pagamento")).await.unwrap();
    assert_eq!(action, ConsumerAction::Created);

    let got = h.service.get_payment(GetPaymentRequest { id: id.to_string() }).await.unwrap();
    assert_eq!(got.status, PaymentStatus::Pending);
    assert_eq!(got.payment.amount.to_string(), "19.99");
    assert_eq!(h.list(&h.names.pending).await, vec![id.to_string()]);
}

#[tokio::test]
async fn price_beyond_f64_precision_is_stored_exactly() {
    let h = Harness::paying();
    let id = Uuid::new_v4();
    let body = format!(
        r#"{{"id":"{id}","created_at":"2024-03-01T12:00:00Z","price":12345678901234567.89,"order_id":"{}","status":"Aberto"}}"#,
        Uuid::new_v4()
    );
    consumer(&h).handle(body.as_bytes()).await.unwrap();

    let got = h.service.get_payment(GetPaymentRequest { id: id.to_string() }).await.unwrap();
    assert_eq!(got.payment.amount.to_string(), "12345678901234567.89");
}

#[tokio::test]
async fn sub_cent_price_is_rejected() {
    let h = Harness::paying();
    let body = format!(
        r#"{{"id":"{}","created_at":"2024-03-01T12:00:00Z","price":10.009,"order_id":"{}","status":"Aberto"}}"#,
        Uuid::new_v4(),
        Uuid::new_v4()
    );
    let err = consumer(&h).handle(body.as_bytes()).await.unwrap_err();
    assert!(matches!(err, PaymentError::InvalidInput(_)));
    assert!(h.list(&h.names.pending).await.is_empty());
}

#[tokio::test]
async fn received_order_still_starts_pending() {
    let h = Harness::paying();
    let id = Uuid::new_v4();
    consumer(&h).handle(&request(id, json!(5), "Recebido")).await.unwrap();
    let got = h.service.get_payment(GetPaymentRequest { id: id.to_string() }).await.unwrap();
    assert_eq!(got.status, PaymentStatus::Pending);
    assert_eq!(got.payment.amount.to_string(), "5.00");
}

#[tokio::test]
async fn other_order_statuses_close_the_payment() {
    let h = Harness::paying();
    let c = consumer(&h);
    let id = Uuid::new_v4();
    c.handle(&request(id, json!(12.5), "Aberto")).await.unwrap();

    let action = c.handle(&request(id, json!(12.5), "Cancelado")).await.unwrap();
    assert_eq!(action, ConsumerAction::Closed);
    let got = h.service.get_payment(GetPaymentRequest { id: id.to_string() }).await.unwrap();
    assert_eq!(got.status, PaymentStatus::Closed);
    assert!(h.list(&h.names.pending).await.is_empty());

    // closing something never created is still fine
    let ghost = c.handle(&request(Uuid::new_v4(), json!(1), "Finalizado")).await.unwrap();
    assert_eq!(ghost, ConsumerAction::Closed);
}

#[tokio::test]
async fn bad_messages_are_rejected() {
    let h = Harness::paying();
    let c = consumer(&h);
    assert!(matches!(c.handle(b"{not json").await, Err(PaymentError::InvalidInput(_))));

    let mut bad_time: serde_json::Value =
        serde_json::from_slice(&request(Uuid::new_v4(), json!(1), "Aberto")).unwrap();
    bad_time["created_at"] = json!("yesterday");
    let err = c.handle(bad_time.to_string().as_bytes()).await.unwrap_err();
    assert!(matches!(err, PaymentError::InvalidInput(_)));

    bad_time.as_object_mut().unwrap().remove("created_at");
    let err = c.handle(bad_time.to_string().as_bytes()).await.unwrap_err();
    assert!(matches!(err, PaymentError::InvalidInput(_)));

    let err = c.handle(&request(Uuid::new_v4(), json!(0), "Aberto")).await.unwrap_err();
    assert!(matches!(err, PaymentError::InvalidInput(_)));
    assert!(h.list(&h.names.pending).await.is_empty());
}

#[tokio::test]
async fn subscription_keeps_running_past_bad_messages() {
    let h = Harness::paying();
    let c = consumer(&h);
    let task = tokio::spawn(async move { c.run().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let id = Uuid::new_v4();
    h.store.publish(DEFAULT_REQUEST_CHANNEL, b"garbage".to_vec()).await.unwrap();
    h.store.publish(DEFAULT_REQUEST_CHANNEL, request(id, json!(7.25), "Aberto")).await.unwrap();

    let created = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if h.repo.get(id).await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(created.is_ok(), "valid request after a bad one was not processed");
    assert!(!task.is_finished());
    task.abort();
}
