pub mod config;
pub mod consumer;
pub mod domain;
pub mod error;
pub mod oracle;
pub mod payment_handlers;
pub mod publisher;
pub mod queue;
pub mod repo;
pub mod service;
pub mod store;
pub mod worker;

pub use domain::{Payment, PaymentStatus, StatusChangedEvent};
pub use error::{PaymentError, PaymentResult, StoreError, StoreResult};
pub use payment_handlers::{app_router, AppState};
pub use service::PaymentService;
