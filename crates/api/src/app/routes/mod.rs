use axum::{
    Router,
    routing::{get, post},
};

pub mod customers;
pub mod invoices;
pub mod payments;
pub mod system;

/// Router for all business endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/invoices", invoices::router())
        .nest("/customers", customers::router())
        .route("/payments", post(payments::record_payment))
        .route("/health", get(system::health))
}
