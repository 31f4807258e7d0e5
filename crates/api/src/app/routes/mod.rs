use axum::{routing::post, Router};

pub mod common;
pub mod orders;
pub mod payments;
pub mod system;

/// Router for the checkout endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/orders", orders::router())
        .route("/payments/webhook", post(payments::webhook))
}
