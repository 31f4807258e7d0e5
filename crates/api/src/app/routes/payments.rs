use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};

use storefront_payments::SIGNATURE_HEADER;

use crate::app::errors;
use crate::app::services::AppServices;

/// Processor push channel. Any authenticated payload is acknowledged with 200,
/// whatever happens to the order; only bad signatures and storage failures
/// are surfaced.
pub async fn webhook(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let signature = match headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        Some(v) => v,
        None => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                "missing webhook signature",
            );
        }
    };

    match services.channels.handle_webhook(&body, signature).await {
        Ok(ack) => (StatusCode::OK, Json(ack)).into_response(),
        Err(e) => errors::checkout_error_to_response(e),
    }
}
