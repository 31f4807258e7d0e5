use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use storefront_infra::CheckoutError;

pub fn checkout_error_to_response(err: CheckoutError) -> axum::response::Response {
    let status = match &err {
        CheckoutError::Validation(_) => StatusCode::BAD_REQUEST,
        CheckoutError::NotFound(_) => StatusCode::NOT_FOUND,
        CheckoutError::Availability(_) => StatusCode::BAD_REQUEST,
        CheckoutError::Processor(_) => StatusCode::BAD_GATEWAY,
        CheckoutError::Conflict(_) => StatusCode::CONFLICT,
        CheckoutError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    match err {
        CheckoutError::Availability(issues) => (
            status,
            axum::Json(json!({
                "error": "availability_error",
                "message": "Some items in your cart are unavailable or have changed",
                "issues": issues,
            })),
        )
            .into_response(),
        CheckoutError::Storage(detail) => {
            tracing::error!(%detail, "storage failure");
            json_error(status, "storage_error", "internal storage error")
        }
        other => json_error(status, other.code(), other.to_string()),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
