use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use storefront_infra::{CheckoutError, NewOrder};

use crate::app::routes::common::parse_order_id;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_order))
        .route("/calculate-total", post(calculate_total))
        .route("/validate-cart", post(validate_cart))
        .route("/:id", get(get_order))
        .route("/:id/confirm-payment", post(confirm_payment))
        .route("/:id/create-checkout-session", post(create_checkout_session))
        .route("/:id/verify-checkout-session", post(verify_checkout_session))
        .route("/:id/notify-payment-cancelled", post(notify_payment_cancelled))
}

pub async fn create_order(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<NewOrder>,
) -> axum::response::Response {
    match services.orchestrator.place_order(body).await {
        Ok(placed) => (
            StatusCode::CREATED,
            Json(dto::CreateOrderResponse {
                order: dto::OrderView::from(&placed.order),
                client_secret: placed.client_secret,
            }),
        )
            .into_response(),
        Err(e) => errors::checkout_error_to_response(e),
    }
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id = match parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.orchestrator.get_order(order_id).await {
        Ok(order) => (StatusCode::OK, Json(dto::OrderView::from(&order))).into_response(),
        Err(e) => errors::checkout_error_to_response(e),
    }
}

/// Advisory quote. An invalid quote comes back with status 400 but keeps its
/// shape, so the grouped issues and the totals of the valid items stay
/// visible. Price drift alone still answers 200.
pub async fn calculate_total(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CalculateTotalRequest>,
) -> axum::response::Response {
    let quote = match services.orchestrator.quote(&body.items).await {
        Ok(q) => q,
        Err(e) => return errors::checkout_error_to_response(e),
    };

    let status = if quote.valid {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(quote)).into_response()
}

pub async fn validate_cart(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::ValidateCartRequest>,
) -> axum::response::Response {
    match services.orchestrator.validate_cart(&body.items).await {
        Ok(validation) => (StatusCode::OK, Json(validation)).into_response(),
        Err(e) => errors::checkout_error_to_response(e),
    }
}

pub async fn confirm_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::ConfirmPaymentRequest>,
) -> axum::response::Response {
    let order_id = match parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .channels
        .confirm_payment(order_id, &body.reference_id)
        .await
    {
        Ok(report) => (StatusCode::OK, Json(dto::ChannelResponse::from(report))).into_response(),
        Err(e) => errors::checkout_error_to_response(e),
    }
}

pub async fn create_checkout_session(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id = match parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.orchestrator.create_checkout_session(order_id).await {
        Ok(session) => (
            StatusCode::OK,
            Json(dto::CheckoutSessionResponse {
                checkout_session_id: session.session_id,
                url: session.url,
            }),
        )
            .into_response(),
        Err(e) => errors::checkout_error_to_response(e),
    }
}

pub async fn verify_checkout_session(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::VerifyCheckoutSessionRequest>,
) -> axum::response::Response {
    let order_id = match parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .channels
        .verify_checkout_session(order_id, &body.session_id)
        .await
    {
        Ok(report) => (StatusCode::OK, Json(dto::ChannelResponse::from(report))).into_response(),
        Err(e) => errors::checkout_error_to_response(e),
    }
}

pub async fn notify_payment_cancelled(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Option<Json<dto::PaymentCancelledRequest>>,
) -> axum::response::Response {
    let order_id = match parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let body = body.map(|Json(b)| b).unwrap_or_default();

    match services
        .reconciler
        .report_cancellation(order_id, body.reason.as_deref())
        .await
    {
        Ok(notified) => {
            (StatusCode::OK, Json(dto::PaymentCancelledResponse { notified })).into_response()
        }
        Err(e) => errors::checkout_error_to_response(CheckoutError::from(e)),
    }
}
