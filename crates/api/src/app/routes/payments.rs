use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

/// `201` with the new payment, or `200` with the payment previously recorded under the
/// same idempotency key.
pub async fn record_payment(
    Extension(services): Extension<Arc<AppServices>>,
    payload: Result<Json<dto::RecordPaymentRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match payload {
        Ok(b) => b,
        Err(rejection) => return errors::json_rejection(rejection),
    };

    match services.invoices.record_payment(body.into()).await {
        Ok(recorded) => {
            let status = if recorded.replayed {
                StatusCode::OK
            } else {
                StatusCode::CREATED
            };
            (status, Json(dto::payment_to_json(&recorded.payment))).into_response()
        }
        Err(e) => errors::service_error_to_response(e),
    }
}
