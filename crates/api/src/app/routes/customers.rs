use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    response::{IntoResponse, Response},
    routing::get,
};

use forgebill_core::CustomerId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new().route("/:id/balance", get(customer_balance))
}

pub async fn customer_balance(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let customer_id: CustomerId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::validation_error(format!("invalid customer id '{id}'")),
    };

    match services.invoices.customer_balance(customer_id).await {
        Ok(position) => Json(dto::customer_balance_to_json(&position)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
