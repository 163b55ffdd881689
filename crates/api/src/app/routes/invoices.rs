use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query, rejection::{JsonRejection, QueryRejection}},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;

use forgebill_core::InvoiceId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_invoice).get(list_invoices))
        .route("/:id", get(get_invoice).put(update_invoice))
        .route("/:id/send", post(send_invoice))
        .route("/:id/payments", get(list_payments))
}

fn parse_invoice_id(raw: &str) -> Result<InvoiceId, Response> {
    raw.parse()
        .map_err(|_| errors::validation_error(format!("invalid invoice id '{raw}'")))
}

pub async fn create_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    payload: Result<Json<dto::CreateInvoiceRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match payload {
        Ok(b) => b,
        Err(rejection) => return errors::json_rejection(rejection),
    };

    match services.invoices.create_invoice(body.into()).await {
        Ok(view) => (StatusCode::CREATED, Json(dto::invoice_to_json(&view))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_invoices(
    Extension(services): Extension<Arc<AppServices>>,
    query: Result<Query<dto::ListInvoicesQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(rejection) => return errors::query_rejection(rejection),
    };
    let filter = match query.into_filter() {
        Ok(f) => f,
        Err(msg) => return errors::validation_error(msg),
    };

    match services.invoices.list_invoices(filter).await {
        Ok(summaries) => Json(json!({
            "items": summaries.iter().map(dto::summary_to_json).collect::<Vec<_>>(),
        }))
        .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn get_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_invoice_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.invoices.get_invoice(id).await {
        Ok(view) => Json(dto::invoice_to_json(&view)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn update_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    payload: Result<Json<dto::UpdateInvoiceRequest>, JsonRejection>,
) -> Response {
    let id = match parse_invoice_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let Json(body) = match payload {
        Ok(b) => b,
        Err(rejection) => return errors::json_rejection(rejection),
    };

    let (update, expected_version) = body.into_parts();
    match services
        .invoices
        .update_invoice(id, update, expected_version)
        .await
    {
        Ok(view) => Json(dto::invoice_to_json(&view)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn send_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_invoice_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.invoices.send_invoice(id).await {
        Ok(view) => Json(dto::invoice_to_json(&view)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_payments(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_invoice_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.invoices.list_payments(id).await {
        Ok(payments) => Json(json!({
            "items": payments.iter().map(dto::payment_to_json).collect::<Vec<_>>(),
        }))
        .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
