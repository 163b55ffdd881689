use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use forgebill_core::DomainError;
use forgebill_infra::ServiceError;

/// Map a service failure to its HTTP status and `{code, message}` envelope.
pub fn service_error_to_response(err: ServiceError) -> Response {
    match err {
        ServiceError::Domain(e) => domain_error_to_response(e),
        ServiceError::Store(e) => {
            tracing::error!(error = %e, "storage failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", "internal error")
        }
    }
}

pub fn domain_error_to_response(err: DomainError) -> Response {
    let status = match &err {
        DomainError::NotFound(_) => StatusCode::NOT_FOUND,
        DomainError::Conflict(_) => StatusCode::CONFLICT,
        DomainError::Validation(_) | DomainError::InvalidState(_) | DomainError::Overpayment(_) => {
            StatusCode::BAD_REQUEST
        }
    };
    let message = match &err {
        DomainError::Validation(m)
        | DomainError::InvalidState(m)
        | DomainError::NotFound(m)
        | DomainError::Overpayment(m)
        | DomainError::Conflict(m) => m.clone(),
    };
    json_error(status, err.code(), message)
}

pub fn json_rejection(rejection: JsonRejection) -> Response {
    validation_error(rejection.body_text())
}

pub fn query_rejection(rejection: QueryRejection) -> Response {
    validation_error(rejection.body_text())
}

pub fn validation_error(message: impl Into<String>) -> Response {
    json_error(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "code": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgebill_infra::StoreError;

    #[test]
    fn domain_errors_map_to_documented_statuses() {
        let cases = [
            (DomainError::validation("x"), StatusCode::BAD_REQUEST),
            (DomainError::invalid_state("x"), StatusCode::BAD_REQUEST),
            (DomainError::overpayment("x"), StatusCode::BAD_REQUEST),
            (DomainError::not_found("x"), StatusCode::NOT_FOUND),
            (DomainError::conflict("x"), StatusCode::CONFLICT),
        ];
        for (err, status) in cases {
            assert_eq!(domain_error_to_response(err).status(), status);
        }
    }

    #[test]
    fn store_failures_are_opaque_500s() {
        let res = service_error_to_response(ServiceError::Store(StoreError::Database(
            "password=hunter2".to_string(),
        )));
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
