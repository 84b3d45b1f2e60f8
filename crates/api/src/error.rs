//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fulfillment::FulfillmentError;
use store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Missing or invalid caller identity.
    Unauthorized(String),
    /// The caller does not own the resource.
    Forbidden(String),
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// The request could not finish in time or hit a transient failure.
    ServiceUnavailable(String),
    /// Purchase workflow error.
    Fulfillment(FulfillmentError),
    /// Record store error outside the workflow.
    Store(StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Fulfillment(err) => fulfillment_error_to_response(err),
            ApiError::Store(err) => store_error_to_response(err),
        };

        if status.is_server_error() {
            tracing::error!(%status, error = %message, "request failed");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn fulfillment_error_to_response(err: FulfillmentError) -> (StatusCode, String) {
    match &err {
        FulfillmentError::OutOfStock { .. } => {
            (StatusCode::CONFLICT, format!("Product is out of stock: {err}"))
        }
        FulfillmentError::Conflict(_) => (StatusCode::CONFLICT, err.to_string()),
        FulfillmentError::NotFound { .. } => (StatusCode::NOT_FOUND, err.to_string()),
        FulfillmentError::Transient(_) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        FulfillmentError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

fn store_error_to_response(err: StoreError) -> (StatusCode, String) {
    match &err {
        StoreError::NotFound { .. } => (StatusCode::NOT_FOUND, err.to_string()),
        StoreError::Conflict { .. } | StoreError::CheckViolation { .. } => {
            (StatusCode::CONFLICT, err.to_string())
        }
        _ if err.is_transient() => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

impl From<FulfillmentError> for ApiError {
    fn from(err: FulfillmentError) -> Self {
        ApiError::Fulfillment(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

#[cfg(test)]
mod tests {
    use common::ProductInventoryId;

    use super::*;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_out_of_stock_is_conflict() {
        let err = ApiError::from(FulfillmentError::OutOfStock {
            inventory_id: ProductInventoryId::new(1),
            requested: 3,
            available: 2,
        });
        assert_eq!(status_of(err), StatusCode::CONFLICT);
    }

    #[test]
    fn test_transient_failures_are_unavailable() {
        let io = || StoreError::Database(store_io_error());
        assert_eq!(
            status_of(ApiError::from(FulfillmentError::from(io()))),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(ApiError::from(io())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_missing_rows_are_not_found() {
        let err = ApiError::from(StoreError::NotFound {
            entity: "shopping_session",
            id: 9,
        });
        assert_eq!(status_of(err), StatusCode::NOT_FOUND);
    }

    fn store_io_error() -> sqlx::Error {
        sqlx::Error::Io(std::io::Error::other("connection reset"))
    }
}
