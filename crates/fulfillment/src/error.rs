//! Fulfillment error types.

use common::ProductInventoryId;
use store::StoreError;
use thiserror::Error;

/// Errors returned by the purchase workflow.
///
/// Every variant means the whole purchase was rolled back.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// Not enough stock left to cover the cart item.
    #[error(
        "Out of stock for inventory {inventory_id}: requested {requested}, available {available}"
    )]
    OutOfStock {
        inventory_id: ProductInventoryId,
        requested: i32,
        available: i32,
    },

    /// A constraint or state check rejected one of the writes.
    #[error("Conflicting write: {0}")]
    Conflict(#[source] StoreError),

    /// A row the purchase depends on no longer exists.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    /// An infrastructure failure; the purchase can be retried from scratch.
    #[error("Transient failure: {0}")]
    Transient(#[source] StoreError),

    /// Any other store failure.
    #[error("Store error: {0}")]
    Store(#[source] StoreError),
}

impl FulfillmentError {
    /// Returns true if rerunning the same purchase may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FulfillmentError::Transient(_))
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            FulfillmentError::OutOfStock { .. } => "out_of_stock",
            FulfillmentError::Conflict(_) => "conflict",
            FulfillmentError::NotFound { .. } => "not_found",
            FulfillmentError::Transient(_) => "transient",
            FulfillmentError::Store(_) => "failed",
        }
    }
}

impl From<StoreError> for FulfillmentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InsufficientStock {
                inventory_id,
                requested,
                available,
            } => FulfillmentError::OutOfStock {
                inventory_id,
                requested,
                available,
            },
            StoreError::NotFound { entity, id } => FulfillmentError::NotFound { entity, id },
            StoreError::Conflict { .. }
            | StoreError::CheckViolation { .. }
            | StoreError::InvalidTransition { .. } => FulfillmentError::Conflict(err),
            err if err.is_transient() => FulfillmentError::Transient(err),
            err => FulfillmentError::Store(err),
        }
    }
}

/// Convenience type alias for fulfillment results.
pub type Result<T> = std::result::Result<T, FulfillmentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_stock_becomes_out_of_stock() {
        let err = FulfillmentError::from(StoreError::InsufficientStock {
            inventory_id: ProductInventoryId::new(3),
            requested: 3,
            available: 2,
        });
        assert!(matches!(
            err,
            FulfillmentError::OutOfStock {
                requested: 3,
                available: 2,
                ..
            }
        ));
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "out_of_stock");
    }

    #[test]
    fn io_failures_are_retryable() {
        let err = FulfillmentError::from(StoreError::Database(sqlx_io_error()));
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "transient");
    }

    #[test]
    fn rollback_failures_are_not_retryable() {
        let err = FulfillmentError::from(StoreError::Rollback {
            source: Box::new(StoreError::Database(sqlx_io_error())),
            rollback: Box::new(StoreError::Database(sqlx_io_error())),
        });
        assert!(matches!(err, FulfillmentError::Store(StoreError::Rollback { .. })));
        assert!(!err.is_retryable());
    }

    #[test]
    fn check_violations_are_conflicts() {
        let err = FulfillmentError::from(StoreError::CheckViolation {
            constraint: "order_item_quantity_check".to_string(),
            message: "violates check".to_string(),
        });
        assert_eq!(err.kind(), "conflict");
    }

    fn sqlx_io_error() -> sqlx::Error {
        sqlx::Error::Io(std::io::Error::other("connection reset"))
    }
}
