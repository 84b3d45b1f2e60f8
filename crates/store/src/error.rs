use common::{PaymentDetailId, ProductInventoryId};
use thiserror::Error;

use crate::models::PaymentStatus;

/// SQLSTATE codes for failures that leave no trace once the transaction is gone.
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

/// Errors that can occur when reading or writing records.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested row does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    /// A unique or foreign-key constraint rejected the write.
    #[error("Constraint violation on {constraint}: {message}")]
    Conflict { constraint: String, message: String },

    /// A CHECK constraint rejected the written value.
    #[error("Check constraint {constraint} violated: {message}")]
    CheckViolation { constraint: String, message: String },

    /// Applying a stock delta would drive the inventory below zero.
    #[error(
        "Insufficient stock for inventory {inventory_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        inventory_id: ProductInventoryId,
        requested: i32,
        available: i32,
    },

    /// A payment was asked to make a status change it cannot make.
    #[error("Payment {payment_id} cannot move from {from} to {to}")]
    InvalidTransition {
        payment_id: PaymentDetailId,
        from: PaymentStatus,
        to: PaymentStatus,
    },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The unit of work failed and the rollback that followed failed too.
    #[error("Transaction error: {source}; rollback error: {rollback}")]
    Rollback {
        source: Box<StoreError>,
        rollback: Box<StoreError>,
    },
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, id: impl Into<i64>) -> Self {
        StoreError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Classifies a raw driver error, turning unique and foreign-key
    /// violations into [`StoreError::Conflict`] and CHECK violations into
    /// [`StoreError::CheckViolation`].
    pub fn from_database(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            let constraint = db_err.constraint().unwrap_or("unknown").to_string();
            let message = db_err.message().to_string();
            if db_err.is_unique_violation() || db_err.is_foreign_key_violation() {
                return StoreError::Conflict {
                    constraint,
                    message,
                };
            }
            if db_err.is_check_violation() {
                return StoreError::CheckViolation {
                    constraint,
                    message,
                };
            }
        }
        StoreError::Database(err)
    }

    pub(crate) fn conflict(constraint: &str, message: impl Into<String>) -> Self {
        StoreError::Conflict {
            constraint: constraint.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn check_violation(constraint: &str, message: impl Into<String>) -> Self {
        StoreError::CheckViolation {
            constraint: constraint.to_string(),
            message: message.into(),
        }
    }

    /// Returns true if the failure is an infrastructure hiccup after which
    /// rerunning the whole transaction from scratch is safe.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(err) => match err {
                sqlx::Error::Io(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::WorkerCrashed => true,
                sqlx::Error::Database(db_err) => matches!(
                    db_err.code().as_deref(),
                    Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED)
                ),
                _ => false,
            },
            _ => false,
        }
    }

    /// Returns true for `NotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_transient() {
        let err = StoreError::Database(sqlx::Error::Io(std::io::Error::other("reset")));
        assert!(err.is_transient());
    }

    #[test]
    fn domain_errors_are_not_transient() {
        let err = StoreError::InsufficientStock {
            inventory_id: ProductInventoryId::new(1),
            requested: 3,
            available: 2,
        };
        assert!(!err.is_transient());
        assert!(!StoreError::not_found("cart_item", 4).is_transient());
    }

    #[test]
    fn rollback_error_reports_both_causes() {
        let err = StoreError::Rollback {
            source: Box::new(StoreError::not_found("cart_item", 4)),
            rollback: Box::new(StoreError::Database(sqlx::Error::PoolClosed)),
        };
        let message = err.to_string();
        assert!(message.contains("cart_item not found: 4"));
        assert!(message.contains("rollback error"));
        assert!(!err.is_transient());
    }

    #[test]
    fn non_constraint_errors_pass_through_classification() {
        let err = StoreError::from_database(sqlx::Error::RowNotFound);
        assert!(matches!(err, StoreError::Database(sqlx::Error::RowNotFound)));
    }
}
