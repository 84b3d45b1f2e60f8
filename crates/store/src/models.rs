//! Row types and write parameters for the six fulfillment tables.

use chrono::{DateTime, Utc};
use common::{
    CartItemId, OrderDetailId, OrderItemId, PaymentDetailId, ProductId, ProductInventoryId,
    ShoppingSessionId, UserId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Provider recorded on a payment placeholder before the order is known.
pub const PROVIDER_UNKNOWN: &str = "Unknown";

/// Provider recorded on payments settled at checkout.
pub const PROVIDER_CASH: &str = "Cash";

/// A user's open checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShoppingSession {
    pub id: ShoppingSessionId,
    pub user_id: UserId,
    pub total: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A product line in a shopping session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: CartItemId,
    pub session_id: ShoppingSessionId,
    pub product_id: ProductId,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stock counter for one product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductInventory {
    pub id: ProductInventoryId,
    pub product_id: ProductId,
    pub quantity: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A placed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDetail {
    pub id: OrderDetailId,
    pub user_id: UserId,
    pub total: Decimal,
    pub payment_id: Option<PaymentDetailId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Snapshot of a purchased line. Never updated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderDetailId,
    pub product_id: ProductId,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
}

/// Payment attached to an order.
///
/// Created as a `Pending` placeholder with no order, then finalized once the
/// order exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentDetail {
    pub id: PaymentDetailId,
    pub order_id: Option<OrderDetailId>,
    pub amount: i32,
    pub provider: String,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentDetail {
    /// Returns true while the payment has not been linked and settled.
    pub fn is_placeholder(&self) -> bool {
        self.status == PaymentStatus::Pending
    }
}

/// Lifecycle of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PaymentStatus {
    #[default]
    Pending,
    Finished,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Finished => "Finished",
            PaymentStatus::Failed => "Failed",
        }
    }

    /// Returns true for statuses a payment never leaves.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = UnknownPaymentStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(PaymentStatus::Pending),
            "Finished" => Ok(PaymentStatus::Finished),
            "Failed" => Ok(PaymentStatus::Failed),
            other => Err(UnknownPaymentStatus(other.to_string())),
        }
    }
}

/// Error returned when a stored status string is not recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPaymentStatus(pub String);

impl std::fmt::Display for UnknownPaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown payment status: {}", self.0)
    }
}

impl std::error::Error for UnknownPaymentStatus {}

// -- Write parameters --

#[derive(Debug, Clone)]
pub struct CreateShoppingSession {
    pub user_id: UserId,
    pub total: Decimal,
}

#[derive(Debug, Clone)]
pub struct CreateCartItem {
    pub session_id: ShoppingSessionId,
    pub product_id: ProductId,
    pub quantity: i32,
}

#[derive(Debug, Clone)]
pub struct CreateProductInventory {
    pub product_id: ProductId,
    pub quantity: i32,
}

#[derive(Debug, Clone)]
pub struct UpdateProductInventory {
    pub id: ProductInventoryId,
    pub quantity: i32,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct CreateOrderDetail {
    pub user_id: UserId,
    pub total: Decimal,
    pub payment_id: PaymentDetailId,
}

#[derive(Debug, Clone)]
pub struct CreateOrderItem {
    pub order_id: OrderDetailId,
    pub product_id: ProductId,
    pub quantity: i32,
}

/// Moves a `Pending` payment placeholder to its terminal state.
#[derive(Debug, Clone)]
pub struct FinalizePayment {
    pub id: PaymentDetailId,
    pub order_id: OrderDetailId,
    pub amount: i32,
    pub provider: String,
    pub status: PaymentStatus,
}

impl FinalizePayment {
    /// A settled payment.
    pub fn finished(
        id: PaymentDetailId,
        order_id: OrderDetailId,
        amount: i32,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            id,
            order_id,
            amount,
            provider: provider.into(),
            status: PaymentStatus::Finished,
        }
    }

    /// A declined payment.
    pub fn failed(
        id: PaymentDetailId,
        order_id: OrderDetailId,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            id,
            order_id,
            amount: 0,
            provider: provider.into(),
            status: PaymentStatus::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_status_parses_stored_strings() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Finished,
            PaymentStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<PaymentStatus>(), Ok(status));
        }
        assert!("Refunded".parse::<PaymentStatus>().is_err());
    }

    #[test]
    fn only_pending_is_not_terminal() {
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(PaymentStatus::Finished.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
    }

    #[test]
    fn finalize_constructors_set_terminal_status() {
        let finished =
            FinalizePayment::finished(PaymentDetailId::new(1), OrderDetailId::new(2), 3, "Cash");
        assert_eq!(finished.status, PaymentStatus::Finished);
        assert_eq!(finished.amount, 3);

        let failed = FinalizePayment::failed(PaymentDetailId::new(1), OrderDetailId::new(2), "Card");
        assert_eq!(failed.status, PaymentStatus::Failed);
        assert_eq!(failed.amount, 0);
    }

    #[test]
    fn decimal_totals_serialize_as_strings() {
        let session = ShoppingSession {
            id: ShoppingSessionId::new(1),
            user_id: UserId::new(2),
            total: Decimal::new(2999, 2),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["total"], "29.99");
    }
}
