//! Shared identifier types used across the fulfillment workspace.

pub mod types;

pub use types::{
    CartItemId, OrderDetailId, OrderItemId, PaymentDetailId, ProductId, ProductInventoryId,
    ShoppingSessionId, UserId,
};
