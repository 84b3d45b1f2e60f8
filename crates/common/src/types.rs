use serde::{Deserialize, Serialize};

/// Declares a typed row identifier.
///
/// Each table gets its own wrapper around the `BIGSERIAL` primary key so
/// that a cart item id can never be passed where an order id is expected.
macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Creates an id from a raw database key.
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Returns the raw database key.
            pub const fn as_i64(&self) -> i64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

record_id!(
    /// Identifier of a `shopping_session` row.
    ShoppingSessionId
);
record_id!(
    /// Identifier of a `cart_item` row.
    CartItemId
);
record_id!(
    /// Identifier of a `product_inventory` row.
    ProductInventoryId
);
record_id!(
    /// Identifier of an `order_detail` row.
    OrderDetailId
);
record_id!(
    /// Identifier of an `order_item` row.
    OrderItemId
);
record_id!(
    /// Identifier of a `payment_detail` row.
    PaymentDetailId
);
record_id!(
    /// Identifier of an authenticated user, issued by the auth subsystem.
    UserId
);
record_id!(
    /// Identifier of a catalog product.
    ProductId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_from_raw_preserves_value() {
        let id = CartItemId::new(42);
        assert_eq!(id.as_i64(), 42);
        assert_eq!(i64::from(id), 42);
        assert_eq!(CartItemId::from(42), id);
    }

    #[test]
    fn id_displays_raw_key() {
        assert_eq!(OrderDetailId::new(7).to_string(), "7");
    }

    #[test]
    fn id_serializes_transparently() {
        let json = serde_json::to_string(&PaymentDetailId::new(9)).unwrap();
        assert_eq!(json, "9");
        let back: PaymentDetailId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, PaymentDetailId::new(9));
    }
}
