//! Record accessors and transaction executor for the order fulfillment backend.
//!
//! [`Queries`] exposes single-statement accessors for the six fulfillment
//! tables. [`StoreExt::exec_tx`] runs a unit of work inside one database
//! transaction and commits or rolls it back as a whole. Two backends are
//! provided: [`PostgresStore`] and [`InMemoryStore`] for tests.

pub mod error;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod query;
pub mod store;

pub use common::{
    CartItemId, OrderDetailId, OrderItemId, PaymentDetailId, ProductId, ProductInventoryId,
    ShoppingSessionId, UserId,
};
pub use error::{Result, StoreError};
pub use memory::{InMemoryStore, MemoryTx, Operation};
pub use models::{
    CartItem, CreateCartItem, CreateOrderDetail, CreateOrderItem, CreateProductInventory,
    CreateShoppingSession, FinalizePayment, OrderDetail, OrderItem, PROVIDER_CASH,
    PROVIDER_UNKNOWN, PaymentDetail, PaymentStatus, ProductInventory, ShoppingSession,
    UnknownPaymentStatus, UpdateProductInventory,
};
pub use postgres::{PgQueries, PostgresStore};
pub use query::{DEFAULT_LIMIT, ListParams};
pub use store::{Queries, Store, StoreExt, Transactional};
