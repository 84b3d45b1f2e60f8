use async_trait::async_trait;
use common::{
    CartItemId, OrderDetailId, OrderItemId, PaymentDetailId, ProductId, ProductInventoryId,
    ShoppingSessionId, UserId,
};
use futures_core::future::BoxFuture;
use rust_decimal::Decimal;

use crate::models::{
    CartItem, CreateCartItem, CreateOrderDetail, CreateOrderItem, CreateProductInventory,
    CreateShoppingSession, FinalizePayment, OrderDetail, OrderItem, PaymentDetail,
    ProductInventory, ShoppingSession, UpdateProductInventory,
};
use crate::{ListParams, Result, StoreError};

/// Single-statement accessors for every fulfillment table.
///
/// Implemented both by plain connections (autocommit) and by open
/// transactions, so the same code runs inside or outside a transaction.
/// Every `get`, `update` and `delete` of a missing row fails with
/// [`StoreError::NotFound`].
#[async_trait]
pub trait Queries: Send {
    // -- shopping_session --

    async fn create_shopping_session(
        &mut self,
        params: CreateShoppingSession,
    ) -> Result<ShoppingSession>;

    async fn get_shopping_session(&mut self, id: ShoppingSessionId) -> Result<ShoppingSession>;

    async fn update_shopping_session_total(
        &mut self,
        id: ShoppingSessionId,
        total: Decimal,
    ) -> Result<ShoppingSession>;

    /// Deletes a session together with its cart items.
    async fn delete_shopping_session(&mut self, id: ShoppingSessionId) -> Result<()>;

    async fn list_shopping_sessions(&mut self, params: ListParams) -> Result<Vec<ShoppingSession>>;

    // -- cart_item --

    async fn create_cart_item(&mut self, params: CreateCartItem) -> Result<CartItem>;

    async fn get_cart_item(&mut self, id: CartItemId) -> Result<CartItem>;

    async fn list_cart_items_by_session(
        &mut self,
        session_id: ShoppingSessionId,
    ) -> Result<Vec<CartItem>>;

    async fn update_cart_item_quantity(&mut self, id: CartItemId, quantity: i32)
    -> Result<CartItem>;

    async fn delete_cart_item(&mut self, id: CartItemId) -> Result<()>;

    async fn list_cart_items(&mut self, params: ListParams) -> Result<Vec<CartItem>>;

    // -- product_inventory --

    async fn create_product_inventory(
        &mut self,
        params: CreateProductInventory,
    ) -> Result<ProductInventory>;

    async fn get_product_inventory(&mut self, id: ProductInventoryId) -> Result<ProductInventory>;

    /// Reads an inventory row and holds an exclusive lock on it until the
    /// surrounding transaction ends. Outside a transaction the lock is
    /// released as soon as the statement completes.
    async fn get_product_inventory_for_update(
        &mut self,
        id: ProductInventoryId,
    ) -> Result<ProductInventory>;

    async fn get_product_inventory_by_product(
        &mut self,
        product_id: ProductId,
    ) -> Result<ProductInventory>;

    async fn update_product_inventory(
        &mut self,
        params: UpdateProductInventory,
    ) -> Result<ProductInventory>;

    /// Atomically adds `delta` to the stock counter.
    ///
    /// The change is a single conditional update; it never clamps. If the
    /// result would be negative the row is left untouched and
    /// [`StoreError::InsufficientStock`] is returned.
    async fn update_product_quantity(
        &mut self,
        id: ProductInventoryId,
        delta: i32,
    ) -> Result<ProductInventory>;

    async fn delete_product_inventory(&mut self, id: ProductInventoryId) -> Result<()>;

    async fn list_product_inventories(
        &mut self,
        params: ListParams,
    ) -> Result<Vec<ProductInventory>>;

    // -- order_detail --

    async fn create_order_detail(&mut self, params: CreateOrderDetail) -> Result<OrderDetail>;

    async fn get_order_detail(&mut self, id: OrderDetailId) -> Result<OrderDetail>;

    /// Deletes an order and its items; a linked payment is kept and unlinked.
    async fn delete_order_detail(&mut self, id: OrderDetailId) -> Result<()>;

    async fn list_order_details_by_user(
        &mut self,
        user_id: UserId,
        params: ListParams,
    ) -> Result<Vec<OrderDetail>>;

    // -- order_item --

    async fn create_order_item(&mut self, params: CreateOrderItem) -> Result<OrderItem>;

    async fn get_order_item(&mut self, id: OrderItemId) -> Result<OrderItem>;

    async fn list_order_items_by_order(&mut self, order_id: OrderDetailId)
    -> Result<Vec<OrderItem>>;

    async fn delete_order_item(&mut self, id: OrderItemId) -> Result<()>;

    async fn list_order_items(&mut self, params: ListParams) -> Result<Vec<OrderItem>>;

    // -- payment_detail --

    /// Creates a `Pending` payment with amount 0, provider `Unknown` and no order.
    async fn create_payment_placeholder(&mut self) -> Result<PaymentDetail>;

    async fn get_payment_detail(&mut self, id: PaymentDetailId) -> Result<PaymentDetail>;

    /// Links a `Pending` payment to its order and moves it to a terminal status.
    ///
    /// Fails with [`StoreError::InvalidTransition`] if the payment already left
    /// `Pending` or if the target status is not terminal.
    async fn finalize_payment_detail(&mut self, params: FinalizePayment) -> Result<PaymentDetail>;

    async fn delete_payment_detail(&mut self, id: PaymentDetailId) -> Result<()>;

    async fn list_payment_details(&mut self, params: ListParams) -> Result<Vec<PaymentDetail>>;
}

/// An open transaction exposing the accessors.
///
/// Dropping a transaction without calling [`Transactional::commit`] rolls it
/// back, which is what makes cancellation safe.
#[async_trait]
pub trait Transactional: Queries + Sized {
    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}

/// A backing store able to hand out connections and transactions.
#[async_trait]
pub trait Store: Send + Sync {
    /// Accessor set running every statement in autocommit mode.
    type Conn: Queries;

    /// Accessor set bound to one transaction.
    type Tx: Transactional;

    /// Acquires a non-transactional accessor set.
    async fn acquire(&self) -> Result<Self::Conn>;

    /// Opens a transaction.
    async fn begin(&self) -> Result<Self::Tx>;
}

/// Transaction executor built on top of [`Store`].
#[async_trait]
pub trait StoreExt: Store {
    /// Runs `work` inside one transaction.
    ///
    /// Commits when `work` succeeds and returns its value; a commit failure is
    /// returned as-is. When `work` fails the transaction is rolled back and the
    /// original error is returned. If the rollback fails as well, both errors
    /// are returned together as [`StoreError::Rollback`].
    async fn exec_tx<T, F>(&self, work: F) -> Result<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut Self::Tx) -> BoxFuture<'t, Result<T>> + Send,
    {
        let mut tx = self.begin().await?;

        match work(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                metrics::counter!("store_transactions_total", "outcome" => "committed")
                    .increment(1);
                Ok(value)
            }
            Err(err) => match tx.rollback().await {
                Ok(()) => {
                    tracing::debug!(error = %err, "transaction rolled back");
                    metrics::counter!("store_transactions_total", "outcome" => "rolled_back")
                        .increment(1);
                    Err(err)
                }
                Err(rollback) => {
                    tracing::error!(error = %err, rollback_error = %rollback, "rollback failed");
                    metrics::counter!("store_transactions_total", "outcome" => "rollback_failed")
                        .increment(1);
                    Err(StoreError::Rollback {
                        source: Box::new(err),
                        rollback: Box::new(rollback),
                    })
                }
            },
        }
    }
}

// Blanket implementation for all Store implementations
impl<T: Store + ?Sized> StoreExt for T {}
