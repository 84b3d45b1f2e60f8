use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use common::{
    CartItemId, OrderDetailId, OrderItemId, PaymentDetailId, ProductId, ProductInventoryId,
    ShoppingSessionId, UserId,
};
use rust_decimal::Decimal;
use tokio::sync::OwnedMutexGuard;

use crate::models::{
    CartItem, CreateCartItem, CreateOrderDetail, CreateOrderItem, CreateProductInventory,
    CreateShoppingSession, FinalizePayment, OrderDetail, OrderItem, PROVIDER_UNKNOWN,
    PaymentDetail, PaymentStatus, ProductInventory, ShoppingSession, UpdateProductInventory,
};
use crate::store::{Queries, Store, Transactional};
use crate::{ListParams, Result, StoreError};

/// Accessor calls that can be made to fail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Begin,
    CreatePaymentDetail,
    CreateOrderDetail,
    CreateOrderItem,
    FinalizePaymentDetail,
    LockProductInventory,
    UpdateProductQuantity,
    DeleteCartItem,
    DeleteShoppingSession,
    Commit,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Default)]
struct Tables {
    sessions: BTreeMap<i64, ShoppingSession>,
    cart_items: BTreeMap<i64, CartItem>,
    inventories: BTreeMap<i64, ProductInventory>,
    orders: BTreeMap<i64, OrderDetail>,
    order_items: BTreeMap<i64, OrderItem>,
    payments: BTreeMap<i64, PaymentDetail>,
}

#[derive(Debug, Default)]
struct State {
    tables: Tables,
    // Like a database sequence, ids handed out are never reused after rollback.
    next_id: i64,
}

#[derive(Debug, Default)]
struct Faults {
    operations: Mutex<HashSet<Operation>>,
    rollback: AtomicBool,
}

impl Faults {
    fn check(&self, op: Operation) -> Result<()> {
        let failing = self
            .operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&op);
        if failing {
            return Err(StoreError::Database(sqlx::Error::Io(std::io::Error::other(
                format!("injected failure in {op}"),
            ))));
        }
        Ok(())
    }
}

/// In-memory store implementation for testing.
///
/// Transactions are fully serialized behind one async mutex and rolled back
/// by restoring a snapshot of the tables taken at `begin`. The store offers
/// the same interface and constraint checks as the PostgreSQL store, plus
/// fault injection for exercising failure paths.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<tokio::sync::Mutex<State>>,
    faults: Arc<Faults>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call of `op` fail with an I/O error.
    pub fn fail_on(&self, op: Operation) {
        self.faults
            .operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(op);
    }

    /// Makes rollbacks report failure. The data is still restored.
    pub fn fail_rollback(&self, fail: bool) {
        self.faults.rollback.store(fail, Ordering::SeqCst);
    }

    /// Removes all injected faults.
    pub fn clear_faults(&self) {
        self.faults
            .operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.faults.rollback.store(false, Ordering::SeqCst);
    }

    /// Returns the number of rows in each table, keyed by table name.
    pub async fn row_counts(&self) -> BTreeMap<&'static str, usize> {
        let state = self.state.lock().await;
        let tables = &state.tables;
        BTreeMap::from([
            ("cart_item", tables.cart_items.len()),
            ("order_detail", tables.orders.len()),
            ("order_item", tables.order_items.len()),
            ("payment_detail", tables.payments.len()),
            ("product_inventory", tables.inventories.len()),
            ("shopping_session", tables.sessions.len()),
        ])
    }
}

#[async_trait]
impl Store for InMemoryStore {
    type Conn = MemoryTx;
    type Tx = MemoryTx;

    /// Hands out an autocommit accessor set. It holds the store lock until
    /// dropped.
    async fn acquire(&self) -> Result<Self::Conn> {
        let guard = self.state.clone().lock_owned().await;
        Ok(MemoryTx {
            guard,
            snapshot: None,
            faults: self.faults.clone(),
        })
    }

    async fn begin(&self) -> Result<Self::Tx> {
        self.faults.check(Operation::Begin)?;
        let guard = self.state.clone().lock_owned().await;
        let snapshot = Some(guard.tables.clone());
        Ok(MemoryTx {
            guard,
            snapshot,
            faults: self.faults.clone(),
        })
    }
}

/// Exclusive handle on an [`InMemoryStore`].
///
/// When opened by `begin`, the handle keeps the pre-transaction tables and
/// restores them unless committed.
pub struct MemoryTx {
    guard: OwnedMutexGuard<State>,
    snapshot: Option<Tables>,
    faults: Arc<Faults>,
}

impl MemoryTx {
    fn tables(&mut self) -> &mut Tables {
        &mut self.guard.tables
    }

    fn next_id(&mut self) -> i64 {
        self.guard.next_id += 1;
        self.guard.next_id
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            self.guard.tables = snapshot;
        }
    }
}

#[async_trait]
impl Transactional for MemoryTx {
    async fn commit(mut self) -> Result<()> {
        // A failed commit leaves the snapshot in place, so drop restores it.
        self.faults.check(Operation::Commit)?;
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        let fail = self.faults.rollback.load(Ordering::SeqCst);
        drop(self);
        if fail {
            return Err(StoreError::Database(sqlx::Error::Io(std::io::Error::other(
                "injected rollback failure",
            ))));
        }
        Ok(())
    }
}

#[async_trait]
impl Queries for MemoryTx {
    async fn create_shopping_session(
        &mut self,
        params: CreateShoppingSession,
    ) -> Result<ShoppingSession> {
        if params.total < Decimal::ZERO {
            return Err(StoreError::check_violation(
                "shopping_session_total_check",
                "total must not be negative",
            ));
        }
        let now = Utc::now();
        let session = ShoppingSession {
            id: ShoppingSessionId::new(self.next_id()),
            user_id: params.user_id,
            total: params.total,
            created_at: now,
            updated_at: now,
        };
        self.tables()
            .sessions
            .insert(session.id.as_i64(), session.clone());
        Ok(session)
    }

    async fn get_shopping_session(&mut self, id: ShoppingSessionId) -> Result<ShoppingSession> {
        self.tables()
            .sessions
            .get(&id.as_i64())
            .cloned()
            .ok_or_else(|| StoreError::not_found("shopping_session", id))
    }

    async fn update_shopping_session_total(
        &mut self,
        id: ShoppingSessionId,
        total: Decimal,
    ) -> Result<ShoppingSession> {
        if total < Decimal::ZERO {
            return Err(StoreError::check_violation(
                "shopping_session_total_check",
                "total must not be negative",
            ));
        }
        let session = self
            .tables()
            .sessions
            .get_mut(&id.as_i64())
            .ok_or_else(|| StoreError::not_found("shopping_session", id))?;
        session.total = total;
        session.updated_at = Utc::now();
        Ok(session.clone())
    }

    async fn delete_shopping_session(&mut self, id: ShoppingSessionId) -> Result<()> {
        self.faults.check(Operation::DeleteShoppingSession)?;
        let tables = self.tables();
        if tables.sessions.remove(&id.as_i64()).is_none() {
            return Err(StoreError::not_found("shopping_session", id));
        }
        tables.cart_items.retain(|_, item| item.session_id != id);
        Ok(())
    }

    async fn list_shopping_sessions(&mut self, params: ListParams) -> Result<Vec<ShoppingSession>> {
        Ok(params.window(self.tables().sessions.values().cloned()))
    }

    async fn create_cart_item(&mut self, params: CreateCartItem) -> Result<CartItem> {
        if params.quantity <= 0 {
            return Err(StoreError::check_violation(
                "cart_item_quantity_check",
                "quantity must be positive",
            ));
        }
        if !self
            .tables()
            .sessions
            .contains_key(&params.session_id.as_i64())
        {
            return Err(StoreError::conflict(
                "cart_item_session_id_fkey",
                format!("shopping_session {} does not exist", params.session_id),
            ));
        }
        let now = Utc::now();
        let item = CartItem {
            id: CartItemId::new(self.next_id()),
            session_id: params.session_id,
            product_id: params.product_id,
            quantity: params.quantity,
            created_at: now,
            updated_at: now,
        };
        self.tables().cart_items.insert(item.id.as_i64(), item.clone());
        Ok(item)
    }

    async fn get_cart_item(&mut self, id: CartItemId) -> Result<CartItem> {
        self.tables()
            .cart_items
            .get(&id.as_i64())
            .cloned()
            .ok_or_else(|| StoreError::not_found("cart_item", id))
    }

    async fn list_cart_items_by_session(
        &mut self,
        session_id: ShoppingSessionId,
    ) -> Result<Vec<CartItem>> {
        Ok(self
            .tables()
            .cart_items
            .values()
            .filter(|item| item.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn update_cart_item_quantity(
        &mut self,
        id: CartItemId,
        quantity: i32,
    ) -> Result<CartItem> {
        if quantity <= 0 {
            return Err(StoreError::check_violation(
                "cart_item_quantity_check",
                "quantity must be positive",
            ));
        }
        let item = self
            .tables()
            .cart_items
            .get_mut(&id.as_i64())
            .ok_or_else(|| StoreError::not_found("cart_item", id))?;
        item.quantity = quantity;
        item.updated_at = Utc::now();
        Ok(item.clone())
    }

    async fn delete_cart_item(&mut self, id: CartItemId) -> Result<()> {
        self.faults.check(Operation::DeleteCartItem)?;
        self.tables()
            .cart_items
            .remove(&id.as_i64())
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("cart_item", id))
    }

    async fn list_cart_items(&mut self, params: ListParams) -> Result<Vec<CartItem>> {
        Ok(params.window(self.tables().cart_items.values().cloned()))
    }

    async fn create_product_inventory(
        &mut self,
        params: CreateProductInventory,
    ) -> Result<ProductInventory> {
        if params.quantity < 0 {
            return Err(StoreError::check_violation(
                "product_inventory_quantity_check",
                "quantity must not be negative",
            ));
        }
        if self
            .tables()
            .inventories
            .values()
            .any(|inv| inv.product_id == params.product_id)
        {
            return Err(StoreError::conflict(
                "unique_product_inventory_product",
                format!("inventory for product {} already exists", params.product_id),
            ));
        }
        let now = Utc::now();
        let inventory = ProductInventory {
            id: ProductInventoryId::new(self.next_id()),
            product_id: params.product_id,
            quantity: params.quantity,
            active: true,
            created_at: now,
            updated_at: now,
        };
        self.tables()
            .inventories
            .insert(inventory.id.as_i64(), inventory.clone());
        Ok(inventory)
    }

    async fn get_product_inventory(&mut self, id: ProductInventoryId) -> Result<ProductInventory> {
        self.tables()
            .inventories
            .get(&id.as_i64())
            .cloned()
            .ok_or_else(|| StoreError::not_found("product_inventory", id))
    }

    async fn get_product_inventory_for_update(
        &mut self,
        id: ProductInventoryId,
    ) -> Result<ProductInventory> {
        // The store lock held by this handle already excludes every other writer.
        self.faults.check(Operation::LockProductInventory)?;
        self.get_product_inventory(id).await
    }

    async fn get_product_inventory_by_product(
        &mut self,
        product_id: ProductId,
    ) -> Result<ProductInventory> {
        self.tables()
            .inventories
            .values()
            .find(|inv| inv.product_id == product_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("product_inventory", product_id))
    }

    async fn update_product_inventory(
        &mut self,
        params: UpdateProductInventory,
    ) -> Result<ProductInventory> {
        if params.quantity < 0 {
            return Err(StoreError::check_violation(
                "product_inventory_quantity_check",
                "quantity must not be negative",
            ));
        }
        let inventory = self
            .tables()
            .inventories
            .get_mut(&params.id.as_i64())
            .ok_or_else(|| StoreError::not_found("product_inventory", params.id))?;
        inventory.quantity = params.quantity;
        inventory.active = params.active;
        inventory.updated_at = Utc::now();
        Ok(inventory.clone())
    }

    async fn update_product_quantity(
        &mut self,
        id: ProductInventoryId,
        delta: i32,
    ) -> Result<ProductInventory> {
        self.faults.check(Operation::UpdateProductQuantity)?;
        let inventory = self
            .tables()
            .inventories
            .get_mut(&id.as_i64())
            .ok_or_else(|| StoreError::not_found("product_inventory", id))?;

        match inventory.quantity.checked_add(delta) {
            Some(quantity) if quantity >= 0 => {
                inventory.quantity = quantity;
                inventory.updated_at = Utc::now();
                Ok(inventory.clone())
            }
            _ => Err(StoreError::InsufficientStock {
                inventory_id: id,
                requested: delta.saturating_neg(),
                available: inventory.quantity,
            }),
        }
    }

    async fn delete_product_inventory(&mut self, id: ProductInventoryId) -> Result<()> {
        self.tables()
            .inventories
            .remove(&id.as_i64())
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("product_inventory", id))
    }

    async fn list_product_inventories(
        &mut self,
        params: ListParams,
    ) -> Result<Vec<ProductInventory>> {
        Ok(params.window(self.tables().inventories.values().cloned()))
    }

    async fn create_order_detail(&mut self, params: CreateOrderDetail) -> Result<OrderDetail> {
        self.faults.check(Operation::CreateOrderDetail)?;
        if params.total < Decimal::ZERO {
            return Err(StoreError::check_violation(
                "order_detail_total_check",
                "total must not be negative",
            ));
        }
        let tables = self.tables();
        if !tables.payments.contains_key(&params.payment_id.as_i64()) {
            return Err(StoreError::conflict(
                "order_detail_payment_id_fkey",
                format!("payment_detail {} does not exist", params.payment_id),
            ));
        }
        if tables
            .orders
            .values()
            .any(|order| order.payment_id == Some(params.payment_id))
        {
            return Err(StoreError::conflict(
                "unique_order_detail_payment",
                format!("payment_detail {} is already linked", params.payment_id),
            ));
        }
        let now = Utc::now();
        let order = OrderDetail {
            id: OrderDetailId::new(self.next_id()),
            user_id: params.user_id,
            total: params.total,
            payment_id: Some(params.payment_id),
            created_at: now,
            updated_at: now,
        };
        self.tables().orders.insert(order.id.as_i64(), order.clone());
        Ok(order)
    }

    async fn get_order_detail(&mut self, id: OrderDetailId) -> Result<OrderDetail> {
        self.tables()
            .orders
            .get(&id.as_i64())
            .cloned()
            .ok_or_else(|| StoreError::not_found("order_detail", id))
    }

    async fn delete_order_detail(&mut self, id: OrderDetailId) -> Result<()> {
        let tables = self.tables();
        if tables.orders.remove(&id.as_i64()).is_none() {
            return Err(StoreError::not_found("order_detail", id));
        }
        tables.order_items.retain(|_, item| item.order_id != id);
        for payment in tables.payments.values_mut() {
            if payment.order_id == Some(id) {
                payment.order_id = None;
            }
        }
        Ok(())
    }

    async fn list_order_details_by_user(
        &mut self,
        user_id: UserId,
        params: ListParams,
    ) -> Result<Vec<OrderDetail>> {
        Ok(params.window(
            self.tables()
                .orders
                .values()
                .filter(|order| order.user_id == user_id)
                .cloned(),
        ))
    }

    async fn create_order_item(&mut self, params: CreateOrderItem) -> Result<OrderItem> {
        self.faults.check(Operation::CreateOrderItem)?;
        if params.quantity <= 0 {
            return Err(StoreError::check_violation(
                "order_item_quantity_check",
                "quantity must be positive",
            ));
        }
        if !self.tables().orders.contains_key(&params.order_id.as_i64()) {
            return Err(StoreError::conflict(
                "order_item_order_id_fkey",
                format!("order_detail {} does not exist", params.order_id),
            ));
        }
        let item = OrderItem {
            id: OrderItemId::new(self.next_id()),
            order_id: params.order_id,
            product_id: params.product_id,
            quantity: params.quantity,
            created_at: Utc::now(),
        };
        self.tables()
            .order_items
            .insert(item.id.as_i64(), item.clone());
        Ok(item)
    }

    async fn get_order_item(&mut self, id: OrderItemId) -> Result<OrderItem> {
        self.tables()
            .order_items
            .get(&id.as_i64())
            .cloned()
            .ok_or_else(|| StoreError::not_found("order_item", id))
    }

    async fn list_order_items_by_order(
        &mut self,
        order_id: OrderDetailId,
    ) -> Result<Vec<OrderItem>> {
        Ok(self
            .tables()
            .order_items
            .values()
            .filter(|item| item.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn delete_order_item(&mut self, id: OrderItemId) -> Result<()> {
        self.tables()
            .order_items
            .remove(&id.as_i64())
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("order_item", id))
    }

    async fn list_order_items(&mut self, params: ListParams) -> Result<Vec<OrderItem>> {
        Ok(params.window(self.tables().order_items.values().cloned()))
    }

    async fn create_payment_placeholder(&mut self) -> Result<PaymentDetail> {
        self.faults.check(Operation::CreatePaymentDetail)?;
        let now = Utc::now();
        let payment = PaymentDetail {
            id: PaymentDetailId::new(self.next_id()),
            order_id: None,
            amount: 0,
            provider: PROVIDER_UNKNOWN.to_string(),
            status: PaymentStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.tables()
            .payments
            .insert(payment.id.as_i64(), payment.clone());
        Ok(payment)
    }

    async fn get_payment_detail(&mut self, id: PaymentDetailId) -> Result<PaymentDetail> {
        self.tables()
            .payments
            .get(&id.as_i64())
            .cloned()
            .ok_or_else(|| StoreError::not_found("payment_detail", id))
    }

    async fn finalize_payment_detail(&mut self, params: FinalizePayment) -> Result<PaymentDetail> {
        self.faults.check(Operation::FinalizePaymentDetail)?;
        if params.amount < 0 {
            return Err(StoreError::check_violation(
                "payment_detail_amount_check",
                "amount must not be negative",
            ));
        }
        let tables = self.tables();
        if !tables.orders.contains_key(&params.order_id.as_i64()) {
            return Err(StoreError::conflict(
                "payment_detail_order_id_fkey",
                format!("order_detail {} does not exist", params.order_id),
            ));
        }
        let payment = tables
            .payments
            .get_mut(&params.id.as_i64())
            .ok_or_else(|| StoreError::not_found("payment_detail", params.id))?;

        if payment.status.is_terminal() || !params.status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                payment_id: params.id,
                from: payment.status,
                to: params.status,
            });
        }

        payment.order_id = Some(params.order_id);
        payment.amount = params.amount;
        payment.provider = params.provider;
        payment.status = params.status;
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn delete_payment_detail(&mut self, id: PaymentDetailId) -> Result<()> {
        let tables = self.tables();
        if tables
            .orders
            .values()
            .any(|order| order.payment_id == Some(id))
        {
            return Err(StoreError::conflict(
                "order_detail_payment_id_fkey",
                format!("payment_detail {id} is still referenced by an order"),
            ));
        }
        tables
            .payments
            .remove(&id.as_i64())
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("payment_detail", id))
    }

    async fn list_payment_details(&mut self, params: ListParams) -> Result<Vec<PaymentDetail>> {
        Ok(params.window(self.tables().payments.values().cloned()))
    }
}
