use std::ops::DerefMut;

use async_trait::async_trait;
use common::{
    CartItemId, OrderDetailId, OrderItemId, PaymentDetailId, ProductId, ProductInventoryId,
    ShoppingSessionId, UserId,
};
use rust_decimal::Decimal;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};

use crate::models::{
    CartItem, CreateCartItem, CreateOrderDetail, CreateOrderItem, CreateProductInventory,
    CreateShoppingSession, FinalizePayment, OrderDetail, OrderItem, PROVIDER_UNKNOWN,
    PaymentDetail, PaymentStatus, ProductInventory, ShoppingSession, UpdateProductInventory,
};
use crate::store::{Queries, Store, Transactional};
use crate::{ListParams, Result, StoreError};

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a new pool to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    type Conn = PgQueries<PoolConnection<Postgres>>;
    type Tx = PgQueries<Transaction<'static, Postgres>>;

    async fn acquire(&self) -> Result<Self::Conn> {
        Ok(PgQueries::new(self.pool.acquire().await?))
    }

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(PgQueries::new(self.pool.begin().await?))
    }
}

/// Accessor set over a pooled connection or an open transaction.
pub struct PgQueries<C> {
    conn: C,
}

impl<C> PgQueries<C>
where
    C: DerefMut<Target = PgConnection> + Send,
{
    pub fn new(conn: C) -> Self {
        Self { conn }
    }

    fn row_to_session(row: PgRow) -> Result<ShoppingSession> {
        Ok(ShoppingSession {
            id: ShoppingSessionId::new(row.try_get("id")?),
            user_id: UserId::new(row.try_get("user_id")?),
            total: row.try_get("total")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_cart_item(row: PgRow) -> Result<CartItem> {
        Ok(CartItem {
            id: CartItemId::new(row.try_get("id")?),
            session_id: ShoppingSessionId::new(row.try_get("session_id")?),
            product_id: ProductId::new(row.try_get("product_id")?),
            quantity: row.try_get("quantity")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_inventory(row: PgRow) -> Result<ProductInventory> {
        Ok(ProductInventory {
            id: ProductInventoryId::new(row.try_get("id")?),
            product_id: ProductId::new(row.try_get("product_id")?),
            quantity: row.try_get("quantity")?,
            active: row.try_get("active")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_order(row: PgRow) -> Result<OrderDetail> {
        Ok(OrderDetail {
            id: OrderDetailId::new(row.try_get("id")?),
            user_id: UserId::new(row.try_get("user_id")?),
            total: row.try_get("total")?,
            payment_id: row
                .try_get::<Option<i64>, _>("payment_id")?
                .map(PaymentDetailId::new),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_order_item(row: PgRow) -> Result<OrderItem> {
        Ok(OrderItem {
            id: OrderItemId::new(row.try_get("id")?),
            order_id: OrderDetailId::new(row.try_get("order_id")?),
            product_id: ProductId::new(row.try_get("product_id")?),
            quantity: row.try_get("quantity")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_payment(row: PgRow) -> Result<PaymentDetail> {
        let status: String = row.try_get("status")?;
        let status = status
            .parse::<PaymentStatus>()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

        Ok(PaymentDetail {
            id: PaymentDetailId::new(row.try_get("id")?),
            order_id: row
                .try_get::<Option<i64>, _>("order_id")?
                .map(OrderDetailId::new),
            amount: row.try_get("amount")?,
            provider: row.try_get("provider")?,
            status,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn delete_by_id(&mut self, sql: &str, entity: &'static str, id: i64) -> Result<()> {
        let result = sqlx::query(sql)
            .bind(id)
            .execute(&mut *self.conn)
            .await
            .map_err(StoreError::from_database)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(entity, id));
        }
        Ok(())
    }
}

#[async_trait]
impl Transactional for PgQueries<Transaction<'static, Postgres>> {
    async fn commit(self) -> Result<()> {
        self.conn.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.conn.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl<C> Queries for PgQueries<C>
where
    C: DerefMut<Target = PgConnection> + Send,
{
    async fn create_shopping_session(
        &mut self,
        params: CreateShoppingSession,
    ) -> Result<ShoppingSession> {
        let row = sqlx::query(
            r#"
            INSERT INTO shopping_session (user_id, total)
            VALUES ($1, $2)
            RETURNING id, user_id, total, created_at, updated_at
            "#,
        )
        .bind(params.user_id.as_i64())
        .bind(params.total)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(StoreError::from_database)?;

        Self::row_to_session(row)
    }

    async fn get_shopping_session(&mut self, id: ShoppingSessionId) -> Result<ShoppingSession> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT id, user_id, total, created_at, updated_at
            FROM shopping_session
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&mut *self.conn)
        .await?;

        match row {
            Some(row) => Self::row_to_session(row),
            None => Err(StoreError::not_found("shopping_session", id)),
        }
    }

    async fn update_shopping_session_total(
        &mut self,
        id: ShoppingSessionId,
        total: Decimal,
    ) -> Result<ShoppingSession> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            UPDATE shopping_session
            SET total = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, user_id, total, created_at, updated_at
            "#,
        )
        .bind(id.as_i64())
        .bind(total)
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(StoreError::from_database)?;

        match row {
            Some(row) => Self::row_to_session(row),
            None => Err(StoreError::not_found("shopping_session", id)),
        }
    }

    async fn delete_shopping_session(&mut self, id: ShoppingSessionId) -> Result<()> {
        self.delete_by_id(
            "DELETE FROM shopping_session WHERE id = $1",
            "shopping_session",
            id.as_i64(),
        )
        .await
    }

    async fn list_shopping_sessions(&mut self, params: ListParams) -> Result<Vec<ShoppingSession>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, total, created_at, updated_at
            FROM shopping_session
            ORDER BY id
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(params.limit)
        .bind(params.offset)
        .fetch_all(&mut *self.conn)
        .await?;

        rows.into_iter().map(Self::row_to_session).collect()
    }

    async fn create_cart_item(&mut self, params: CreateCartItem) -> Result<CartItem> {
        let row = sqlx::query(
            r#"
            INSERT INTO cart_item (session_id, product_id, quantity)
            VALUES ($1, $2, $3)
            RETURNING id, session_id, product_id, quantity, created_at, updated_at
            "#,
        )
        .bind(params.session_id.as_i64())
        .bind(params.product_id.as_i64())
        .bind(params.quantity)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(StoreError::from_database)?;

        Self::row_to_cart_item(row)
    }

    async fn get_cart_item(&mut self, id: CartItemId) -> Result<CartItem> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT id, session_id, product_id, quantity, created_at, updated_at
            FROM cart_item
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&mut *self.conn)
        .await?;

        match row {
            Some(row) => Self::row_to_cart_item(row),
            None => Err(StoreError::not_found("cart_item", id)),
        }
    }

    async fn list_cart_items_by_session(
        &mut self,
        session_id: ShoppingSessionId,
    ) -> Result<Vec<CartItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, session_id, product_id, quantity, created_at, updated_at
            FROM cart_item
            WHERE session_id = $1
            ORDER BY id
            "#,
        )
        .bind(session_id.as_i64())
        .fetch_all(&mut *self.conn)
        .await?;

        rows.into_iter().map(Self::row_to_cart_item).collect()
    }

    async fn update_cart_item_quantity(
        &mut self,
        id: CartItemId,
        quantity: i32,
    ) -> Result<CartItem> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            UPDATE cart_item
            SET quantity = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, session_id, product_id, quantity, created_at, updated_at
            "#,
        )
        .bind(id.as_i64())
        .bind(quantity)
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(StoreError::from_database)?;

        match row {
            Some(row) => Self::row_to_cart_item(row),
            None => Err(StoreError::not_found("cart_item", id)),
        }
    }

    async fn delete_cart_item(&mut self, id: CartItemId) -> Result<()> {
        self.delete_by_id(
            "DELETE FROM cart_item WHERE id = $1",
            "cart_item",
            id.as_i64(),
        )
        .await
    }

    async fn list_cart_items(&mut self, params: ListParams) -> Result<Vec<CartItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, session_id, product_id, quantity, created_at, updated_at
            FROM cart_item
            ORDER BY id
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(params.limit)
        .bind(params.offset)
        .fetch_all(&mut *self.conn)
        .await?;

        rows.into_iter().map(Self::row_to_cart_item).collect()
    }

    async fn create_product_inventory(
        &mut self,
        params: CreateProductInventory,
    ) -> Result<ProductInventory> {
        let row = sqlx::query(
            r#"
            INSERT INTO product_inventory (product_id, quantity)
            VALUES ($1, $2)
            RETURNING id, product_id, quantity, active, created_at, updated_at
            "#,
        )
        .bind(params.product_id.as_i64())
        .bind(params.quantity)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(StoreError::from_database)?;

        Self::row_to_inventory(row)
    }

    async fn get_product_inventory(&mut self, id: ProductInventoryId) -> Result<ProductInventory> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT id, product_id, quantity, active, created_at, updated_at
            FROM product_inventory
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&mut *self.conn)
        .await?;

        match row {
            Some(row) => Self::row_to_inventory(row),
            None => Err(StoreError::not_found("product_inventory", id)),
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_product_inventory_for_update(
        &mut self,
        id: ProductInventoryId,
    ) -> Result<ProductInventory> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT id, product_id, quantity, active, created_at, updated_at
            FROM product_inventory
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&mut *self.conn)
        .await?;

        match row {
            Some(row) => Self::row_to_inventory(row),
            None => Err(StoreError::not_found("product_inventory", id)),
        }
    }

    async fn get_product_inventory_by_product(
        &mut self,
        product_id: ProductId,
    ) -> Result<ProductInventory> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT id, product_id, quantity, active, created_at, updated_at
            FROM product_inventory
            WHERE product_id = $1
            "#,
        )
        .bind(product_id.as_i64())
        .fetch_optional(&mut *self.conn)
        .await?;

        match row {
            Some(row) => Self::row_to_inventory(row),
            None => Err(StoreError::not_found("product_inventory", product_id)),
        }
    }

    async fn update_product_inventory(
        &mut self,
        params: UpdateProductInventory,
    ) -> Result<ProductInventory> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            UPDATE product_inventory
            SET quantity = $2, active = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING id, product_id, quantity, active, created_at, updated_at
            "#,
        )
        .bind(params.id.as_i64())
        .bind(params.quantity)
        .bind(params.active)
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(StoreError::from_database)?;

        match row {
            Some(row) => Self::row_to_inventory(row),
            None => Err(StoreError::not_found("product_inventory", params.id)),
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn update_product_quantity(
        &mut self,
        id: ProductInventoryId,
        delta: i32,
    ) -> Result<ProductInventory> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            UPDATE product_inventory
            SET quantity = quantity + $2, updated_at = NOW()
            WHERE id = $1 AND quantity + $2 >= 0
            RETURNING id, product_id, quantity, active, created_at, updated_at
            "#,
        )
        .bind(id.as_i64())
        .bind(delta)
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(StoreError::from_database)?;

        match row {
            Some(row) => Self::row_to_inventory(row),
            None => {
                // Either the row is gone or the guard rejected the delta.
                let current = self.get_product_inventory(id).await?;
                Err(StoreError::InsufficientStock {
                    inventory_id: id,
                    requested: delta.saturating_neg(),
                    available: current.quantity,
                })
            }
        }
    }

    async fn delete_product_inventory(&mut self, id: ProductInventoryId) -> Result<()> {
        self.delete_by_id(
            "DELETE FROM product_inventory WHERE id = $1",
            "product_inventory",
            id.as_i64(),
        )
        .await
    }

    async fn list_product_inventories(
        &mut self,
        params: ListParams,
    ) -> Result<Vec<ProductInventory>> {
        let rows = sqlx::query(
            r#"
            SELECT id, product_id, quantity, active, created_at, updated_at
            FROM product_inventory
            ORDER BY id
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(params.limit)
        .bind(params.offset)
        .fetch_all(&mut *self.conn)
        .await?;

        rows.into_iter().map(Self::row_to_inventory).collect()
    }

    async fn create_order_detail(&mut self, params: CreateOrderDetail) -> Result<OrderDetail> {
        let row = sqlx::query(
            r#"
            INSERT INTO order_detail (user_id, total, payment_id)
            VALUES ($1, $2, $3)
            RETURNING id, user_id, total, payment_id, created_at, updated_at
            "#,
        )
        .bind(params.user_id.as_i64())
        .bind(params.total)
        .bind(params.payment_id.as_i64())
        .fetch_one(&mut *self.conn)
        .await
        .map_err(StoreError::from_database)?;

        Self::row_to_order(row)
    }

    async fn get_order_detail(&mut self, id: OrderDetailId) -> Result<OrderDetail> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT id, user_id, total, payment_id, created_at, updated_at
            FROM order_detail
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&mut *self.conn)
        .await?;

        match row {
            Some(row) => Self::row_to_order(row),
            None => Err(StoreError::not_found("order_detail", id)),
        }
    }

    async fn delete_order_detail(&mut self, id: OrderDetailId) -> Result<()> {
        self.delete_by_id(
            "DELETE FROM order_detail WHERE id = $1",
            "order_detail",
            id.as_i64(),
        )
        .await
    }

    async fn list_order_details_by_user(
        &mut self,
        user_id: UserId,
        params: ListParams,
    ) -> Result<Vec<OrderDetail>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, total, payment_id, created_at, updated_at
            FROM order_detail
            WHERE user_id = $1
            ORDER BY id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id.as_i64())
        .bind(params.limit)
        .bind(params.offset)
        .fetch_all(&mut *self.conn)
        .await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }

    async fn create_order_item(&mut self, params: CreateOrderItem) -> Result<OrderItem> {
        let row = sqlx::query(
            r#"
            INSERT INTO order_item (order_id, product_id, quantity)
            VALUES ($1, $2, $3)
            RETURNING id, order_id, product_id, quantity, created_at
            "#,
        )
        .bind(params.order_id.as_i64())
        .bind(params.product_id.as_i64())
        .bind(params.quantity)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(StoreError::from_database)?;

        Self::row_to_order_item(row)
    }

    async fn get_order_item(&mut self, id: OrderItemId) -> Result<OrderItem> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT id, order_id, product_id, quantity, created_at
            FROM order_item
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&mut *self.conn)
        .await?;

        match row {
            Some(row) => Self::row_to_order_item(row),
            None => Err(StoreError::not_found("order_item", id)),
        }
    }

    async fn list_order_items_by_order(
        &mut self,
        order_id: OrderDetailId,
    ) -> Result<Vec<OrderItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, product_id, quantity, created_at
            FROM order_item
            WHERE order_id = $1
            ORDER BY id
            "#,
        )
        .bind(order_id.as_i64())
        .fetch_all(&mut *self.conn)
        .await?;

        rows.into_iter().map(Self::row_to_order_item).collect()
    }

    async fn delete_order_item(&mut self, id: OrderItemId) -> Result<()> {
        self.delete_by_id(
            "DELETE FROM order_item WHERE id = $1",
            "order_item",
            id.as_i64(),
        )
        .await
    }

    async fn list_order_items(&mut self, params: ListParams) -> Result<Vec<OrderItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, product_id, quantity, created_at
            FROM order_item
            ORDER BY id
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(params.limit)
        .bind(params.offset)
        .fetch_all(&mut *self.conn)
        .await?;

        rows.into_iter().map(Self::row_to_order_item).collect()
    }

    async fn create_payment_placeholder(&mut self) -> Result<PaymentDetail> {
        let row = sqlx::query(
            r#"
            INSERT INTO payment_detail (amount, provider, status)
            VALUES (0, $1, $2)
            RETURNING id, order_id, amount, provider, status, created_at, updated_at
            "#,
        )
        .bind(PROVIDER_UNKNOWN)
        .bind(PaymentStatus::Pending.as_str())
        .fetch_one(&mut *self.conn)
        .await
        .map_err(StoreError::from_database)?;

        Self::row_to_payment(row)
    }

    async fn get_payment_detail(&mut self, id: PaymentDetailId) -> Result<PaymentDetail> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT id, order_id, amount, provider, status, created_at, updated_at
            FROM payment_detail
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&mut *self.conn)
        .await?;

        match row {
            Some(row) => Self::row_to_payment(row),
            None => Err(StoreError::not_found("payment_detail", id)),
        }
    }

    async fn finalize_payment_detail(&mut self, params: FinalizePayment) -> Result<PaymentDetail> {
        if !params.status.is_terminal() {
            let current = self.get_payment_detail(params.id).await?;
            return Err(StoreError::InvalidTransition {
                payment_id: params.id,
                from: current.status,
                to: params.status,
            });
        }

        let row: Option<PgRow> = sqlx::query(
            r#"
            UPDATE payment_detail
            SET order_id = $2, amount = $3, provider = $4, status = $5, updated_at = NOW()
            WHERE id = $1 AND status = $6
            RETURNING id, order_id, amount, provider, status, created_at, updated_at
            "#,
        )
        .bind(params.id.as_i64())
        .bind(params.order_id.as_i64())
        .bind(params.amount)
        .bind(&params.provider)
        .bind(params.status.as_str())
        .bind(PaymentStatus::Pending.as_str())
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(StoreError::from_database)?;

        match row {
            Some(row) => Self::row_to_payment(row),
            None => {
                let current = self.get_payment_detail(params.id).await?;
                Err(StoreError::InvalidTransition {
                    payment_id: params.id,
                    from: current.status,
                    to: params.status,
                })
            }
        }
    }

    async fn delete_payment_detail(&mut self, id: PaymentDetailId) -> Result<()> {
        self.delete_by_id(
            "DELETE FROM payment_detail WHERE id = $1",
            "payment_detail",
            id.as_i64(),
        )
        .await
    }

    async fn list_payment_details(&mut self, params: ListParams) -> Result<Vec<PaymentDetail>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, amount, provider, status, created_at, updated_at
            FROM payment_detail
            ORDER BY id
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(params.limit)
        .bind(params.offset)
        .fetch_all(&mut *self.conn)
        .await?;

        rows.into_iter().map(Self::row_to_payment).collect()
    }
}
