//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use sqlx::PgPool;
use store::{
    CartItemId, CreateCartItem, CreateOrderDetail, CreateOrderItem, CreateProductInventory,
    CreateShoppingSession, FinalizePayment, ListParams, OrderDetailId, PROVIDER_CASH,
    PROVIDER_UNKNOWN, PaymentStatus, PostgresStore, ProductId, Queries, ShoppingSessionId, Store,
    StoreError, StoreExt, Transactional, UpdateProductInventory, UserId,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_fulfillment_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE order_item, order_detail, payment_detail, cart_item, \
         shopping_session, product_inventory RESTART IDENTITY CASCADE",
    )
    .execute(&pool)
    .await
    .unwrap();

    PostgresStore::new(pool)
}

#[tokio::test]
async fn session_and_cart_round_trip() {
    let store = get_test_store().await;
    let mut conn = store.acquire().await.unwrap();

    let session = conn
        .create_shopping_session(CreateShoppingSession {
            user_id: UserId::new(7),
            total: Decimal::new(2999, 2),
        })
        .await
        .unwrap();
    assert_eq!(session.total, Decimal::new(2999, 2));

    let item = conn
        .create_cart_item(CreateCartItem {
            session_id: session.id,
            product_id: ProductId::new(3),
            quantity: 2,
        })
        .await
        .unwrap();

    assert_eq!(conn.get_shopping_session(session.id).await.unwrap(), session);
    assert_eq!(conn.get_cart_item(item.id).await.unwrap(), item);
    assert_eq!(
        conn.list_cart_items_by_session(session.id).await.unwrap(),
        vec![item.clone()]
    );

    let updated = conn.update_cart_item_quantity(item.id, 4).await.unwrap();
    assert_eq!(updated.quantity, 4);

    conn.delete_shopping_session(session.id).await.unwrap();
    assert!(conn.get_cart_item(item.id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn missing_rows_are_not_found() {
    let store = get_test_store().await;
    let mut conn = store.acquire().await.unwrap();

    let err = conn
        .get_order_detail(OrderDetailId::new(999))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::NotFound {
            entity: "order_detail",
            id: 999
        }
    ));

    let err = conn
        .delete_cart_item(CartItemId::new(999))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn constraint_violations_are_classified() {
    let store = get_test_store().await;
    let mut conn = store.acquire().await.unwrap();

    let err = conn
        .create_cart_item(CreateCartItem {
            session_id: ShoppingSessionId::new(404),
            product_id: ProductId::new(1),
            quantity: 1,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict { ref constraint, .. } if constraint == "cart_item_session_id_fkey"));

    conn.create_product_inventory(CreateProductInventory {
        product_id: ProductId::new(1),
        quantity: 1,
    })
    .await
    .unwrap();
    let err = conn
        .create_product_inventory(CreateProductInventory {
            product_id: ProductId::new(1),
            quantity: 1,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict { ref constraint, .. } if constraint == "unique_product_inventory_product"));

    let err = conn
        .create_product_inventory(CreateProductInventory {
            product_id: ProductId::new(2),
            quantity: -1,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::CheckViolation { .. }));
}

#[tokio::test]
async fn update_product_quantity_is_guarded() {
    let store = get_test_store().await;
    let mut conn = store.acquire().await.unwrap();

    let inventory = conn
        .create_product_inventory(CreateProductInventory {
            product_id: ProductId::new(5),
            quantity: 5,
        })
        .await
        .unwrap();

    let after = conn.update_product_quantity(inventory.id, -2).await.unwrap();
    assert_eq!(after.quantity, 3);

    let err = conn
        .update_product_quantity(inventory.id, -4)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::InsufficientStock {
            requested: 4,
            available: 3,
            ..
        }
    ));

    let restocked = conn.update_product_quantity(inventory.id, 10).await.unwrap();
    assert_eq!(restocked.quantity, 13);

    let deactivated = conn
        .update_product_inventory(UpdateProductInventory {
            id: inventory.id,
            quantity: 0,
            active: false,
        })
        .await
        .unwrap();
    assert_eq!(deactivated.quantity, 0);
    assert!(!deactivated.active);

    let by_product = conn
        .get_product_inventory_by_product(ProductId::new(5))
        .await
        .unwrap();
    assert_eq!(by_product, deactivated);
}

#[tokio::test]
async fn payment_placeholder_is_finalized_once() {
    let store = get_test_store().await;
    let mut conn = store.acquire().await.unwrap();

    let payment = conn.create_payment_placeholder().await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.provider, PROVIDER_UNKNOWN);
    assert_eq!(payment.amount, 0);
    assert_eq!(payment.order_id, None);

    let order = conn
        .create_order_detail(CreateOrderDetail {
            user_id: UserId::new(1),
            total: Decimal::new(5998, 2),
            payment_id: payment.id,
        })
        .await
        .unwrap();
    assert_eq!(order.payment_id, Some(payment.id));

    let finished = conn
        .finalize_payment_detail(FinalizePayment::finished(
            payment.id,
            order.id,
            2,
            PROVIDER_CASH,
        ))
        .await
        .unwrap();
    assert_eq!(finished.status, PaymentStatus::Finished);
    assert_eq!(finished.order_id, Some(order.id));
    assert_eq!(finished.amount, 2);

    let err = conn
        .finalize_payment_detail(FinalizePayment::failed(payment.id, order.id, PROVIDER_CASH))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidTransition { .. }));

    let err = conn
        .create_order_detail(CreateOrderDetail {
            user_id: UserId::new(1),
            total: Decimal::ZERO,
            payment_id: payment.id,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict { ref constraint, .. } if constraint == "unique_order_detail_payment"));
}

#[tokio::test]
async fn order_items_and_listing() {
    let store = get_test_store().await;
    let mut conn = store.acquire().await.unwrap();

    for user in [1, 2, 1] {
        let payment = conn.create_payment_placeholder().await.unwrap();
        let order = conn
            .create_order_detail(CreateOrderDetail {
                user_id: UserId::new(user),
                total: Decimal::new(100, 2),
                payment_id: payment.id,
            })
            .await
            .unwrap();
        conn.create_order_item(CreateOrderItem {
            order_id: order.id,
            product_id: ProductId::new(9),
            quantity: 1,
        })
        .await
        .unwrap();
    }

    let orders = conn
        .list_order_details_by_user(UserId::new(1), ListParams::default())
        .await
        .unwrap();
    assert_eq!(orders.len(), 2);
    assert!(orders[0].id < orders[1].id);

    let second_page = conn
        .list_order_details_by_user(UserId::new(1), ListParams::new(1, 1))
        .await
        .unwrap();
    assert_eq!(second_page, vec![orders[1].clone()]);

    let items = conn.list_order_items_by_order(orders[0].id).await.unwrap();
    assert_eq!(items.len(), 1);

    conn.delete_order_detail(orders[0].id).await.unwrap();
    assert!(
        conn.get_order_item(items[0].id)
            .await
            .unwrap_err()
            .is_not_found()
    );
    assert_eq!(conn.list_order_items(ListParams::default()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn exec_tx_rolls_back_every_write_on_error() {
    let store = get_test_store().await;
    let session = {
        let mut conn = store.acquire().await.unwrap();
        conn.create_shopping_session(CreateShoppingSession {
            user_id: UserId::new(1),
            total: Decimal::ZERO,
        })
        .await
        .unwrap()
    };
    let session_id = session.id;

    let err = store
        .exec_tx(|tx| {
            Box::pin(async move {
                tx.create_payment_placeholder().await?;
                tx.delete_shopping_session(session_id).await?;
                tx.get_cart_item(CartItemId::new(404)).await?;
                Ok(())
            })
        })
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let mut conn = store.acquire().await.unwrap();
    assert!(conn.get_shopping_session(session_id).await.is_ok());
    assert!(
        conn.list_payment_details(ListParams::default())
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn exec_tx_commits_on_success() {
    let store = get_test_store().await;

    let payment = store
        .exec_tx(|tx| Box::pin(async move { tx.create_payment_placeholder().await }))
        .await
        .unwrap();

    let mut conn = store.acquire().await.unwrap();
    assert_eq!(conn.get_payment_detail(payment.id).await.unwrap(), payment);
}

#[tokio::test]
async fn cancelled_transaction_leaves_no_trace() {
    let store = get_test_store().await;

    let result = tokio::time::timeout(
        Duration::from_millis(200),
        store.exec_tx(|tx| {
            Box::pin(async move {
                tx.create_payment_placeholder().await?;
                std::future::pending::<()>().await;
                Ok(())
            })
        }),
    )
    .await;
    assert!(result.is_err());

    let mut conn = store.acquire().await.unwrap();
    assert!(
        conn.list_payment_details(ListParams::default())
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn row_lock_serializes_concurrent_writers() {
    let store = get_test_store().await;
    let inventory = {
        let mut conn = store.acquire().await.unwrap();
        conn.create_product_inventory(CreateProductInventory {
            product_id: ProductId::new(1),
            quantity: 5,
        })
        .await
        .unwrap()
    };

    let mut first = store.begin().await.unwrap();
    let locked = first
        .get_product_inventory_for_update(inventory.id)
        .await
        .unwrap();
    assert_eq!(locked.quantity, 5);

    let contender = {
        let store = store.clone();
        let id = inventory.id;
        tokio::spawn(async move {
            let mut second = store.begin().await.unwrap();
            let seen = second.get_product_inventory_for_update(id).await.unwrap();
            second.commit().await.unwrap();
            seen.quantity
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!contender.is_finished());

    first
        .update_product_quantity(inventory.id, -3)
        .await
        .unwrap();
    first.commit().await.unwrap();

    assert_eq!(contender.await.unwrap(), 2);
}
