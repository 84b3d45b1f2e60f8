//! The purchase workflow.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use store::{
    CartItem, CreateOrderDetail, CreateOrderItem, FinalizePayment, OrderDetail, OrderItem,
    PROVIDER_CASH, PaymentDetail, ProductInventory, Queries, ShoppingSession, Store, StoreExt,
};

use crate::error::{FulfillmentError, Result};

/// Input of one purchase: the checkout being fulfilled, the cart line being
/// bought and the stock row of its product.
///
/// The caller is responsible for checking that the three rows belong
/// together. Only the id of `inventory` is used; the stock level is read
/// again under lock inside the transaction.
#[derive(Debug, Clone)]
pub struct FulfillPurchase {
    pub session: ShoppingSession,
    pub cart_item: CartItem,
    pub inventory: ProductInventory,
}

/// Rows written by a successful purchase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FulfillmentResult {
    pub order_item: OrderItem,
    pub order_detail: OrderDetail,
    pub payment_detail: PaymentDetail,
    pub inventory: ProductInventory,
}

/// Turns shopping sessions into orders.
#[derive(Clone)]
pub struct FulfillmentService<S> {
    store: S,
}

impl<S: Store> FulfillmentService<S> {
    /// Creates a new service over `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Gets a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Converts a cart line into a paid order and consumes the session.
    ///
    /// All writes happen in one transaction: on any error nothing is kept
    /// and the error of the failing step is returned. Concurrent purchases of
    /// the same product serialize on its inventory row, so stock is never
    /// oversold.
    #[tracing::instrument(
        skip(self, purchase),
        fields(
            session_id = %purchase.session.id,
            cart_item_id = %purchase.cart_item.id,
            inventory_id = %purchase.inventory.id,
        )
    )]
    pub async fn fulfill_purchase(&self, purchase: FulfillPurchase) -> Result<FulfillmentResult> {
        let started = Instant::now();

        let result = self
            .store
            .exec_tx(move |tx| Box::pin(purchase_steps(tx, purchase)))
            .await
            .map_err(FulfillmentError::from);

        metrics::histogram!("fulfillment_duration_seconds").record(started.elapsed().as_secs_f64());

        match &result {
            Ok(fulfilled) => {
                metrics::counter!("fulfillments_total", "outcome" => "completed").increment(1);
                tracing::info!(
                    order_id = %fulfilled.order_detail.id,
                    remaining = fulfilled.inventory.quantity,
                    "purchase fulfilled"
                );
            }
            Err(err) => {
                metrics::counter!("fulfillments_total", "outcome" => err.kind()).increment(1);
                tracing::warn!(error = %err, retryable = err.is_retryable(), "purchase failed");
            }
        }

        result
    }
}

/// The purchase steps, in order, against an open transaction.
async fn purchase_steps<Q>(
    tx: &mut Q,
    purchase: FulfillPurchase,
) -> store::Result<FulfillmentResult>
where
    Q: Queries + ?Sized,
{
    let FulfillPurchase {
        session,
        cart_item,
        inventory,
    } = purchase;

    // The order does not exist yet, so the payment starts unlinked.
    let placeholder = tx.create_payment_placeholder().await?;

    let order_detail = tx
        .create_order_detail(CreateOrderDetail {
            user_id: session.user_id,
            total: session.total,
            payment_id: placeholder.id,
        })
        .await?;

    let order_item = tx
        .create_order_item(CreateOrderItem {
            order_id: order_detail.id,
            product_id: cart_item.product_id,
            quantity: cart_item.quantity,
        })
        .await?;

    let payment_detail = tx
        .finalize_payment_detail(FinalizePayment::finished(
            placeholder.id,
            order_detail.id,
            order_item.quantity,
            PROVIDER_CASH,
        ))
        .await?;

    let locked = tx.get_product_inventory_for_update(inventory.id).await?;
    tracing::debug!(available = locked.quantity, requested = order_item.quantity, "inventory locked");
    let inventory = tx
        .update_product_quantity(locked.id, -order_item.quantity)
        .await?;

    tx.delete_cart_item(cart_item.id).await?;
    tx.delete_shopping_session(session.id).await?;

    Ok(FulfillmentResult {
        order_item,
        order_detail,
        payment_detail,
        inventory,
    })
}
