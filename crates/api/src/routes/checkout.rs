//! Checkout endpoint: turns a cart line into a paid order.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use common::{CartItemId, ShoppingSessionId};
use fulfillment::{FulfillPurchase, FulfillmentResult};
use serde::Deserialize;
use store::{Queries, Store};

use crate::AppState;
use crate::auth::AuthenticatedUser;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub session_id: ShoppingSessionId,
    pub cart_item_id: CartItemId,
}

/// POST /checkout: fulfill one cart item of the caller's session.
#[tracing::instrument(
    skip(state, user, req),
    fields(user_id = %user.user_id, session_id = %req.session_id, cart_item_id = %req.cart_item_id)
)]
pub async fn checkout<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthenticatedUser,
    Json(req): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<FulfillmentResult>), ApiError> {
    let purchase = load_purchase(state.fulfillment.store(), &user, &req).await?;

    let result = tokio::time::timeout(
        state.fulfillment_timeout,
        state.fulfillment.fulfill_purchase(purchase),
    )
    .await
    .map_err(|_| {
        tracing::warn!(timeout = ?state.fulfillment_timeout, "checkout timed out");
        ApiError::ServiceUnavailable("Checkout timed out, nothing was charged".to_string())
    })??;

    Ok((StatusCode::CREATED, Json(result)))
}

/// Reads the rows a purchase needs and checks that they belong together.
///
/// The connection is released before returning, so the purchase transaction
/// can start.
async fn load_purchase<S: Store>(
    store: &S,
    user: &AuthenticatedUser,
    req: &CheckoutRequest,
) -> Result<FulfillPurchase, ApiError> {
    let mut conn = store.acquire().await?;

    let session = conn.get_shopping_session(req.session_id).await?;
    if session.user_id != user.user_id {
        return Err(ApiError::Forbidden(format!(
            "Shopping session {} belongs to another user",
            session.id
        )));
    }

    let cart_item = conn.get_cart_item(req.cart_item_id).await?;
    if cart_item.session_id != session.id {
        return Err(ApiError::BadRequest(format!(
            "Cart item {} is not part of shopping session {}",
            cart_item.id, session.id
        )));
    }

    let inventory = conn
        .get_product_inventory_by_product(cart_item.product_id)
        .await?;

    Ok(FulfillPurchase {
        session,
        cart_item,
        inventory,
    })
}
