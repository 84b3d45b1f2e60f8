//! Order lookup endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::OrderDetailId;
use serde::Serialize;
use store::{OrderDetail, OrderItem, PaymentDetail, Queries, Store};

use crate::AppState;
use crate::auth::AuthenticatedUser;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub order: OrderDetail,
    pub items: Vec<OrderItem>,
    pub payment: Option<PaymentDetail>,
}

/// GET /orders/{id}: load an order with its items and payment.
///
/// Orders of other users are reported as missing.
#[tracing::instrument(skip(state, user), fields(user_id = %user.user_id))]
pub async fn get<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let mut conn = state.fulfillment.store().acquire().await?;

    let order = conn.get_order_detail(order_id).await?;
    if order.user_id != user.user_id {
        return Err(ApiError::NotFound(format!("Order {order_id} not found")));
    }

    let items = conn.list_order_items_by_order(order.id).await?;
    let payment = match order.payment_id {
        Some(payment_id) => Some(conn.get_payment_detail(payment_id).await?),
        None => None,
    };

    Ok(Json(OrderResponse {
        order,
        items,
        payment,
    }))
}

fn parse_order_id(id: &str) -> Result<OrderDetailId, ApiError> {
    id.parse::<i64>()
        .map(OrderDetailId::new)
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
