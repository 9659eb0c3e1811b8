//! Cart handlers.
//!
//! All cart routes act on the authenticated user's cart.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use orchard_core::CartItemId;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::middleware::RequireAuth;
use crate::models::CartItem;
use crate::services::{AddOutcome, AddToCart, GuestCartLine, MergeOutcome};
use crate::state::AppState;

/// Body for a quantity change.
#[derive(Debug, Deserialize)]
pub struct UpdateQuantity {
    pub quantity: u32,
}

/// Body for a guest cart merge.
#[derive(Debug, Deserialize)]
pub struct MergeRequest {
    pub items: Vec<GuestCartLine>,
}

/// Result of a line update.
#[derive(Debug, Serialize)]
pub struct UpdateResponse {
    /// `None` when the line was removed.
    pub item: Option<CartItem>,
}

/// Result of clearing the cart.
#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub removed: u64,
}

/// GET /api/cart
pub async fn show(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
) -> Result<Json<Arc<Vec<CartItem>>>> {
    Ok(Json(state.services().cart.list(user.id).await?))
}

/// Add an item, clamped to available stock.
///
/// POST /api/cart/items
///
/// # Errors
///
/// Returns 409 when nothing can be added and 404 for unknown products.
pub async fn add(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Json(request): Json<AddToCart>,
) -> Result<(StatusCode, Json<AddOutcome>)> {
    let outcome = state.services().cart.add(user.id, request).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// PATCH /api/cart/items/{id}
pub async fn update(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Path(id): Path<i32>,
    Json(body): Json<UpdateQuantity>,
) -> Result<Json<UpdateResponse>> {
    let item = state
        .services()
        .cart
        .update_quantity(user.id, CartItemId::new(id), body.quantity)
        .await?;
    Ok(Json(UpdateResponse { item }))
}

/// DELETE /api/cart/items/{id}
pub async fn remove(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Path(id): Path<i32>,
) -> Result<StatusCode> {
    state
        .services()
        .cart
        .remove(user.id, CartItemId::new(id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/cart
pub async fn clear(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
) -> Result<Json<ClearResponse>> {
    let removed = state.services().cart.clear(user.id, None).await?;
    Ok(Json(ClearResponse { removed }))
}

/// Merge a guest cart; conflicting lines are reported, not fatal.
///
/// POST /api/cart/merge
pub async fn merge(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Json(body): Json<MergeRequest>,
) -> Result<Json<MergeOutcome>> {
    Ok(Json(state.services().cart.merge(user.id, body.items).await?))
}
