//! Order history handler.

use std::sync::Arc;

use axum::{Json, extract::State};

use crate::error::Result;
use crate::middleware::RequireAuth;
use crate::models::OrderDetail;
use crate::state::AppState;

/// GET /api/orders
pub async fn index(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
) -> Result<Json<Arc<Vec<OrderDetail>>>> {
    Ok(Json(state.services().orders.list_for_user(user.id).await?))
}
