//! Product stock handlers.

use axum::{
    Json,
    extract::{Path, State},
};
use orchard_core::{Availability, ProductId};

use crate::error::Result;
use crate::state::AppState;

/// Current availability of a product.
///
/// GET /api/products/{id}/availability
///
/// # Errors
///
/// Returns 404 for unknown products.
pub async fn availability(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<Availability>> {
    let availability = state
        .services()
        .ledger
        .availability(ProductId::new(id))
        .await?;
    Ok(Json(availability))
}
