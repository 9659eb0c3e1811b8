//! Checkout handler.

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
};

use crate::error::{Result, add_breadcrumb};
use crate::middleware::{OptionalAuth, client_ip};
use crate::models::OrderSummary;
use crate::services::CheckoutRequest;
use crate::state::AppState;

/// Rate-limit key for requests without a resolvable client IP.
const UNKNOWN_CLIENT: &str = "unknown";

/// Create an order from the user's cart.
///
/// POST /api/checkout
///
/// The rate limit is checked before authentication so anonymous floods are
/// throttled too.
///
/// # Errors
///
/// Returns 429, 401, 422, 409 (with per-item stock details) or 500.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    OptionalAuth(user): OptionalAuth,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<OrderSummary>)> {
    let client = client_ip(&headers).map_or_else(|| UNKNOWN_CLIENT.to_string(), |ip| ip.to_string());

    let summary = state
        .services()
        .checkout
        .checkout(&client, user.as_ref(), request)
        .await?;

    add_breadcrumb(
        "checkout",
        "Order created",
        &[
            ("order_id", summary.order_id.as_str()),
            ("reference_id", summary.reference_id.as_str()),
        ],
    );
    Ok((StatusCode::CREATED, Json(summary)))
}
