//! HTTP route handlers for the storefront API.
//!
//! # Route Structure
//!
//! ```text
//! GET    /health                          - Liveness
//! GET    /health/ready                    - Readiness (store ping)
//!
//! # Products
//! GET    /api/products/{id}/availability  - Stock level (cached)
//!
//! # Cart (requires auth)
//! GET    /api/cart                        - Current cart
//! DELETE /api/cart                        - Clear cart
//! POST   /api/cart/items                  - Add item (clamped to stock)
//! PATCH  /api/cart/items/{id}             - Set quantity (0 removes)
//! DELETE /api/cart/items/{id}             - Remove item
//! POST   /api/cart/merge                  - Merge a guest cart
//!
//! # Checkout and orders
//! POST   /api/checkout                    - Create order from cart
//! GET    /api/orders                      - Order history (requires auth)
//!
//! # Payments
//! POST   /api/payments/webhook            - Signed payment provider callback
//! ```

pub mod cart;
pub mod checkout;
pub mod health;
pub mod orders;
pub mod payments;
pub mod products;

use axum::{
    Router,
    routing::{get, patch, post},
};

use crate::state::AppState;

/// Health probes. Never rate limited.
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
}

/// JSON API routes.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/products/{id}/availability",
            get(products::availability),
        )
        .route("/api/cart", get(cart::show).delete(cart::clear))
        .route("/api/cart/items", post(cart::add))
        .route(
            "/api/cart/items/{id}",
            patch(cart::update).delete(cart::remove),
        )
        .route("/api/cart/merge", post(cart::merge))
        .route("/api/checkout", post(checkout::create))
        .route("/api/orders", get(orders::index))
        .route("/api/payments/webhook", post(payments::webhook))
}
