//! Integration tests for Orchard.
//!
//! Every scenario runs against the in-memory store, so no database or running
//! server is needed.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p orchard-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `cart_concurrency` - Stock clamping under concurrent and partial adds
//! - `checkout_flow` - Order creation, rejection and compensation
//! - `payment_lifecycle` - Payment reconciliation and the lifecycle janitor
//! - `http_api` - Router wiring, auth and webhook signatures

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::sync::Arc;

use axum::Router;
use chrono::{DateTime, Utc};
use orchard_core::{
    CurrencyCode, DeliveryOption, OrderId, PickupId, PrimaryValue, ProductId, ReferenceId, UserId,
    VariantId,
};
use orchard_storefront::config::{CommerceConfig, SupportContact};
use orchard_storefront::db::{MemoryStore, OrderRepository, Repositories};
use orchard_storefront::middleware::create_session_layer;
use orchard_storefront::models::{CurrentUser, NewOrder, NewOrderItem, Product, ProductVariant};
use orchard_storefront::services::webhook::WebhookVerifier;
use orchard_storefront::services::{
    AddOutcome, AddToCart, CheckoutRequest, CommerceError, RateDecision, RateLimiter, Services,
};
use orchard_storefront::state::AppState;
use rust_decimal::Decimal;
use secrecy::SecretString;

/// Secret shared by the test router and signed test callbacks.
pub const WEBHOOK_SECRET: &str = "whsec_integration";

/// Rate limiter that admits every request.
pub struct Unlimited;

impl RateLimiter for Unlimited {
    fn check(&self, _key: &str) -> RateDecision {
        RateDecision {
            allowed: true,
            remaining: u32::MAX,
            retry_after: None,
        }
    }
}

/// Services wired over a fresh in-memory store.
pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub repos: Repositories,
    pub services: Services,
}

impl TestContext {
    /// Context over a store with every primitive available.
    #[must_use]
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    /// Context over a custom store.
    #[must_use]
    pub fn with_store(store: MemoryStore) -> Self {
        let store = Arc::new(store);
        let repos = Repositories::in_memory(&store);
        let services = Services::with_rate_limiter(
            &repos,
            &CommerceConfig::default(),
            SupportContact {
                email: Some("care@orchard.test".to_owned()),
                phone: None,
            },
            Arc::new(Unlimited),
        );
        Self {
            store,
            repos,
            services,
        }
    }

    /// Seed a product; `stock` of `None` means unlimited.
    pub async fn product(&self, id: i32, name: &str, price: Decimal, stock: Option<u32>) {
        self.store
            .add_product(Product::new(ProductId::new(id), name, price).with_stock(stock))
            .await;
    }

    /// Seed a product whose stock lives in attribute entries of one variant.
    pub async fn product_with_entries(
        &self,
        id: i32,
        variant: i32,
        attribute: &str,
        entries: &[(&str, u32)],
    ) {
        self.store
            .add_product(Product::new(ProductId::new(id), "Variant product", Decimal::TEN))
            .await;
        self.store
            .add_variant(ProductVariant::new(
                VariantId::new(variant),
                ProductId::new(id),
                attribute,
                entries
                    .iter()
                    .map(|(value, quantity)| PrimaryValue::new(attribute, *value, *quantity))
                    .collect(),
            ))
            .await;
    }

    /// Add `quantity` units of a product to a user's cart.
    ///
    /// # Errors
    ///
    /// Whatever the cart service returns.
    pub async fn add(
        &self,
        user: i32,
        product: i32,
        quantity: u32,
    ) -> Result<AddOutcome, CommerceError> {
        self.services
            .cart
            .add(UserId::new(user), add_request(product, quantity))
            .await
    }

    /// Total units in a user's cart for one product.
    pub async fn cart_quantity(&self, user: i32, product: i32) -> u32 {
        self.services
            .cart
            .list(UserId::new(user))
            .await
            .unwrap()
            .iter()
            .filter(|item| item.product_id == ProductId::new(product))
            .map(|item| item.quantity)
            .sum()
    }

    /// Insert an order with items directly, as if created at `created_at`.
    pub async fn order_at(
        &self,
        code: &str,
        user: i32,
        created_at: DateTime<Utc>,
        items: &[NewOrderItem],
    ) {
        let order = self
            .store
            .insert_order(&NewOrder {
                id: OrderId::new(format!("ORD-{code}")),
                user_id: Some(UserId::new(user)),
                reference_id: ReferenceId::new(format!("REF-{code}")),
                pickup_id: PickupId::new(format!("PU-{code}")),
                total_amount: items.iter().map(|i| i.total_price).sum(),
                currency: CurrencyCode::USD,
                shipping_address: None,
                delivery_option: DeliveryOption::Pickup,
                payment_method: "online".to_owned(),
                created_at,
            })
            .await
            .unwrap();
        if !items.is_empty() {
            self.store.insert_items(&order.id, items).await.unwrap();
        }
    }

    /// Router over these services, with an in-memory session store and no
    /// API rate limiter.
    #[must_use]
    pub fn router(&self) -> Router {
        let state = AppState::new(
            self.services.clone(),
            &self.repos,
            WebhookVerifier::new(SecretString::from(WEBHOOK_SECRET)),
        );
        let sessions = create_session_layer(
            tower_sessions::MemoryStore::default(),
            "http://localhost:3000",
            &SecretString::from("integration-session-secret-with-enough-length"),
        );
        orchard_storefront::app(state, sessions, None)
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// An add request for the default variant.
#[must_use]
pub fn add_request(product: i32, quantity: u32) -> AddToCart {
    AddToCart {
        product_id: ProductId::new(product),
        variant_id: None,
        variant_attributes: orchard_core::AttributeSelection::empty(),
        quantity,
        unit_price: None,
    }
}

/// A signed-in user.
#[must_use]
pub fn user(id: i32) -> CurrentUser {
    CurrentUser {
        id: UserId::new(id),
        email: format!("user{id}@orchard.test"),
    }
}

/// A pickup checkout paid online.
#[must_use]
pub fn pickup_checkout() -> CheckoutRequest {
    CheckoutRequest {
        shipping_address: None,
        payment_method: "online".to_owned(),
        delivery_option: DeliveryOption::Pickup,
    }
}

/// An order line for the default variant.
#[must_use]
pub fn order_line(
    product: i32,
    quantity: u32,
    attributes: orchard_core::AttributeSelection,
) -> NewOrderItem {
    NewOrderItem {
        product_id: ProductId::new(product),
        product_name: "Item".to_owned(),
        variant_id: orchard_core::VariantKey::default_key(),
        variant_attributes: attributes,
        quantity,
        unit_price: Decimal::TEN,
        total_price: Decimal::TEN * Decimal::from(quantity),
    }
}
