//! Checkout coordinator.
//!
//! One attempt runs `validating -> creating_order -> creating_items ->
//! clearing_cart -> done`. Everything up to `creating_order` is free of side
//! effects. If the items cannot be written the just-created order is deleted
//! before the error is surfaced, so an order never exists without items. Cart
//! clearing and cache eviction happen after the order is valid and their
//! failures are only logged.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use orchard_core::{
    CurrencyCode, DeliveryOption, OrderId, PaymentMethod, PickupId, ProductId, ReferenceId,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{error, info, instrument, warn};
use validator::Validate;

use super::CommerceError;
use super::cache::{CacheKey, ReadCache};
use super::inventory::StockLedger;
use super::rate_limit::RateLimiter;
use super::validator::{StockRequest, StockValidator};
use crate::config::CommerceConfig;
use crate::db::{CartRepository, OrderRepository, Repositories, RepositoryError};
use crate::models::{
    CartItem, CurrentUser, NewOrder, NewOrderItem, OrderSummary, ShippingAddress,
    ShippingAddressInput,
};

/// Checkout input.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    #[serde(default)]
    pub shipping_address: Option<ShippingAddressInput>,
    pub payment_method: String,
    #[serde(default)]
    pub delivery_option: DeliveryOption,
}

/// Orchestrates order creation from a user's cart.
#[derive(Clone)]
pub struct CheckoutCoordinator {
    carts: Arc<dyn CartRepository>,
    orders: Arc<dyn OrderRepository>,
    ledger: StockLedger,
    validator: StockValidator,
    cache: ReadCache,
    rate_limiter: Arc<dyn RateLimiter>,
    currency: CurrencyCode,
    max_order_total: Decimal,
}

impl CheckoutCoordinator {
    /// Create a coordinator.
    #[must_use]
    pub fn new(
        repos: &Repositories,
        ledger: StockLedger,
        validator: StockValidator,
        cache: ReadCache,
        rate_limiter: Arc<dyn RateLimiter>,
        config: &CommerceConfig,
    ) -> Self {
        Self {
            carts: Arc::clone(&repos.carts),
            orders: Arc::clone(&repos.orders),
            ledger,
            validator,
            cache,
            rate_limiter,
            currency: config.currency,
            max_order_total: config.max_order_total,
        }
    }

    /// Turn the user's cart into a pending order.
    ///
    /// `client_key` identifies the caller for rate limiting (normally the
    /// client IP).
    ///
    /// # Errors
    ///
    /// - `RateLimited` when the client is over budget
    /// - `Unauthenticated` without a user
    /// - `Validation` for bad address, payment method, empty cart or total
    /// - `StockConflict` listing every line that cannot be supplied
    /// - `Repository(Unavailable)` when stock could not be read; no line is
    ///   reported as out of stock in that case
    /// - `OrderCreationFailed` when the order or its items cannot be stored
    #[instrument(skip(self, user, request), fields(client = %client_key, user_id))]
    pub async fn checkout(
        &self,
        client_key: &str,
        user: Option<&CurrentUser>,
        request: CheckoutRequest,
    ) -> Result<OrderSummary, CommerceError> {
        // validating
        let decision = self.rate_limiter.check(client_key);
        if !decision.allowed {
            warn!("Checkout rate limited");
            return Err(CommerceError::RateLimited {
                retry_after_secs: decision.retry_after_secs(),
            });
        }

        let user = user.ok_or(CommerceError::Unauthenticated)?;
        tracing::Span::current().record("user_id", user.id.as_i32());

        let payment_method = request
            .payment_method
            .parse::<PaymentMethod>()
            .map_err(|_| {
                CommerceError::Validation(format!(
                    "unsupported payment method: {}",
                    request.payment_method
                ))
            })?;
        let shipping_address =
            validate_address(request.delivery_option, request.shipping_address)?;

        let cart = self.carts.list(user.id).await?;
        if cart.is_empty() {
            return Err(CommerceError::Validation("cart is empty".to_owned()));
        }

        let requests = aggregate(&cart);
        let failing: Vec<_> = self
            .validator
            .validate_batch(&requests)
            .await
            .into_iter()
            .filter(|check| !check.valid)
            .collect();
        if failing.iter().any(|check| check.unverified) {
            warn!(
                lines = failing.len(),
                "Checkout aborted, stock levels could not be read"
            );
            return Err(RepositoryError::Unavailable(
                "stock levels could not be verified".to_owned(),
            )
            .into());
        }
        if !failing.is_empty() {
            info!(lines = failing.len(), "Checkout rejected for insufficient stock");
            return Err(CommerceError::StockConflict(failing));
        }

        if let Some(line) = cart.iter().find(|line| line.currency != self.currency) {
            return Err(CommerceError::Validation(format!(
                "cart line for product {} is priced in {}, orders are placed in {}",
                line.product_id, line.currency, self.currency
            )));
        }
        let total = cart.iter().map(CartItem::line_total).sum::<Decimal>();
        if total <= Decimal::ZERO || total > self.max_order_total {
            return Err(CommerceError::Validation(format!(
                "order total {total} is outside the accepted range"
            )));
        }

        let product_ids: Vec<ProductId> = requests.iter().map(|r| r.product_id).collect();
        let catalog = self.ledger.load_many(&product_ids).await?;
        let items = cart
            .iter()
            .map(|line| {
                let product_name = catalog
                    .get(&line.product_id)
                    .map(|stock| stock.product.name.clone())
                    .ok_or_else(|| CommerceError::NotFound(format!("product {}", line.product_id)))?;
                Ok(NewOrderItem {
                    product_id: line.product_id,
                    product_name,
                    variant_id: line.variant_id.clone(),
                    variant_attributes: line.variant_attributes.clone(),
                    quantity: line.quantity,
                    unit_price: line.price,
                    total_price: line.line_total(),
                })
            })
            .collect::<Result<Vec<_>, CommerceError>>()?;

        // creating_order
        let now = Utc::now();
        let new_order = NewOrder {
            id: OrderId::generate(now),
            user_id: Some(user.id),
            reference_id: ReferenceId::generate(now),
            pickup_id: PickupId::generate(now),
            total_amount: total,
            currency: self.currency,
            shipping_address,
            delivery_option: request.delivery_option,
            payment_method: payment_method.as_str().to_owned(),
            created_at: now,
        };
        let order = self.orders.insert_order(&new_order).await.map_err(|e| {
            error!(error = %e, "Failed to insert order");
            CommerceError::OrderCreationFailed("could not create order".to_owned())
        })?;

        // creating_items
        let stored_items = match self.orders.insert_items(&order.id, &items).await {
            Ok(stored) => stored,
            Err(e) => {
                error!(order_id = %order.id, error = %e, "Failed to insert order items, deleting order");
                if let Err(delete_err) = self.orders.delete_order(&order.id).await {
                    error!(
                        order_id = %order.id,
                        error = %delete_err,
                        "Compensating order delete failed"
                    );
                }
                return Err(CommerceError::OrderCreationFailed(
                    "could not create order items".to_owned(),
                ));
            }
        };

        // clearing_cart
        if let Err(e) = self.carts.clear(user.id, Some(&product_ids)).await {
            warn!(order_id = %order.id, error = %e, "Failed to clear cart after checkout");
        }
        self.ledger.invalidate(&product_ids).await;
        self.cache
            .invalidate_many([CacheKey::Cart(user.id), CacheKey::Orders(user.id)])
            .await;

        info!(
            order_id = %order.id,
            reference_id = %order.reference_id,
            total = %order.total_amount,
            items = stored_items.len(),
            "Order created"
        );
        Ok(OrderSummary::new(&order, &stored_items))
    }
}

/// Sum quantities per product so a product split across variant lines is
/// checked against its whole availability.
fn aggregate(cart: &[CartItem]) -> Vec<StockRequest> {
    let mut totals: BTreeMap<ProductId, u32> = BTreeMap::new();
    for line in cart {
        let total = totals.entry(line.product_id).or_default();
        *total = total.saturating_add(line.quantity);
    }
    totals
        .into_iter()
        .map(|(product_id, quantity)| StockRequest {
            product_id,
            quantity,
        })
        .collect()
}

fn validate_address(
    delivery: DeliveryOption,
    input: Option<ShippingAddressInput>,
) -> Result<Option<ShippingAddress>, CommerceError> {
    let Some(input) = input else {
        return match delivery {
            DeliveryOption::Shipping => Err(CommerceError::Validation(
                "shipping address is required for shipping".to_owned(),
            )),
            DeliveryOption::Pickup => Ok(None),
        };
    };
    let input = input.sanitized();
    input
        .validate()
        .map_err(|e| CommerceError::Validation(format!("invalid shipping address: {e}")))?;
    Ok(Some(input.into_address()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::db::{FailPoint, MemoryStore};
    use crate::models::{NewCartLine, Product};
    use crate::services::rate_limit::RateDecision;
    use orchard_core::{AttributeSelection, OrderStatus, PaymentStatus, UserId, VariantKey};

    struct AllowAll;

    impl RateLimiter for AllowAll {
        fn check(&self, _key: &str) -> RateDecision {
            RateDecision {
                allowed: true,
                remaining: 1,
                retry_after: None,
            }
        }
    }

    struct DenyAll;

    impl RateLimiter for DenyAll {
        fn check(&self, _key: &str) -> RateDecision {
            RateDecision {
                allowed: false,
                remaining: 0,
                retry_after: Some(Duration::from_secs(30)),
            }
        }
    }

    fn coordinator(store: &Arc<MemoryStore>, limiter: Arc<dyn RateLimiter>) -> CheckoutCoordinator {
        let repos = Repositories::in_memory(store);
        let config = CommerceConfig::default();
        let cache = ReadCache::new(config.cache_ttl);
        let ledger = StockLedger::new(Arc::clone(&repos.products), cache.clone());
        let validator = StockValidator::new(ledger.clone(), 10, 4, Duration::from_secs(5));
        CheckoutCoordinator::new(&repos, ledger, validator, cache, limiter, &config)
    }

    fn user() -> CurrentUser {
        CurrentUser {
            id: UserId::new(1),
            email: "ada@example.com".to_owned(),
        }
    }

    fn pickup() -> CheckoutRequest {
        CheckoutRequest {
            shipping_address: None,
            payment_method: "online".to_owned(),
            delivery_option: DeliveryOption::Pickup,
        }
    }

    async fn put_line(store: &MemoryStore, product: i32, quantity: u32, price: Decimal) {
        store
            .insert(&NewCartLine {
                key: crate::models::CartKey {
                    user_id: UserId::new(1),
                    product_id: ProductId::new(product),
                    variant_id: VariantKey::default_key(),
                },
                variant_attributes: AttributeSelection::empty(),
                quantity,
                price,
                currency: CurrencyCode::USD,
                applied_discount: Decimal::ZERO,
            })
            .await
            .unwrap();
    }

    async fn seeded() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .add_product(Product::new(ProductId::new(1), "Mug", Decimal::TEN).with_stock(Some(5)))
            .await;
        store
            .add_product(Product::new(ProductId::new(2), "Poster", Decimal::ONE).with_stock(Some(0)))
            .await;
        store
            .add_product(Product::new(ProductId::new(3), "Sticker", Decimal::ONE))
            .await;
        store
    }

    #[tokio::test]
    async fn test_successful_checkout_creates_order_and_clears_lines() {
        let store = seeded().await;
        put_line(&store, 1, 2, Decimal::TEN).await;
        put_line(&store, 3, 3, Decimal::ONE).await;
        let checkout = coordinator(&store, Arc::new(AllowAll));

        let summary = checkout.checkout("1.2.3.4", Some(&user()), pickup()).await.unwrap();

        assert_eq!(summary.total, Decimal::from(23));
        assert_eq!(summary.item_count, 5);
        assert_eq!(summary.status, OrderStatus::Pending);
        assert_eq!(summary.payment_status, PaymentStatus::Pending);
        assert_eq!(store.orders().await.len(), 1);
        assert_eq!(store.order_item_count().await, 2);
        assert!(store.list(UserId::new(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_any_short_line_rejects_whole_checkout() {
        let store = seeded().await;
        put_line(&store, 1, 1, Decimal::TEN).await;
        put_line(&store, 2, 1, Decimal::ONE).await;
        let checkout = coordinator(&store, Arc::new(AllowAll));

        let err = checkout.checkout("ip", Some(&user()), pickup()).await.unwrap_err();

        let CommerceError::StockConflict(lines) = err else {
            panic!("expected stock conflict");
        };
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].product_id, ProductId::new(2));
        assert!(store.orders().await.is_empty());
        assert_eq!(store.list(UserId::new(1)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unreadable_stock_is_not_reported_as_out_of_stock() {
        let store = seeded().await;
        put_line(&store, 1, 1, Decimal::TEN).await;
        store.fail(FailPoint::ReadStock).await;
        let checkout = coordinator(&store, Arc::new(AllowAll));

        let err = checkout.checkout("ip", Some(&user()), pickup()).await.unwrap_err();

        assert!(matches!(
            err,
            CommerceError::Repository(RepositoryError::Unavailable(_))
        ));
        assert!(store.orders().await.is_empty());
        assert_eq!(store.list(UserId::new(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_item_insert_failure_deletes_order() {
        let store = seeded().await;
        put_line(&store, 1, 1, Decimal::TEN).await;
        store.fail(FailPoint::InsertOrderItems).await;
        let checkout = coordinator(&store, Arc::new(AllowAll));

        let err = checkout.checkout("ip", Some(&user()), pickup()).await.unwrap_err();

        assert!(matches!(err, CommerceError::OrderCreationFailed(_)));
        assert!(store.orders().await.is_empty());
        assert_eq!(store.order_item_count().await, 0);
        assert_eq!(store.list(UserId::new(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cart_clear_failure_keeps_order() {
        let store = seeded().await;
        put_line(&store, 1, 1, Decimal::TEN).await;
        store.fail(FailPoint::ClearCart).await;
        let checkout = coordinator(&store, Arc::new(AllowAll));

        let summary = checkout.checkout("ip", Some(&user()), pickup()).await.unwrap();

        assert_eq!(summary.item_count, 1);
        assert_eq!(store.orders().await.len(), 1);
    }

    #[tokio::test]
    async fn test_rejections_before_side_effects() {
        let store = seeded().await;
        put_line(&store, 1, 1, Decimal::TEN).await;

        let limited = coordinator(&store, Arc::new(DenyAll));
        assert!(matches!(
            limited.checkout("ip", Some(&user()), pickup()).await.unwrap_err(),
            CommerceError::RateLimited { retry_after_secs: 30 }
        ));

        let checkout = coordinator(&store, Arc::new(AllowAll));
        assert!(matches!(
            checkout.checkout("ip", None, pickup()).await.unwrap_err(),
            CommerceError::Unauthenticated
        ));

        let mut cash = pickup();
        cash.payment_method = "cash".to_owned();
        assert!(matches!(
            checkout.checkout("ip", Some(&user()), cash).await.unwrap_err(),
            CommerceError::Validation(_)
        ));

        let mut shipping = pickup();
        shipping.delivery_option = DeliveryOption::Shipping;
        assert!(matches!(
            checkout.checkout("ip", Some(&user()), shipping).await.unwrap_err(),
            CommerceError::Validation(_)
        ));

        assert!(store.orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_cart_is_rejected() {
        let store = seeded().await;
        let checkout = coordinator(&store, Arc::new(AllowAll));
        let err = checkout.checkout("ip", Some(&user()), pickup()).await.unwrap_err();
        assert!(matches!(err, CommerceError::Validation(ref m) if m == "cart is empty"));
    }

    #[tokio::test]
    async fn test_shipping_address_is_sanitized_and_stored() {
        let store = seeded().await;
        put_line(&store, 1, 1, Decimal::TEN).await;
        let checkout = coordinator(&store, Arc::new(AllowAll));
        let request = CheckoutRequest {
            shipping_address: Some(ShippingAddressInput {
                full_name: "  Ada   Lovelace ".to_owned(),
                line1: "12 Analytical Row".to_owned(),
                city: "London".to_owned(),
                postal_code: "N1 9GU".to_owned(),
                country: "GB".to_owned(),
                ..ShippingAddressInput::default()
            }),
            payment_method: "Online".to_owned(),
            delivery_option: DeliveryOption::Shipping,
        };

        checkout.checkout("ip", Some(&user()), request).await.unwrap();

        let order = store.orders().await.remove(0);
        let address = order.shipping_address.unwrap();
        assert_eq!(address.full_name, "Ada Lovelace");
        assert_eq!(order.payment_method, "online");
    }

    #[test]
    fn test_aggregate_sums_variant_lines_per_product() {
        let now = Utc::now();
        let line = |product: i32, variant: &str, quantity: u32| CartItem {
            id: orchard_core::CartItemId::new(quantity.try_into().unwrap()),
            user_id: UserId::new(1),
            product_id: ProductId::new(product),
            variant_id: VariantKey::from_option(Some(variant)),
            variant_attributes: AttributeSelection::empty(),
            quantity,
            price: Decimal::ONE,
            currency: CurrencyCode::USD,
            applied_discount: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        };
        let requests = aggregate(&[line(1, "10", 2), line(1, "11", 3), line(2, "default", 1)]);
        assert_eq!(
            requests,
            vec![
                StockRequest {
                    product_id: ProductId::new(1),
                    quantity: 5
                },
                StockRequest {
                    product_id: ProductId::new(2),
                    quantity: 1
                },
            ]
        );
    }
}
