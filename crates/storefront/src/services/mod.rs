//! Business logic services for the storefront.
//!
//! # Services
//!
//! - `inventory` - Stock ledger reads and writes
//! - `cache` - Short-TTL read cache evicted by every writer
//! - `validator` - Batch stock validation with bounded concurrency
//! - `cart` - Stock-aware cart store
//! - `checkout` - Order creation with compensating rollback
//! - `payments` - Payment reconciliation and stock decrement
//! - `janitor` - Pending/failed order lifecycle sweep
//! - `orders` - Order history reads
//! - `rate_limit` - Per-client rate limiter collaborator
//! - `webhook` - Payment callback signature verification

pub mod cache;
pub mod cart;
pub mod checkout;
pub mod inventory;
pub mod janitor;
pub mod orders;
pub mod payments;
pub mod rate_limit;
pub mod validator;
pub mod webhook;

use std::sync::Arc;

use orchard_core::{ProductId, RestockEta};
use thiserror::Error;

use crate::config::{CommerceConfig, SupportContact};
use crate::db::{RepositoryError, Repositories};

pub use cache::{CacheKey, ReadCache};
pub use cart::{AddOutcome, AddToCart, CartService, GuestCartLine, MergeOutcome, PartialStock};
pub use checkout::{CheckoutCoordinator, CheckoutRequest};
pub use inventory::StockLedger;
pub use janitor::{LifecycleJanitor, SweepReport};
pub use orders::OrderService;
pub use payments::{OrderStatusPayload, PaymentConfirmation, PaymentReconciler};
pub use rate_limit::{GovernorRateLimiter, RateDecision, RateLimiter};
pub use validator::{StockCheck, StockRequest, StockValidator};

/// Errors surfaced by the order-processing services.
#[derive(Debug, Error)]
pub enum CommerceError {
    /// Malformed or missing input.
    #[error("validation failed: {0}")]
    Validation(String),

    /// No authenticated identity.
    #[error("authentication required")]
    Unauthenticated,

    /// Caller exceeded its request budget.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Nothing of the product can be added.
    #[error("{message}")]
    OutOfStock {
        product_id: ProductId,
        restock_eta: Option<RestockEta>,
        message: String,
    },

    /// One or more lines exceed available stock.
    #[error("insufficient stock for {} item(s)", .0.len())]
    StockConflict(Vec<StockCheck>),

    /// Storage failure while creating an order; no order was kept.
    #[error("order creation failed: {0}")]
    OrderCreationFailed(String),

    /// Unknown order, product or cart line.
    #[error("not found: {0}")]
    NotFound(String),

    /// Requested payment status is not a legal transition.
    #[error("invalid status: {0}")]
    InvalidStatus(String),

    /// Storage failure.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// Unexpected failure.
    #[error("internal error: {0}")]
    Internal(String),
}

/// All services, wired over one set of repositories and one read cache.
#[derive(Clone)]
pub struct Services {
    pub ledger: StockLedger,
    pub validator: StockValidator,
    pub cart: CartService,
    pub checkout: CheckoutCoordinator,
    pub payments: PaymentReconciler,
    pub orders: OrderService,
    pub janitor: LifecycleJanitor,
    pub cache: ReadCache,
}

impl Services {
    /// Wire services with the governor-backed checkout rate limiter.
    #[must_use]
    pub fn new(repos: &Repositories, config: &CommerceConfig, support: SupportContact) -> Self {
        let limiter = Arc::new(GovernorRateLimiter::new(
            config.checkout_rate_per_minute,
            config.checkout_burst,
        ));
        Self::with_rate_limiter(repos, config, support, limiter)
    }

    /// Wire services with a custom rate limiter.
    #[must_use]
    pub fn with_rate_limiter(
        repos: &Repositories,
        config: &CommerceConfig,
        support: SupportContact,
        rate_limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        let cache = ReadCache::new(config.cache_ttl);
        let ledger = StockLedger::new(Arc::clone(&repos.products), cache.clone());
        let validator = StockValidator::new(
            ledger.clone(),
            config.validation_batch_size,
            config.validation_concurrency,
            config.validation_timeout,
        );
        let cart = CartService::new(Arc::clone(&repos.carts), ledger.clone(), cache.clone(), support);
        let checkout = CheckoutCoordinator::new(
            repos,
            ledger.clone(),
            validator.clone(),
            cache.clone(),
            Arc::clone(&rate_limiter),
            config,
        );
        let payments = PaymentReconciler::new(repos, ledger.clone(), cache.clone());
        let orders = OrderService::new(Arc::clone(&repos.orders), cache.clone());
        let janitor = LifecycleJanitor::new(
            Arc::clone(&repos.orders),
            cache.clone(),
            config.pending_order_ttl,
            config.failed_order_ttl,
        )
        .with_rate_limiter(rate_limiter);

        Self {
            ledger,
            validator,
            cart,
            checkout,
            payments,
            orders,
            janitor,
            cache,
        }
    }
}
