//! Storage collaborators for the order-processing core.
//!
//! # Tables
//!
//! - `product` / `product_variant` - Catalog rows and the attribute-level stock ledger
//! - `cart_item` - Per-user cart lines, unique on `(user_id, product_id, variant_id)`
//! - `orders` / `order_item` - Orders and their immutable lines (cascade delete)
//! - `payment_transaction` - Append-only payment log
//! - `tower_sessions.session` - Tower-sessions storage
//!
//! Services talk to storage only through the repository traits below, so the
//! same logic runs against `PostgreSQL` in production and [`MemoryStore`] in
//! tests.
//!
//! # Migrations
//!
//! Migrations are stored in `crates/storefront/migrations/` and run via:
//! ```bash
//! cargo run -p orchard-cli -- migrate
//! ```

pub mod cart;
pub mod memory;
pub mod orders;
pub mod payments;
pub mod products;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchard_core::{
    Availability, AttributeSelection, CartItemId, LedgerDecrement, OrderId, ProductId,
    ReferenceId, StockLevel, UserId, VariantId,
};
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use crate::models::{
    CartItem, CartKey, NewCartLine, NewOrder, NewOrderItem, NewPaymentTransaction, Order,
    OrderDetail, OrderItem, PaymentTransaction, PaymentTransition, PaymentUpdate, ProductStock,
};

pub use cart::PgCartRepository;
pub use memory::{FailPoint, MemoryStore};
pub use orders::PgOrderRepository;
pub use payments::PgPaymentLogRepository;
pub use products::PgProductRepository;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database query failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is invalid or corrupted.
    #[error("data integrity error: {0}")]
    DataCorruption(String),

    /// The addressed row does not exist.
    #[error("not found")]
    NotFound,

    /// A unique or conditional write lost against a concurrent writer.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The backend does not offer this primitive.
    #[error("operation not supported by this store: {0}")]
    Unsupported(&'static str),

    /// The backend is temporarily unreachable.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl RepositoryError {
    /// Map a unique violation to `Conflict`, anything else to `Database`.
    pub(crate) fn from_insert(e: sqlx::Error, what: &str) -> Self {
        if let sqlx::Error::Database(ref db_err) = e
            && db_err.is_unique_violation()
        {
            return Self::Conflict(format!("{what} already exists"));
        }
        Self::Database(e)
    }
}

/// Product and stock ledger storage.
#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// Cheap connectivity probe for readiness checks.
    async fn ping(&self) -> Result<(), RepositoryError>;

    /// Load a product and its variants.
    async fn find_stock(&self, id: ProductId) -> Result<Option<ProductStock>, RepositoryError>;

    /// Load many products and their variants in one round trip. Unknown ids
    /// are absent from the result.
    async fn find_stock_many(&self, ids: &[ProductId])
    -> Result<Vec<ProductStock>, RepositoryError>;

    /// Atomically apply a decrement to the ledger and persist the recomputed
    /// aggregate.
    async fn apply_decrement(
        &self,
        id: ProductId,
        quantity: u32,
        selection: Option<&AttributeSelection>,
    ) -> Result<LedgerDecrement, RepositoryError>;

    /// Overwrite product-level stock. Rejected with `Conflict` when the product
    /// manages stock per attribute.
    async fn set_product_stock(
        &self,
        id: ProductId,
        level: StockLevel,
    ) -> Result<Availability, RepositoryError>;

    /// Overwrite one attribute entry and recompute the aggregate.
    async fn set_variant_quantity(
        &self,
        id: ProductId,
        variant: VariantId,
        attribute: &str,
        value: &str,
        quantity: u32,
    ) -> Result<Availability, RepositoryError>;
}

/// Cart line storage.
#[async_trait]
pub trait CartRepository: Send + Sync {
    /// All lines of a user's cart, oldest first.
    async fn list(&self, user_id: UserId) -> Result<Vec<CartItem>, RepositoryError>;

    /// Line by unique key.
    async fn find(&self, key: &CartKey) -> Result<Option<CartItem>, RepositoryError>;

    /// Line by id.
    async fn find_by_id(&self, id: CartItemId) -> Result<Option<CartItem>, RepositoryError>;

    /// Atomic insert-or-increment on the line's unique key.
    ///
    /// When `cap` is set the increment is applied only if the resulting
    /// quantity stays within it; otherwise `Conflict` is returned and nothing
    /// is written. Stores without the primitive return `Unsupported`.
    async fn upsert_increment(
        &self,
        line: &NewCartLine,
        cap: Option<u32>,
    ) -> Result<CartItem, RepositoryError>;

    /// Plain insert. `Conflict` if the key already exists.
    async fn insert(&self, line: &NewCartLine) -> Result<CartItem, RepositoryError>;

    /// Set a line's quantity. `NotFound` if it does not exist.
    async fn set_quantity(
        &self,
        id: CartItemId,
        quantity: u32,
    ) -> Result<CartItem, RepositoryError>;

    /// Delete a line. Returns whether a row was removed.
    async fn delete(&self, id: CartItemId) -> Result<bool, RepositoryError>;

    /// Delete all of a user's lines, or only those for `product_ids`.
    async fn clear(
        &self,
        user_id: UserId,
        product_ids: Option<&[ProductId]>,
    ) -> Result<u64, RepositoryError>;
}

/// Order storage.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Insert an order with `status = pending`, `payment_status = pending`.
    async fn insert_order(&self, order: &NewOrder) -> Result<Order, RepositoryError>;

    /// Insert all lines of an order in one statement (all or nothing).
    async fn insert_items(
        &self,
        order_id: &OrderId,
        items: &[NewOrderItem],
    ) -> Result<Vec<OrderItem>, RepositoryError>;

    /// Delete an order and, by cascade, its lines.
    async fn delete_order(&self, id: &OrderId) -> Result<bool, RepositoryError>;

    /// Order by payment reference.
    async fn find_by_reference(
        &self,
        reference_id: &ReferenceId,
    ) -> Result<Option<Order>, RepositoryError>;

    /// Lines of an order.
    async fn items(&self, order_id: &OrderId) -> Result<Vec<OrderItem>, RepositoryError>;

    /// A user's orders with their lines, newest first.
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<OrderDetail>, RepositoryError>;

    /// Apply a payment update under a row lock, returning the previous payment
    /// status read under that same lock. `None` if the reference is unknown.
    ///
    /// A paid order only accepts a repeated `paid`; any other update leaves it
    /// unchanged and returns it with `previous` set to `paid`.
    async fn transition_payment(
        &self,
        reference_id: &ReferenceId,
        update: &PaymentUpdate,
    ) -> Result<Option<PaymentTransition>, RepositoryError>;

    /// Mark pending orders created before `cutoff` as failed.
    async fn fail_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Order>, RepositoryError>;

    /// Delete failed orders created before `cutoff` together with their lines.
    async fn delete_stale_failed(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Order>, RepositoryError>;
}

/// Payment transaction log.
#[async_trait]
pub trait PaymentLogRepository: Send + Sync {
    /// Append an entry.
    async fn append(
        &self,
        entry: &NewPaymentTransaction,
    ) -> Result<PaymentTransaction, RepositoryError>;

    /// Entries for an order, oldest first.
    async fn list_for_order(
        &self,
        order_id: &OrderId,
    ) -> Result<Vec<PaymentTransaction>, RepositoryError>;
}

/// The set of storage collaborators handed to services.
#[derive(Clone)]
pub struct Repositories {
    pub products: Arc<dyn ProductRepository>,
    pub carts: Arc<dyn CartRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub payments: Arc<dyn PaymentLogRepository>,
}

impl Repositories {
    /// `PostgreSQL`-backed repositories sharing one pool.
    #[must_use]
    pub fn postgres(pool: &PgPool) -> Self {
        Self {
            products: Arc::new(PgProductRepository::new(pool.clone())),
            carts: Arc::new(PgCartRepository::new(pool.clone())),
            orders: Arc::new(PgOrderRepository::new(pool.clone())),
            payments: Arc::new(PgPaymentLogRepository::new(pool.clone())),
        }
    }

    /// Repositories backed by a shared in-process store.
    #[must_use]
    pub fn in_memory(store: &Arc<MemoryStore>) -> Self {
        Self {
            products: store.clone(),
            carts: store.clone(),
            orders: store.clone(),
            payments: store.clone(),
        }
    }
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Convert a stored quantity column.
pub(crate) fn quantity_from_column(value: i32, column: &str) -> Result<u32, RepositoryError> {
    u32::try_from(value)
        .map_err(|_| RepositoryError::DataCorruption(format!("negative {column}: {value}")))
}

/// Convert a quantity for binding.
pub(crate) fn quantity_to_column(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}
