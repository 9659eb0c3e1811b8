//! Short-TTL read cache in front of stock, cart and order reads.
//!
//! Entries expire after the configured TTL. Every writer evicts the keys it
//! touched, so readers see stale data only within that window and only for
//! writes made by another process.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use orchard_core::{ProductId, UserId};
use tracing::debug;

use crate::models::{CartItem, OrderDetail, ProductStock};

/// Upper bound on cached entries.
const MAX_ENTRIES: u64 = 10_000;

/// Cache key.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum CacheKey {
    Stock(ProductId),
    Cart(UserId),
    Orders(UserId),
}

/// Cached value types.
#[derive(Debug, Clone)]
pub enum CacheValue {
    Stock(Arc<ProductStock>),
    Cart(Arc<Vec<CartItem>>),
    Orders(Arc<Vec<OrderDetail>>),
}

/// Process-wide read cache.
#[derive(Clone)]
pub struct ReadCache {
    cache: Cache<CacheKey, CacheValue>,
}

impl ReadCache {
    /// Create a cache whose entries live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(MAX_ENTRIES)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }

    /// Cached product stock.
    pub async fn stock(&self, id: ProductId) -> Option<Arc<ProductStock>> {
        match self.cache.get(&CacheKey::Stock(id)).await {
            Some(CacheValue::Stock(stock)) => {
                debug!(product_id = %id, "Cache hit for stock");
                Some(stock)
            }
            _ => None,
        }
    }

    /// Store product stock.
    pub async fn put_stock(&self, stock: Arc<ProductStock>) {
        self.cache
            .insert(CacheKey::Stock(stock.product.id), CacheValue::Stock(stock))
            .await;
    }

    /// Cached cart lines of a user.
    pub async fn cart(&self, user_id: UserId) -> Option<Arc<Vec<CartItem>>> {
        match self.cache.get(&CacheKey::Cart(user_id)).await {
            Some(CacheValue::Cart(items)) => Some(items),
            _ => None,
        }
    }

    /// Store a user's cart lines.
    pub async fn put_cart(&self, user_id: UserId, items: Arc<Vec<CartItem>>) {
        self.cache
            .insert(CacheKey::Cart(user_id), CacheValue::Cart(items))
            .await;
    }

    /// Cached order history of a user.
    pub async fn orders(&self, user_id: UserId) -> Option<Arc<Vec<OrderDetail>>> {
        match self.cache.get(&CacheKey::Orders(user_id)).await {
            Some(CacheValue::Orders(orders)) => Some(orders),
            _ => None,
        }
    }

    /// Store a user's order history.
    pub async fn put_orders(&self, user_id: UserId, orders: Arc<Vec<OrderDetail>>) {
        self.cache
            .insert(CacheKey::Orders(user_id), CacheValue::Orders(orders))
            .await;
    }

    /// Evict one entry.
    pub async fn invalidate(&self, key: CacheKey) {
        self.cache.invalidate(&key).await;
    }

    /// Evict every listed entry.
    pub async fn invalidate_many(&self, keys: impl IntoIterator<Item = CacheKey>) {
        for key in keys {
            self.cache.invalidate(&key).await;
        }
    }

    /// Evict everything.
    pub async fn invalidate_all(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::models::Product;
    use rust_decimal::Decimal;

    fn stock(id: i32) -> Arc<ProductStock> {
        Arc::new(ProductStock {
            product: Product::new(ProductId::new(id), "Mug", Decimal::TEN),
            variants: Vec::new(),
        })
    }

    #[tokio::test]
    async fn test_put_and_get_stock() {
        let cache = ReadCache::new(Duration::from_secs(30));
        assert!(cache.stock(ProductId::new(1)).await.is_none());
        cache.put_stock(stock(1)).await;
        assert_eq!(
            cache.stock(ProductId::new(1)).await.unwrap().product.name,
            "Mug"
        );
    }

    #[tokio::test]
    async fn test_invalidate_many_evicts_only_listed_keys() {
        let cache = ReadCache::new(Duration::from_secs(30));
        cache.put_stock(stock(1)).await;
        cache.put_stock(stock(2)).await;
        cache.put_cart(UserId::new(9), Arc::new(Vec::new())).await;

        cache
            .invalidate_many([CacheKey::Stock(ProductId::new(1)), CacheKey::Cart(UserId::new(9))])
            .await;

        assert!(cache.stock(ProductId::new(1)).await.is_none());
        assert!(cache.stock(ProductId::new(2)).await.is_some());
        assert!(cache.cart(UserId::new(9)).await.is_none());
    }

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let cache = ReadCache::new(Duration::from_millis(50));
        cache.put_stock(stock(1)).await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(cache.stock(ProductId::new(1)).await.is_none());
    }
}
