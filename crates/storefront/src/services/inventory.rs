//! Stock ledger service.
//!
//! Reads go through the [`ReadCache`]; every write evicts the product's
//! entry after the store has recomputed the aggregate from the attribute
//! ledger.

use std::collections::HashMap;
use std::sync::Arc;

use orchard_core::{
    AttributeSelection, Availability, LedgerDecrement, ProductId, StockLevel, VariantId,
};
use tracing::{info, instrument};

use super::CommerceError;
use super::cache::{CacheKey, ReadCache};
use crate::db::ProductRepository;
use crate::models::ProductStock;

/// Availability reads and ledger writes.
#[derive(Clone)]
pub struct StockLedger {
    products: Arc<dyn ProductRepository>,
    cache: ReadCache,
}

impl StockLedger {
    /// Create a ledger over `products`.
    #[must_use]
    pub fn new(products: Arc<dyn ProductRepository>, cache: ReadCache) -> Self {
        Self { products, cache }
    }

    /// Product and variants, served from the cache when fresh.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown products and `Repository` on storage
    /// failure.
    pub async fn load(&self, id: ProductId) -> Result<Arc<ProductStock>, CommerceError> {
        if let Some(stock) = self.cache.stock(id).await {
            return Ok(stock);
        }
        let stock = self
            .products
            .find_stock(id)
            .await?
            .map(Arc::new)
            .ok_or_else(|| CommerceError::NotFound(format!("product {id}")))?;
        self.cache.put_stock(Arc::clone(&stock)).await;
        Ok(stock)
    }

    /// Product and variants read from the store, refreshing the cache.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown products and `Repository` on storage
    /// failure.
    pub async fn load_fresh(&self, id: ProductId) -> Result<Arc<ProductStock>, CommerceError> {
        let Some(stock) = self.products.find_stock(id).await? else {
            self.cache.invalidate(CacheKey::Stock(id)).await;
            return Err(CommerceError::NotFound(format!("product {id}")));
        };
        let stock = Arc::new(stock);
        self.cache.put_stock(Arc::clone(&stock)).await;
        Ok(stock)
    }

    /// Load many products: cached entries first, the rest in one batched
    /// read. Unknown products are absent from the map.
    ///
    /// # Errors
    ///
    /// Returns `Repository` on storage failure.
    pub async fn load_many(
        &self,
        ids: &[ProductId],
    ) -> Result<HashMap<ProductId, Arc<ProductStock>>, CommerceError> {
        let mut found = HashMap::with_capacity(ids.len());
        let mut missing = Vec::new();
        for id in ids {
            if found.contains_key(id) || missing.contains(id) {
                continue;
            }
            match self.cache.stock(*id).await {
                Some(stock) => {
                    found.insert(*id, stock);
                }
                None => missing.push(*id),
            }
        }

        if !missing.is_empty() {
            for stock in self.products.find_stock_many(&missing).await? {
                let stock = Arc::new(stock);
                self.cache.put_stock(Arc::clone(&stock)).await;
                found.insert(stock.product.id, stock);
            }
        }
        Ok(found)
    }

    /// How much of a product is available and whether it is purchasable.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown products and `Repository` on storage
    /// failure.
    pub async fn availability(&self, id: ProductId) -> Result<Availability, CommerceError> {
        Ok(self.load(id).await?.availability())
    }

    /// Decrement a product, attribute-aware when `selection` names entries.
    ///
    /// # Errors
    ///
    /// Returns `Repository` when the store rejects the write.
    #[instrument(skip(self, selection), fields(product_id = %id))]
    pub async fn decrement(
        &self,
        id: ProductId,
        quantity: u32,
        selection: Option<&AttributeSelection>,
    ) -> Result<LedgerDecrement, CommerceError> {
        let result = self
            .products
            .apply_decrement(id, quantity, selection.and_then(AttributeSelection::as_option))
            .await;
        self.cache.invalidate(CacheKey::Stock(id)).await;
        Ok(result?)
    }

    /// Overwrite product-level stock.
    ///
    /// # Errors
    ///
    /// Returns `Repository(Conflict)` when the product manages stock per
    /// attribute, `Repository(NotFound)` for unknown products.
    #[instrument(skip(self), fields(product_id = %id))]
    pub async fn set_product_stock(
        &self,
        id: ProductId,
        level: StockLevel,
    ) -> Result<Availability, CommerceError> {
        let result = self.products.set_product_stock(id, level).await;
        self.cache.invalidate(CacheKey::Stock(id)).await;
        let availability = result?;
        info!(available = ?availability.available, "Product stock set");
        Ok(availability)
    }

    /// Overwrite one attribute entry and recompute the aggregate.
    ///
    /// # Errors
    ///
    /// Returns `Repository(NotFound)` when the product, variant or entry does
    /// not exist.
    #[instrument(skip(self), fields(product_id = %id, variant_id = %variant))]
    pub async fn set_variant_quantity(
        &self,
        id: ProductId,
        variant: VariantId,
        attribute: &str,
        value: &str,
        quantity: u32,
    ) -> Result<Availability, CommerceError> {
        let result = self
            .products
            .set_variant_quantity(id, variant, attribute, value, quantity)
            .await;
        self.cache.invalidate(CacheKey::Stock(id)).await;
        let availability = result?;
        info!(available = ?availability.available, "Variant stock set");
        Ok(availability)
    }

    /// Evict cached stock for `ids`.
    pub async fn invalidate(&self, ids: &[ProductId]) {
        self.cache
            .invalidate_many(ids.iter().copied().map(CacheKey::Stock))
            .await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{Product, ProductVariant};
    use orchard_core::PrimaryValue;
    use rust_decimal::Decimal;

    async fn ledger() -> (Arc<MemoryStore>, StockLedger) {
        let store = Arc::new(MemoryStore::new());
        store
            .add_product(Product::new(ProductId::new(1), "Mug", Decimal::TEN).with_stock(Some(3)))
            .await;
        store
            .add_product(Product::new(ProductId::new(2), "Tee", Decimal::TEN))
            .await;
        store
            .add_variant(ProductVariant::new(
                VariantId::new(20),
                ProductId::new(2),
                "color",
                vec![
                    PrimaryValue::new("color", "red", 4),
                    PrimaryValue::new("color", "blue", 2),
                ],
            ))
            .await;
        let ledger = StockLedger::new(store.clone(), ReadCache::new(Duration::from_secs(60)));
        (store, ledger)
    }

    #[tokio::test]
    async fn test_availability_of_variant_product_is_ledger_sum() {
        let (_, ledger) = ledger().await;
        let availability = ledger.availability(ProductId::new(2)).await.unwrap();
        assert_eq!(availability.available, StockLevel::Limited(6));
        assert!(availability.in_stock);
    }

    #[tokio::test]
    async fn test_unknown_product_is_not_found() {
        let (_, ledger) = ledger().await;
        let err = ledger.availability(ProductId::new(99)).await.unwrap_err();
        assert!(matches!(err, CommerceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_decrement_evicts_cached_stock() {
        let (_, ledger) = ledger().await;
        assert_eq!(
            ledger.availability(ProductId::new(1)).await.unwrap().available,
            StockLevel::Limited(3)
        );

        ledger.decrement(ProductId::new(1), 2, None).await.unwrap();

        assert_eq!(
            ledger.availability(ProductId::new(1)).await.unwrap().available,
            StockLevel::Limited(1)
        );
    }

    #[tokio::test]
    async fn test_attribute_decrement_keeps_aggregate_equal_to_sum() {
        let (store, ledger) = ledger().await;
        let selection = AttributeSelection::new([("color", "red")]);

        let result = ledger
            .decrement(ProductId::new(2), 3, Some(&selection))
            .await
            .unwrap();

        assert_eq!(result.stock, StockLevel::Limited(3));
        let product = store.product(ProductId::new(2)).await.unwrap();
        let sum: u32 = store
            .variants(ProductId::new(2))
            .await
            .iter()
            .flat_map(|v| v.primary_values.iter())
            .map(|pv| pv.quantity)
            .sum();
        assert_eq!(product.stock_quantity, Some(sum));
    }

    #[tokio::test]
    async fn test_load_many_skips_unknown_ids() {
        let (_, ledger) = ledger().await;
        ledger.load(ProductId::new(1)).await.unwrap();
        let found = ledger
            .load_many(&[ProductId::new(1), ProductId::new(2), ProductId::new(77)])
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert!(!found.contains_key(&ProductId::new(77)));
    }

    #[tokio::test]
    async fn test_manual_product_stock_edit_rejected_for_variant_product() {
        let (_, ledger) = ledger().await;
        let err = ledger
            .set_product_stock(ProductId::new(2), StockLevel::Limited(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CommerceError::Repository(crate::db::RepositoryError::Conflict(_))
        ));
    }
}
