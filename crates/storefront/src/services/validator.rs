//! Batch stock validation.
//!
//! Requested product ids are split into batches that are read with at most
//! `concurrency` batches in flight. The whole fan-out runs under one deadline;
//! anything unresolved when it passes (timeouts, storage errors, unknown
//! products) is reported as invalid. Lines that could not be read at all are
//! flagged `unverified` so callers can tell an outage from missing stock.

use std::collections::HashMap;
use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use orchard_core::{ProductId, StockLevel};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{instrument, warn};

use super::inventory::StockLedger;

/// A quantity to check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct StockRequest {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Result for one requested item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StockCheck {
    pub product_id: ProductId,
    pub valid: bool,
    pub available: StockLevel,
    pub requested: u32,
    /// Stock could not be read (storage error or deadline).
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub unverified: bool,
}

/// What a validation run learned about one product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lookup {
    Found(StockLevel),
    Unknown,
    Unread,
}

/// Batch validator over the stock ledger.
#[derive(Clone)]
pub struct StockValidator {
    ledger: StockLedger,
    batch_size: usize,
    concurrency: usize,
    timeout: Duration,
}

impl StockValidator {
    /// Create a validator. Zero sizes are raised to 1.
    #[must_use]
    pub fn new(ledger: StockLedger, batch_size: usize, concurrency: usize, timeout: Duration) -> Self {
        Self {
            ledger,
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
            timeout,
        }
    }

    /// Check every item; results are returned in request order.
    #[instrument(skip(self, items), fields(items = items.len()))]
    pub async fn validate_batch(&self, items: &[StockRequest]) -> Vec<StockCheck> {
        let resolved = self.resolve(items).await;
        items
            .iter()
            .map(|item| {
                let lookup = resolved
                    .get(&item.product_id)
                    .copied()
                    .unwrap_or(Lookup::Unread);
                let (valid, available) = match lookup {
                    Lookup::Found(level) => (level.covers(item.quantity), level),
                    Lookup::Unknown | Lookup::Unread => (false, StockLevel::Limited(0)),
                };
                StockCheck {
                    product_id: item.product_id,
                    valid,
                    available,
                    requested: item.quantity,
                    unverified: lookup == Lookup::Unread,
                }
            })
            .collect()
    }

    async fn resolve(&self, items: &[StockRequest]) -> HashMap<ProductId, Lookup> {
        let mut ids: Vec<ProductId> = items.iter().map(|item| item.product_id).collect();
        ids.sort_unstable();
        ids.dedup();

        let deadline = Instant::now() + self.timeout;
        let reads: Vec<_> = ids
            .chunks(self.batch_size)
            .map(|chunk| {
                let ledger = self.ledger.clone();
                let batch = chunk.to_vec();
                async move {
                    let result = ledger.load_many(&batch).await;
                    (batch, result)
                }
            })
            .collect();
        let mut batches = stream::iter(reads).buffer_unordered(self.concurrency);

        let mut resolved: HashMap<ProductId, Lookup> =
            ids.iter().map(|id| (*id, Lookup::Unread)).collect();
        let mut settled = 0;
        loop {
            match tokio::time::timeout_at(deadline, batches.next()).await {
                Ok(Some((batch, Ok(found)))) => {
                    settled += batch.len();
                    for id in batch {
                        let lookup = found
                            .get(&id)
                            .map_or(Lookup::Unknown, |stock| {
                                Lookup::Found(stock.availability().available)
                            });
                        resolved.insert(id, lookup);
                    }
                }
                Ok(Some((batch, Err(e)))) => {
                    warn!(error = %e, batch = ?batch, "Stock batch read failed");
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        resolved = settled,
                        total = ids.len(),
                        "Stock validation deadline exceeded"
                    );
                    break;
                }
            }
        }
        resolved
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::db::{FailPoint, MemoryStore};
    use crate::models::Product;
    use crate::services::cache::ReadCache;
    use rust_decimal::Decimal;

    async fn store_with(products: &[(i32, Option<u32>)]) -> MemoryStore {
        let store = MemoryStore::new();
        for (id, stock) in products {
            store
                .add_product(Product::new(ProductId::new(*id), "Item", Decimal::ONE).with_stock(*stock))
                .await;
        }
        store
    }

    fn validator(store: MemoryStore, timeout: Duration) -> StockValidator {
        let ledger = StockLedger::new(Arc::new(store), ReadCache::new(Duration::from_secs(30)));
        StockValidator::new(ledger, 2, 2, timeout)
    }

    fn request(id: i32, quantity: u32) -> StockRequest {
        StockRequest {
            product_id: ProductId::new(id),
            quantity,
        }
    }

    #[tokio::test]
    async fn test_valid_iff_available_covers_requested() {
        let store = store_with(&[(1, Some(3)), (2, None), (3, Some(0)), (4, Some(10)), (5, Some(1))]).await;
        let validator = validator(store, Duration::from_secs(5));

        let checks = validator
            .validate_batch(&[request(1, 3), request(2, 500), request(3, 1), request(4, 11), request(5, 1)])
            .await;

        let valid: Vec<bool> = checks.iter().map(|c| c.valid).collect();
        assert_eq!(valid, vec![true, true, false, false, true]);
        assert_eq!(checks[1].available, StockLevel::Unlimited);
        assert_eq!(checks[3].available, StockLevel::Limited(10));
        assert_eq!(checks[3].requested, 11);
    }

    #[tokio::test]
    async fn test_unknown_product_is_invalid() {
        let validator = validator(store_with(&[(1, None)]).await, Duration::from_secs(5));
        let checks = validator.validate_batch(&[request(1, 1), request(42, 1)]).await;
        assert!(checks[0].valid);
        assert!(!checks[1].valid);
        assert!(!checks[1].unverified);
        assert_eq!(checks[1].available, StockLevel::Limited(0));
    }

    #[tokio::test]
    async fn test_deadline_marks_unresolved_items_invalid() {
        let store = store_with(&[(1, None), (2, None)])
            .await
            .with_read_delay(Duration::from_millis(300));
        let validator = validator(store, Duration::from_millis(20));

        let checks = validator.validate_batch(&[request(1, 1), request(2, 1)]).await;

        assert!(checks.iter().all(|c| !c.valid && c.unverified));
    }

    #[tokio::test]
    async fn test_storage_failure_fails_safe() {
        let store = store_with(&[(1, None)]).await;
        store.fail(FailPoint::ReadStock).await;
        let validator = validator(store, Duration::from_secs(5));

        let checks = validator.validate_batch(&[request(1, 1)]).await;

        assert!(!checks[0].valid);
        assert!(checks[0].unverified);
        assert_eq!(checks[0].available, StockLevel::Limited(0));
    }

    #[tokio::test]
    async fn test_validation_future_can_be_spawned() {
        let store = store_with(&[(1, Some(2)), (2, Some(2)), (3, None)]).await;
        let validator = validator(store, Duration::from_secs(5));

        let handle = tokio::spawn(async move {
            validator
                .validate_batch(&[request(1, 1), request(2, 3), request(3, 9)])
                .await
        });
        let checks = handle.await.unwrap();

        let valid: Vec<bool> = checks.iter().map(|c| c.valid).collect();
        assert_eq!(valid, vec![true, false, true]);
    }

    #[tokio::test]
    async fn test_empty_request_is_empty_result() {
        let validator = validator(MemoryStore::new(), Duration::from_secs(1));
        assert!(validator.validate_batch(&[]).await.is_empty());
    }
}
