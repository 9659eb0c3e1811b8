//! Stock-aware cart store.
//!
//! Adds are clamped to what the ledger can still supply for the line: the
//! product's live availability minus what the line already holds. The write
//! itself is a single conditional insert-or-increment capped at the
//! availability, so concurrent adds of the same key never lose an increment
//! and never push the line above the stock seen at write time. A write that
//! loses against a concurrent add re-reads stock and retries.
//!
//! Stores without the atomic primitive fall back to find-then-write. That path
//! is NOT safe under concurrent identical adds and logs a warning every time
//! it is taken.

use std::sync::Arc;

use orchard_core::{
    AttributeSelection, CartItemId, ProductId, RestockEta, StockLevel, UserId, VariantKey,
    out_of_stock_message,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::CommerceError;
use super::cache::{CacheKey, ReadCache};
use super::inventory::StockLedger;
use crate::config::SupportContact;
use crate::db::{CartRepository, RepositoryError};
use crate::models::{CartItem, CartKey, NewCartLine, ProductStock};

/// Write attempts before giving up on a contended line.
const MAX_WRITE_ATTEMPTS: usize = 3;

// =============================================================================
// Requests and outcomes
// =============================================================================

/// An add-to-cart request.
#[derive(Debug, Clone, Deserialize)]
pub struct AddToCart {
    pub product_id: ProductId,
    #[serde(default)]
    pub variant_id: Option<String>,
    #[serde(default)]
    pub variant_attributes: AttributeSelection,
    pub quantity: u32,
    /// Client-side price. Compared against the server price, never stored.
    #[serde(default)]
    pub unit_price: Option<Decimal>,
}

/// A line of a guest cart being merged into the user's cart.
#[derive(Debug, Clone, Deserialize)]
pub struct GuestCartLine {
    pub product_id: ProductId,
    #[serde(default)]
    pub variant_id: Option<String>,
    #[serde(default)]
    pub variant_attributes: AttributeSelection,
    pub quantity: u32,
}

/// Less than requested could be added.
#[derive(Debug, Clone, Serialize)]
pub struct PartialStock {
    pub item: CartItem,
    pub requested: u32,
    /// Units on the ledger, including any already in this cart line.
    pub available: u32,
    pub added: u32,
    pub remaining: u32,
    pub support: SupportContact,
    pub message: String,
}

/// Result of a successful add.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AddOutcome {
    Added { item: CartItem },
    PartialStock(PartialStock),
}

/// Why a guest line was not merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    NotFound,
    OutOfStock,
    InvalidQuantity,
}

/// A guest line that could not be merged.
#[derive(Debug, Clone, Serialize)]
pub struct MergeConflict {
    pub product_id: ProductId,
    pub variant_id: VariantKey,
    pub requested: u32,
    pub reason: ConflictReason,
    pub message: String,
}

/// Result of a guest cart merge.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeOutcome {
    pub merged: Vec<CartItem>,
    pub conflicts: Vec<MergeConflict>,
}

/// Outcome of placing units on a line.
enum Placement {
    Placed {
        item: CartItem,
        added: u32,
        /// Ledger availability the add was clamped against.
        available: StockLevel,
    },
    /// Nothing could be added; carries the stock that was last seen.
    NoCapacity(Arc<ProductStock>),
}

// =============================================================================
// CartService
// =============================================================================

/// Per-user cart operations.
#[derive(Clone)]
pub struct CartService {
    carts: Arc<dyn CartRepository>,
    ledger: StockLedger,
    cache: ReadCache,
    support: SupportContact,
}

impl CartService {
    /// Create a cart service.
    #[must_use]
    pub fn new(
        carts: Arc<dyn CartRepository>,
        ledger: StockLedger,
        cache: ReadCache,
        support: SupportContact,
    ) -> Self {
        Self {
            carts,
            ledger,
            cache,
            support,
        }
    }

    /// The user's cart lines, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `Repository` on storage failure.
    pub async fn list(&self, user_id: UserId) -> Result<Arc<Vec<CartItem>>, CommerceError> {
        if let Some(items) = self.cache.cart(user_id).await {
            return Ok(items);
        }
        let items = Arc::new(self.carts.list(user_id).await?);
        self.cache.put_cart(user_id, Arc::clone(&items)).await;
        Ok(items)
    }

    /// Add units of a product, clamped to available stock.
    ///
    /// # Errors
    ///
    /// - `Validation` for a zero quantity
    /// - `NotFound` for unknown products
    /// - `OutOfStock` when nothing can be added, with the restock estimate
    #[instrument(
        skip(self, request),
        fields(user_id = %user_id, product_id = %request.product_id, requested = request.quantity)
    )]
    pub async fn add(&self, user_id: UserId, request: AddToCart) -> Result<AddOutcome, CommerceError> {
        if request.quantity == 0 {
            return Err(CommerceError::Validation(
                "quantity must be at least 1".to_owned(),
            ));
        }

        let stock = self.ledger.load_fresh(request.product_id).await?;
        let line = priced_line(
            &stock,
            user_id,
            request.variant_id.as_deref(),
            request.variant_attributes,
        );
        if let Some(client_price) = request.unit_price
            && client_price != line.price
        {
            warn!(
                client_price = %client_price,
                server_price = %line.price,
                "Client unit price differs from catalog price, using catalog price"
            );
        }

        let placement = self.place(stock, &line, request.quantity).await;
        self.cache.invalidate(CacheKey::Cart(user_id)).await;

        match placement? {
            Placement::Placed {
                item,
                added,
                available,
            } if added < request.quantity => {
                let remaining = request.quantity - added;
                info!(added, remaining, "Partial stock added to cart");
                Ok(AddOutcome::PartialStock(PartialStock {
                    message: format!(
                        "Only {added} of {} requested units could be added. \
                         Contact customer care about the remaining {remaining}.",
                        request.quantity
                    ),
                    item,
                    requested: request.quantity,
                    available: available.quantity().unwrap_or(added),
                    added,
                    remaining,
                    support: self.support.clone(),
                }))
            }
            Placement::Placed { item, .. } => Ok(AddOutcome::Added { item }),
            Placement::NoCapacity(stock) => Err(out_of_stock(&stock)),
        }
    }

    /// Set a line's quantity; 0 deletes it. Not clamped against stock, checkout
    /// re-validates.
    ///
    /// Returns the updated line, or `None` when it was deleted.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the line does not exist or belongs to another user.
    #[instrument(skip(self), fields(user_id = %user_id, item_id = %item_id))]
    pub async fn update_quantity(
        &self,
        user_id: UserId,
        item_id: CartItemId,
        quantity: u32,
    ) -> Result<Option<CartItem>, CommerceError> {
        self.owned_line(user_id, item_id).await?;

        let result = if quantity == 0 {
            self.carts.delete(item_id).await.map(|_| None)
        } else {
            self.carts.set_quantity(item_id, quantity).await.map(Some)
        };
        self.cache.invalidate(CacheKey::Cart(user_id)).await;

        match result {
            Ok(item) => Ok(item),
            Err(RepositoryError::NotFound) => Err(line_not_found(item_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a line.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the line does not exist or belongs to another user.
    pub async fn remove(&self, user_id: UserId, item_id: CartItemId) -> Result<(), CommerceError> {
        self.update_quantity(user_id, item_id, 0).await.map(|_| ())
    }

    /// Delete all of the user's lines, or only those of `product_ids`.
    ///
    /// # Errors
    ///
    /// Returns `Repository` on storage failure.
    #[instrument(skip(self, product_ids), fields(user_id = %user_id))]
    pub async fn clear(
        &self,
        user_id: UserId,
        product_ids: Option<&[ProductId]>,
    ) -> Result<u64, CommerceError> {
        let result = self.carts.clear(user_id, product_ids).await;
        self.cache.invalidate(CacheKey::Cart(user_id)).await;
        Ok(result?)
    }

    /// Merge a guest cart into the user's cart.
    ///
    /// Each line is clamped like an add. Lines whose product is gone, that
    /// have no stock left, or that carry a zero quantity are reported as
    /// conflicts and skipped; the rest are merged.
    ///
    /// # Errors
    ///
    /// Returns `Repository` on storage failure.
    #[instrument(skip(self, lines), fields(user_id = %user_id, lines = lines.len()))]
    pub async fn merge(
        &self,
        user_id: UserId,
        lines: Vec<GuestCartLine>,
    ) -> Result<MergeOutcome, CommerceError> {
        let mut outcome = MergeOutcome::default();
        let result = self.merge_lines(user_id, lines, &mut outcome).await;
        self.cache.invalidate(CacheKey::Cart(user_id)).await;
        result?;

        info!(
            merged = outcome.merged.len(),
            conflicts = outcome.conflicts.len(),
            "Guest cart merged"
        );
        Ok(outcome)
    }

    async fn merge_lines(
        &self,
        user_id: UserId,
        lines: Vec<GuestCartLine>,
        outcome: &mut MergeOutcome,
    ) -> Result<(), CommerceError> {
        for guest in lines {
            let variant_id = VariantKey::from_option(guest.variant_id.as_deref());
            let conflict = |reason, message: String| MergeConflict {
                product_id: guest.product_id,
                variant_id: variant_id.clone(),
                requested: guest.quantity,
                reason,
                message,
            };

            if guest.quantity == 0 {
                outcome.conflicts.push(conflict(
                    ConflictReason::InvalidQuantity,
                    "quantity must be at least 1".to_owned(),
                ));
                continue;
            }

            let stock = match self.ledger.load_fresh(guest.product_id).await {
                Ok(stock) => stock,
                Err(CommerceError::NotFound(_)) => {
                    outcome.conflicts.push(conflict(
                        ConflictReason::NotFound,
                        "This product is no longer available.".to_owned(),
                    ));
                    continue;
                }
                Err(e) => return Err(e),
            };

            let line = priced_line(
                &stock,
                user_id,
                guest.variant_id.as_deref(),
                guest.variant_attributes.clone(),
            );
            match self.place(stock, &line, guest.quantity).await? {
                Placement::Placed { item, .. } => outcome.merged.push(item),
                Placement::NoCapacity(stock) => {
                    let message = out_of_stock_message(
                        &stock.product.name,
                        stock.product.restock_eta().as_ref(),
                    );
                    outcome
                        .conflicts
                        .push(conflict(ConflictReason::OutOfStock, message));
                }
            }
        }
        Ok(())
    }

    /// Put up to `requested` units on the line, re-reading stock after a lost
    /// race.
    async fn place(
        &self,
        mut stock: Arc<ProductStock>,
        line: &NewCartLine,
        requested: u32,
    ) -> Result<Placement, CommerceError> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            if attempt > 1 {
                stock = self.ledger.load_fresh(line.key.product_id).await?;
            }
            let available = stock.availability().available;
            let held = self
                .carts
                .find(&line.key)
                .await?
                .map_or(0, |item| item.quantity);
            let add = available.remaining_after(held).fulfillable(requested);
            if add == 0 {
                return Ok(Placement::NoCapacity(stock));
            }

            match self
                .write(&line.with_quantity(add), available.quantity())
                .await
            {
                Ok(item) => {
                    return Ok(Placement::Placed {
                        item,
                        added: add,
                        available,
                    });
                }
                Err(RepositoryError::Conflict(reason)) => {
                    debug!(attempt, %reason, "Cart line changed concurrently, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(RepositoryError::Conflict(format!(
            "cart line for product {} is contended",
            line.key.product_id
        ))
        .into())
    }

    async fn write(&self, line: &NewCartLine, cap: Option<u32>) -> Result<CartItem, RepositoryError> {
        match self.carts.upsert_increment(line, cap).await {
            Err(RepositoryError::Unsupported(op)) => {
                warn!(
                    op,
                    "Atomic cart upsert unavailable, using find-then-write (unsafe under concurrent identical adds)"
                );
                self.write_degraded(line, cap).await
            }
            other => other,
        }
    }

    async fn write_degraded(
        &self,
        line: &NewCartLine,
        cap: Option<u32>,
    ) -> Result<CartItem, RepositoryError> {
        match self.carts.find(&line.key).await? {
            Some(existing) => {
                let quantity = existing.quantity.saturating_add(line.quantity);
                if cap.is_some_and(|cap| quantity > cap) {
                    return Err(RepositoryError::Conflict(
                        "cart line exceeds available stock".to_owned(),
                    ));
                }
                self.carts.set_quantity(existing.id, quantity).await
            }
            None => self.carts.insert(line).await,
        }
    }

    async fn owned_line(&self, user_id: UserId, item_id: CartItemId) -> Result<CartItem, CommerceError> {
        self.carts
            .find_by_id(item_id)
            .await?
            .filter(|item| item.user_id == user_id)
            .ok_or_else(|| line_not_found(item_id))
    }
}

/// A cart line priced from the catalog.
fn priced_line(
    stock: &ProductStock,
    user_id: UserId,
    variant_id: Option<&str>,
    variant_attributes: AttributeSelection,
) -> NewCartLine {
    let variant_id = VariantKey::from_option(variant_id);
    let price = stock.unit_price(&variant_id);
    NewCartLine {
        key: CartKey {
            user_id,
            product_id: stock.product.id,
            variant_id,
        },
        variant_attributes,
        quantity: 0,
        price,
        currency: stock.product.currency,
        applied_discount: stock.discount_for(price),
    }
}

fn out_of_stock(stock: &ProductStock) -> CommerceError {
    let restock_eta: Option<RestockEta> = stock.product.restock_eta();
    let message = if stock.availability().available == StockLevel::Limited(0) {
        out_of_stock_message(&stock.product.name, restock_eta.as_ref())
    } else {
        format!(
            "Your cart already holds all available units of {}.",
            stock.product.name
        )
    };
    CommerceError::OutOfStock {
        product_id: stock.product.id,
        restock_eta,
        message,
    }
}

fn line_not_found(item_id: CartItemId) -> CommerceError {
    CommerceError::NotFound(format!("cart item {item_id}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{Product, ProductVariant};
    use orchard_core::{PrimaryValue, VariantId};

    async fn service_over(store: Arc<MemoryStore>) -> CartService {
        let cache = ReadCache::new(Duration::from_secs(30));
        let ledger = StockLedger::new(store.clone(), cache.clone());
        CartService::new(
            store,
            ledger,
            cache,
            SupportContact {
                email: Some("care@orchard.shop".to_owned()),
                phone: None,
            },
        )
    }

    async fn seeded() -> (Arc<MemoryStore>, CartService) {
        let store = Arc::new(MemoryStore::new());
        store
            .add_product(
                Product::new(ProductId::new(1), "Mug", Decimal::new(1200, 2))
                    .with_stock(Some(3))
                    .with_discount(Decimal::new(200, 2)),
            )
            .await;
        store
            .add_product(
                Product::new(ProductId::new(2), "Poster", Decimal::TEN)
                    .with_stock(Some(0))
                    .with_restock("days", 3),
            )
            .await;
        store
            .add_product(Product::new(ProductId::new(3), "Sticker", Decimal::ONE))
            .await;
        let service = service_over(store.clone()).await;
        (store, service)
    }

    fn add(product: i32, quantity: u32) -> AddToCart {
        AddToCart {
            product_id: ProductId::new(product),
            variant_id: None,
            variant_attributes: AttributeSelection::empty(),
            quantity,
            unit_price: None,
        }
    }

    const USER: UserId = UserId::new(7);

    #[tokio::test]
    async fn test_add_snapshots_server_price_and_discount() {
        let (_, cart) = seeded().await;
        let mut request = add(1, 2);
        request.unit_price = Some(Decimal::ONE);

        let outcome = cart.add(USER, request).await.unwrap();

        let AddOutcome::Added { item } = outcome else {
            panic!("expected full add");
        };
        assert_eq!(item.price, Decimal::new(1200, 2));
        assert_eq!(item.applied_discount, Decimal::new(200, 2));
        assert_eq!(item.variant_id, VariantKey::default_key());
        assert_eq!(item.line_total(), Decimal::new(2000, 2));
    }

    #[tokio::test]
    async fn test_partial_stock_adds_only_available() {
        let (_, cart) = seeded().await;

        let outcome = cart.add(USER, add(1, 5)).await.unwrap();

        let AddOutcome::PartialStock(partial) = outcome else {
            panic!("expected partial stock");
        };
        assert_eq!(
            (partial.requested, partial.available, partial.added, partial.remaining),
            (5, 3, 3, 2)
        );
        assert_eq!(partial.item.quantity, 3);
        assert_eq!(partial.support.email.as_deref(), Some("care@orchard.shop"));
        assert_eq!(cart.list(USER).await.unwrap()[0].quantity, 3);
    }

    #[tokio::test]
    async fn test_out_of_stock_carries_restock_eta() {
        let (_, cart) = seeded().await;

        let err = cart.add(USER, add(2, 1)).await.unwrap_err();

        let CommerceError::OutOfStock {
            restock_eta,
            message,
            ..
        } = err
        else {
            panic!("expected out of stock");
        };
        assert!(restock_eta.is_some());
        assert_eq!(message, "Poster is out of stock. Expected back in 3 days.");
        assert!(cart.list(USER).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_add_is_clamped_by_held_quantity() {
        let (_, cart) = seeded().await;
        cart.add(USER, add(1, 2)).await.unwrap();

        let outcome = cart.add(USER, add(1, 2)).await.unwrap();
        let AddOutcome::PartialStock(partial) = outcome else {
            panic!("expected partial stock");
        };
        assert_eq!(
            (partial.requested, partial.available, partial.added, partial.remaining),
            (2, 3, 1, 1)
        );

        let err = cart.add(USER, add(1, 1)).await.unwrap_err();
        assert!(matches!(err, CommerceError::OutOfStock { .. }));

        let items = cart.list(USER).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, 3);
    }

    #[tokio::test]
    async fn test_unknown_product_and_zero_quantity() {
        let (_, cart) = seeded().await;
        assert!(matches!(
            cart.add(USER, add(99, 1)).await.unwrap_err(),
            CommerceError::NotFound(_)
        ));
        assert!(matches!(
            cart.add(USER, add(3, 0)).await.unwrap_err(),
            CommerceError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_update_to_zero_deletes_and_other_users_cannot_touch() {
        let (_, cart) = seeded().await;
        let AddOutcome::Added { item } = cart.add(USER, add(3, 4)).await.unwrap() else {
            panic!("expected full add");
        };

        let err = cart
            .update_quantity(UserId::new(8), item.id, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, CommerceError::NotFound(_)));

        let updated = cart.update_quantity(USER, item.id, 40).await.unwrap();
        assert_eq!(updated.unwrap().quantity, 40);

        assert!(cart.update_quantity(USER, item.id, 0).await.unwrap().is_none());
        assert!(cart.list(USER).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_attribute_selection_is_stored_with_line() {
        let (store, cart) = seeded().await;
        store
            .add_product(Product::new(ProductId::new(4), "Tee", Decimal::TEN))
            .await;
        store
            .add_variant(
                ProductVariant::new(
                    VariantId::new(40),
                    ProductId::new(4),
                    "size",
                    vec![PrimaryValue::new("size", "M", 2)],
                )
                .with_price(Decimal::new(1500, 2)),
            )
            .await;

        let request = AddToCart {
            product_id: ProductId::new(4),
            variant_id: Some("40".to_owned()),
            variant_attributes: AttributeSelection::new([("size", "M")]),
            quantity: 1,
            unit_price: None,
        };
        let AddOutcome::Added { item } = cart.add(USER, request).await.unwrap() else {
            panic!("expected full add");
        };

        assert_eq!(item.price, Decimal::new(1500, 2));
        assert_eq!(item.variant_attributes.pairs().len(), 1);
        assert_eq!(item.variant_id.as_str(), "40");
    }

    #[tokio::test]
    async fn test_degraded_path_still_increments() {
        let store = Arc::new(MemoryStore::without_atomic_upsert());
        store
            .add_product(Product::new(ProductId::new(1), "Mug", Decimal::TEN).with_stock(Some(5)))
            .await;
        let cart = service_over(store).await;

        cart.add(USER, add(1, 2)).await.unwrap();
        cart.add(USER, add(1, 2)).await.unwrap();

        let items = cart.list(USER).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, 4);
    }

    #[tokio::test]
    async fn test_selective_clear() {
        let (_, cart) = seeded().await;
        cart.add(USER, add(1, 1)).await.unwrap();
        cart.add(USER, add(3, 1)).await.unwrap();

        let removed = cart.clear(USER, Some(&[ProductId::new(1)])).await.unwrap();

        assert_eq!(removed, 1);
        let items = cart.list(USER).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].product_id, ProductId::new(3));
    }
}
