//! Cart lines.

use chrono::{DateTime, Utc};
use orchard_core::{
    AttributeSelection, CartItemId, CurrencyCode, Price, ProductId, UserId, VariantKey,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A stored cart line. Unique per `(user_id, product_id, variant_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: CartItemId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub variant_id: VariantKey,
    pub variant_attributes: AttributeSelection,
    pub quantity: u32,
    /// Unit price snapshot taken at add time.
    pub price: Decimal,
    pub currency: CurrencyCode,
    /// Per-unit discount snapshot taken at add time.
    pub applied_discount: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CartItem {
    /// The line's unique key.
    #[must_use]
    pub fn key(&self) -> CartKey {
        CartKey {
            user_id: self.user_id,
            product_id: self.product_id,
            variant_id: self.variant_id.clone(),
        }
    }

    /// Net line total.
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        Price::line_total(self.price, self.applied_discount, self.quantity)
    }
}

/// Unique key of a cart line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CartKey {
    pub user_id: UserId,
    pub product_id: ProductId,
    pub variant_id: VariantKey,
}

/// Values written by an add: the quantity to add plus the price snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCartLine {
    pub key: CartKey,
    pub variant_attributes: AttributeSelection,
    pub quantity: u32,
    pub price: Decimal,
    pub currency: CurrencyCode,
    pub applied_discount: Decimal,
}

impl NewCartLine {
    /// Same line with a different quantity.
    #[must_use]
    pub fn with_quantity(&self, quantity: u32) -> Self {
        Self {
            quantity,
            ..self.clone()
        }
    }
}
