//! Catalog records as seen by the stock ledger.
//!
//! The catalog itself is owned elsewhere; the storefront only reads prices and
//! restock metadata and writes stock quantities.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use orchard_core::{
    Availability, CurrencyCode, PrimaryValue, ProductId, RestockEta, StockLevel, VariantId,
    VariantKey,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A product row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Decimal,
    pub currency: CurrencyCode,
    /// Per-unit discount snapshotted into cart lines.
    pub discount_amount: Decimal,
    /// `None` means stock is not tracked.
    pub stock_quantity: Option<u32>,
    pub in_stock: bool,
    pub return_time_type: Option<String>,
    pub return_time_value: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// A product with untracked stock and no discount.
    #[must_use]
    pub fn new(id: ProductId, name: impl Into<String>, price: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            price,
            currency: CurrencyCode::default(),
            discount_amount: Decimal::ZERO,
            stock_quantity: None,
            in_stock: true,
            return_time_type: None,
            return_time_value: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the product-level stock.
    #[must_use]
    pub fn with_stock(mut self, quantity: Option<u32>) -> Self {
        self.stock_quantity = quantity;
        self.in_stock = self.stock_level().in_stock();
        self
    }

    /// Set the per-unit discount.
    #[must_use]
    pub const fn with_discount(mut self, discount: Decimal) -> Self {
        self.discount_amount = discount;
        self
    }

    /// Set the restock estimate metadata.
    #[must_use]
    pub fn with_restock(mut self, unit: impl Into<String>, value: i32) -> Self {
        self.return_time_type = Some(unit.into());
        self.return_time_value = Some(value);
        self
    }

    /// Product-level stock.
    #[must_use]
    pub fn stock_level(&self) -> StockLevel {
        self.stock_quantity
            .map_or(StockLevel::Unlimited, StockLevel::Limited)
    }

    /// Restock estimate, when both metadata columns are set.
    #[must_use]
    pub fn restock_eta(&self) -> Option<RestockEta> {
        RestockEta::from_parts(self.return_time_type.as_deref(), self.return_time_value)
    }

    /// Store a recomputed aggregate.
    pub fn apply_stock(&mut self, level: StockLevel, at: DateTime<Utc>) {
        self.stock_quantity = level.quantity();
        self.in_stock = level.in_stock();
        self.updated_at = at;
    }
}

/// A variant row carrying part of the attribute-level ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductVariant {
    pub id: VariantId,
    pub product_id: ProductId,
    pub primary_attribute: String,
    pub primary_values: Vec<PrimaryValue>,
    /// Non-stock-affecting attributes (e.g. engraving options).
    pub multi_values: BTreeMap<String, Vec<String>>,
    /// Overrides the product price when set.
    pub price: Option<Decimal>,
}

impl ProductVariant {
    /// A variant with no price override or extra attributes.
    #[must_use]
    pub fn new(
        id: VariantId,
        product_id: ProductId,
        primary_attribute: impl Into<String>,
        primary_values: Vec<PrimaryValue>,
    ) -> Self {
        Self {
            id,
            product_id,
            primary_attribute: primary_attribute.into(),
            primary_values,
            multi_values: BTreeMap::new(),
            price: None,
        }
    }

    /// Set a price override.
    #[must_use]
    pub const fn with_price(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }
}

/// A product together with its variants: everything needed to answer an
/// availability question or to price a cart line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductStock {
    pub product: Product,
    pub variants: Vec<ProductVariant>,
}

impl ProductStock {
    /// Live availability.
    #[must_use]
    pub fn availability(&self) -> Availability {
        Availability::from_ledger(
            self.product.stock_level(),
            self.variants.iter().map(|v| v.primary_values.as_slice()),
        )
    }

    /// Authoritative unit price for a cart selector.
    #[must_use]
    pub fn unit_price(&self, variant: &VariantKey) -> Decimal {
        variant
            .variant_id()
            .and_then(|id| self.variants.iter().find(|v| v.id == id))
            .and_then(|v| v.price)
            .unwrap_or(self.product.price)
    }

    /// Per-unit discount, clamped to `[0, unit_price]`.
    #[must_use]
    pub fn discount_for(&self, unit_price: Decimal) -> Decimal {
        self.product
            .discount_amount
            .max(Decimal::ZERO)
            .min(unit_price)
    }
}

/// Decode a stored `primary_values` document.
///
/// Entries that are not objects or lack an attribute name are dropped;
/// malformed quantities decode as 0.
#[must_use]
pub fn primary_values_from_json(value: Value) -> Vec<PrimaryValue> {
    let Value::Array(entries) = value else {
        return Vec::new();
    };
    entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<PrimaryValue>(entry) {
            Ok(pv) => Some(pv),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed primary value entry");
                None
            }
        })
        .collect()
}

/// Decode a stored `multi_values` document, ignoring anything malformed.
#[must_use]
pub fn multi_values_from_json(value: Value) -> BTreeMap<String, Vec<String>> {
    serde_json::from_value(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shirt() -> ProductStock {
        ProductStock {
            product: Product::new(ProductId::new(1), "Shirt", Decimal::new(2000, 2))
                .with_stock(Some(99))
                .with_discount(Decimal::new(500, 2)),
            variants: vec![
                ProductVariant::new(
                    VariantId::new(10),
                    ProductId::new(1),
                    "color",
                    vec![PrimaryValue::new("color", "red", 2)],
                )
                .with_price(Decimal::new(2500, 2)),
                ProductVariant::new(
                    VariantId::new(11),
                    ProductId::new(1),
                    "color",
                    vec![PrimaryValue::new("color", "blue", 3)],
                ),
            ],
        }
    }

    #[test]
    fn test_availability_sums_variants() {
        assert_eq!(shirt().availability().available, StockLevel::Limited(5));
    }

    #[test]
    fn test_variant_price_overrides_product_price() {
        let stock = shirt();
        assert_eq!(
            stock.unit_price(&VariantKey::for_variant(VariantId::new(10))),
            Decimal::new(2500, 2)
        );
        assert_eq!(
            stock.unit_price(&VariantKey::for_variant(VariantId::new(11))),
            Decimal::new(2000, 2)
        );
        assert_eq!(stock.unit_price(&VariantKey::default_key()), Decimal::new(2000, 2));
    }

    #[test]
    fn test_discount_is_clamped() {
        let stock = shirt();
        assert_eq!(stock.discount_for(Decimal::new(300, 2)), Decimal::new(300, 2));
        assert_eq!(stock.discount_for(Decimal::new(2000, 2)), Decimal::new(500, 2));
    }

    #[test]
    fn test_primary_values_from_json_skips_garbage() {
        let values = primary_values_from_json(json!([
            {"attribute": "size", "value": "M", "quantity": "4"},
            "not an object",
            {"value": "L", "quantity": 1},
            {"attribute": "size", "value": "S", "quantity": -3}
        ]));
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].quantity, 4);
        assert_eq!(values[1].quantity, 0);
        assert!(primary_values_from_json(json!({"oops": true})).is_empty());
    }
}
