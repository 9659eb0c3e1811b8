//! Product and stock ledger repository for `PostgreSQL`.
//!
//! Ledger writes lock the product row (`SELECT ... FOR UPDATE`) before reading
//! the variants, so concurrent decrements and manual edits of the same product
//! are serialized and the aggregate is always recomputed from the entries.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchard_core::{
    Availability, AttributeSelection, CurrencyCode, DecrementPath, LedgerDecrement, PrimaryValue,
    ProductId, StockLevel, VariantId, apply_decrement,
};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::instrument;

use super::{ProductRepository, RepositoryError};
use crate::models::catalog::{multi_values_from_json, primary_values_from_json};
use crate::models::{Product, ProductStock, ProductVariant};

const PRODUCT_COLUMNS: &str = "id, name, price, currency, discount_amount, stock_quantity, \
     in_stock, return_time_type, return_time_value, created_at, updated_at";

const VARIANT_COLUMNS: &str =
    "id, product_id, primary_attribute, primary_values, multi_values, price";

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: i32,
    name: String,
    price: Decimal,
    currency: String,
    discount_amount: Decimal,
    stock_quantity: Option<i32>,
    in_stock: bool,
    return_time_type: Option<String>,
    return_time_value: Option<i32>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProductRow> for Product {
    type Error = RepositoryError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        let currency = row.currency.parse::<CurrencyCode>().map_err(|e| {
            RepositoryError::DataCorruption(format!("product {}: {e}", row.id))
        })?;
        Ok(Self {
            id: ProductId::new(row.id),
            name: row.name,
            price: row.price,
            currency,
            discount_amount: row.discount_amount,
            // Negative stored stock is treated as empty rather than rejected.
            stock_quantity: StockLevel::from_column(row.stock_quantity).quantity(),
            in_stock: row.in_stock,
            return_time_type: row.return_time_type,
            return_time_value: row.return_time_value,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct VariantRow {
    id: i32,
    product_id: i32,
    primary_attribute: String,
    primary_values: serde_json::Value,
    multi_values: serde_json::Value,
    price: Option<Decimal>,
}

impl From<VariantRow> for ProductVariant {
    fn from(row: VariantRow) -> Self {
        Self {
            id: VariantId::new(row.id),
            product_id: ProductId::new(row.product_id),
            primary_attribute: row.primary_attribute,
            primary_values: primary_values_from_json(row.primary_values),
            multi_values: multi_values_from_json(row.multi_values),
            price: row.price,
        }
    }
}

/// `PostgreSQL` implementation of [`ProductRepository`].
#[derive(Clone)]
pub struct PgProductRepository {
    pool: PgPool,
}

impl PgProductRepository {
    /// Create a new product repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Lock a product row and load its variants inside `tx`.
    async fn lock_stock(
        tx: &mut Transaction<'_, Postgres>,
        id: ProductId,
    ) -> Result<ProductStock, RepositoryError> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM product WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(RepositoryError::NotFound)?;

        let variants = sqlx::query_as::<_, VariantRow>(&format!(
            "SELECT {VARIANT_COLUMNS} FROM product_variant WHERE product_id = $1 ORDER BY id FOR UPDATE"
        ))
        .bind(id)
        .fetch_all(&mut **tx)
        .await?;

        Ok(ProductStock {
            product: row.try_into()?,
            variants: variants.into_iter().map(ProductVariant::from).collect(),
        })
    }

    async fn write_variants(
        tx: &mut Transaction<'_, Postgres>,
        variants: &[ProductVariant],
    ) -> Result<(), RepositoryError> {
        for variant in variants {
            sqlx::query(
                "UPDATE product_variant SET primary_values = $2, updated_at = now() WHERE id = $1",
            )
            .bind(variant.id)
            .bind(Json(&variant.primary_values))
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    async fn write_aggregate(
        tx: &mut Transaction<'_, Postgres>,
        id: ProductId,
        level: StockLevel,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE product SET stock_quantity = $2, in_stock = $3, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(level.to_column())
        .bind(level.in_stock())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ProductRepository for PgProductRepository {
    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(product_id = %id))]
    async fn find_stock(&self, id: ProductId) -> Result<Option<ProductStock>, RepositoryError> {
        Ok(self.find_stock_many(&[id]).await?.into_iter().next())
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn find_stock_many(
        &self,
        ids: &[ProductId],
    ) -> Result<Vec<ProductStock>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let raw_ids: Vec<i32> = ids.iter().map(ProductId::as_i32).collect();

        let products = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM product WHERE id = ANY($1)"
        ))
        .bind(&raw_ids)
        .fetch_all(&self.pool)
        .await?;

        let variants = sqlx::query_as::<_, VariantRow>(&format!(
            "SELECT {VARIANT_COLUMNS} FROM product_variant WHERE product_id = ANY($1) ORDER BY id"
        ))
        .bind(&raw_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_product: HashMap<ProductId, Vec<ProductVariant>> = HashMap::new();
        for variant in variants.into_iter().map(ProductVariant::from) {
            by_product.entry(variant.product_id).or_default().push(variant);
        }

        products
            .into_iter()
            .map(|row| {
                let product = Product::try_from(row)?;
                let variants = by_product.remove(&product.id).unwrap_or_default();
                Ok(ProductStock { product, variants })
            })
            .collect()
    }

    #[instrument(skip(self, selection), fields(product_id = %id))]
    async fn apply_decrement(
        &self,
        id: ProductId,
        quantity: u32,
        selection: Option<&AttributeSelection>,
    ) -> Result<LedgerDecrement, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let mut stock = Self::lock_stock(&mut tx, id).await?;

        let mut ledgers: Vec<&mut [PrimaryValue]> = stock
            .variants
            .iter_mut()
            .map(|v| v.primary_values.as_mut_slice())
            .collect();
        let result = apply_decrement(stock.product.stock_level(), &mut ledgers, quantity, selection);

        if matches!(
            result.path,
            DecrementPath::Attributes { .. } | DecrementPath::Drained
        ) {
            Self::write_variants(&mut tx, &stock.variants).await?;
        }
        Self::write_aggregate(&mut tx, id, result.stock).await?;
        tx.commit().await?;

        Ok(result)
    }

    #[instrument(skip(self), fields(product_id = %id))]
    async fn set_product_stock(
        &self,
        id: ProductId,
        level: StockLevel,
    ) -> Result<Availability, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let stock = Self::lock_stock(&mut tx, id).await?;
        if stock.variants.iter().any(|v| !v.primary_values.is_empty()) {
            return Err(RepositoryError::Conflict(format!(
                "product {id} manages stock per attribute"
            )));
        }
        Self::write_aggregate(&mut tx, id, level).await?;
        tx.commit().await?;
        Ok(Availability::of(level))
    }

    #[instrument(skip(self), fields(product_id = %id, variant_id = %variant))]
    async fn set_variant_quantity(
        &self,
        id: ProductId,
        variant: VariantId,
        attribute: &str,
        value: &str,
        quantity: u32,
    ) -> Result<Availability, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let mut stock = Self::lock_stock(&mut tx, id).await?;

        let target = stock
            .variants
            .iter_mut()
            .find(|v| v.id == variant)
            .ok_or(RepositoryError::NotFound)?;
        let entry = target
            .primary_values
            .iter_mut()
            .find(|pv| pv.attribute == attribute && pv.value == value)
            .ok_or(RepositoryError::NotFound)?;
        entry.quantity = quantity;

        let changed = std::slice::from_ref(&*target);
        Self::write_variants(&mut tx, changed).await?;

        let availability = stock.availability();
        Self::write_aggregate(&mut tx, id, availability.available).await?;
        tx.commit().await?;
        Ok(availability)
    }
}
