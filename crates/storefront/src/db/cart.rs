//! Cart repository for `PostgreSQL`.
//!
//! The add path relies on `INSERT ... ON CONFLICT DO UPDATE` so concurrent
//! increments of the same `(user_id, product_id, variant_id)` key are
//! linearized by the database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchard_core::{
    AttributeSelection, CartItemId, CurrencyCode, ProductId, UserId, VariantKey,
};
use rust_decimal::Decimal;
use sqlx::PgPool;
use sqlx::types::Json;
use tracing::instrument;

use super::{CartRepository, RepositoryError, quantity_from_column, quantity_to_column};
use crate::models::{CartItem, CartKey, NewCartLine};

const CART_COLUMNS: &str = "id, user_id, product_id, variant_id, variant_attributes, quantity, \
     price, currency, applied_discount, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct CartItemRow {
    id: i32,
    user_id: i32,
    product_id: i32,
    variant_id: String,
    variant_attributes: serde_json::Value,
    quantity: i32,
    price: Decimal,
    currency: String,
    applied_discount: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CartItemRow> for CartItem {
    type Error = RepositoryError;

    fn try_from(row: CartItemRow) -> Result<Self, Self::Error> {
        let variant_attributes: AttributeSelection =
            serde_json::from_value(row.variant_attributes).map_err(|e| {
                RepositoryError::DataCorruption(format!(
                    "cart item {}: invalid variant attributes: {e}",
                    row.id
                ))
            })?;
        let currency = row.currency.parse::<CurrencyCode>().map_err(|e| {
            RepositoryError::DataCorruption(format!("cart item {}: {e}", row.id))
        })?;

        Ok(Self {
            id: CartItemId::new(row.id),
            user_id: UserId::new(row.user_id),
            product_id: ProductId::new(row.product_id),
            variant_id: VariantKey::from_option(Some(&row.variant_id)),
            variant_attributes,
            quantity: quantity_from_column(row.quantity, "cart quantity")?,
            price: row.price,
            currency,
            applied_discount: row.applied_discount,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// `PostgreSQL` implementation of [`CartRepository`].
#[derive(Clone)]
pub struct PgCartRepository {
    pool: PgPool,
}

impl PgCartRepository {
    /// Create a new cart repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CartRepository for PgCartRepository {
    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn list(&self, user_id: UserId) -> Result<Vec<CartItem>, RepositoryError> {
        sqlx::query_as::<_, CartItemRow>(&format!(
            "SELECT {CART_COLUMNS} FROM cart_item WHERE user_id = $1 ORDER BY created_at, id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(CartItem::try_from)
        .collect()
    }

    async fn find(&self, key: &CartKey) -> Result<Option<CartItem>, RepositoryError> {
        sqlx::query_as::<_, CartItemRow>(&format!(
            "SELECT {CART_COLUMNS} FROM cart_item \
             WHERE user_id = $1 AND product_id = $2 AND variant_id = $3"
        ))
        .bind(key.user_id)
        .bind(key.product_id)
        .bind(key.variant_id.as_str())
        .fetch_optional(&self.pool)
        .await?
        .map(CartItem::try_from)
        .transpose()
    }

    async fn find_by_id(&self, id: CartItemId) -> Result<Option<CartItem>, RepositoryError> {
        sqlx::query_as::<_, CartItemRow>(&format!(
            "SELECT {CART_COLUMNS} FROM cart_item WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(CartItem::try_from)
        .transpose()
    }

    #[instrument(skip(self, line), fields(user_id = %line.key.user_id, product_id = %line.key.product_id))]
    async fn upsert_increment(
        &self,
        line: &NewCartLine,
        cap: Option<u32>,
    ) -> Result<CartItem, RepositoryError> {
        // The WHERE on the conflict branch turns a stale capacity read into a
        // no-op, which surfaces as zero returned rows.
        let row = sqlx::query_as::<_, CartItemRow>(&format!(
            "INSERT INTO cart_item \
                 (user_id, product_id, variant_id, variant_attributes, quantity, price, currency, applied_discount) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (user_id, product_id, variant_id) DO UPDATE SET \
                 quantity = cart_item.quantity + EXCLUDED.quantity, \
                 variant_attributes = EXCLUDED.variant_attributes, \
                 price = EXCLUDED.price, \
                 currency = EXCLUDED.currency, \
                 applied_discount = EXCLUDED.applied_discount, \
                 updated_at = now() \
             WHERE $9::INTEGER IS NULL OR cart_item.quantity + EXCLUDED.quantity <= $9 \
             RETURNING {CART_COLUMNS}"
        ))
        .bind(line.key.user_id)
        .bind(line.key.product_id)
        .bind(line.key.variant_id.as_str())
        .bind(Json(&line.variant_attributes))
        .bind(quantity_to_column(line.quantity))
        .bind(line.price)
        .bind(line.currency.code())
        .bind(line.applied_discount)
        .bind(cap.map(quantity_to_column))
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepositoryError::Conflict("cart line exceeds available stock".to_owned()))?;

        row.try_into()
    }

    async fn insert(&self, line: &NewCartLine) -> Result<CartItem, RepositoryError> {
        let row = sqlx::query_as::<_, CartItemRow>(&format!(
            "INSERT INTO cart_item \
                 (user_id, product_id, variant_id, variant_attributes, quantity, price, currency, applied_discount) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {CART_COLUMNS}"
        ))
        .bind(line.key.user_id)
        .bind(line.key.product_id)
        .bind(line.key.variant_id.as_str())
        .bind(Json(&line.variant_attributes))
        .bind(quantity_to_column(line.quantity))
        .bind(line.price)
        .bind(line.currency.code())
        .bind(line.applied_discount)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::from_insert(e, "cart line"))?;

        row.try_into()
    }

    async fn set_quantity(
        &self,
        id: CartItemId,
        quantity: u32,
    ) -> Result<CartItem, RepositoryError> {
        sqlx::query_as::<_, CartItemRow>(&format!(
            "UPDATE cart_item SET quantity = $2, updated_at = now() WHERE id = $1 \
             RETURNING {CART_COLUMNS}"
        ))
        .bind(id)
        .bind(quantity_to_column(quantity))
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RepositoryError::NotFound)?
        .try_into()
    }

    async fn delete(&self, id: CartItemId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM cart_item WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, product_ids), fields(user_id = %user_id))]
    async fn clear(
        &self,
        user_id: UserId,
        product_ids: Option<&[ProductId]>,
    ) -> Result<u64, RepositoryError> {
        let result = match product_ids {
            Some(ids) => {
                let raw_ids: Vec<i32> = ids.iter().map(ProductId::as_i32).collect();
                sqlx::query("DELETE FROM cart_item WHERE user_id = $1 AND product_id = ANY($2)")
                    .bind(user_id)
                    .bind(raw_ids)
                    .execute(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("DELETE FROM cart_item WHERE user_id = $1")
                    .bind(user_id)
                    .execute(&self.pool)
                    .await?
            }
        };
        Ok(result.rows_affected())
    }
}
