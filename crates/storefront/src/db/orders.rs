//! Order repository for `PostgreSQL`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchard_core::{
    AttributeSelection, CurrencyCode, DeliveryOption, OrderId, OrderItemId, OrderStatus,
    PaymentStatus, PickupId, ProductId, ReferenceId, UserId, VariantKey,
};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::instrument;

use super::{OrderRepository, RepositoryError, quantity_from_column, quantity_to_column};
use crate::models::{
    NewOrder, NewOrderItem, Order, OrderDetail, OrderItem, PaymentTransition, PaymentUpdate,
    ShippingAddress,
};

const ORDER_COLUMNS: &str = "id, user_id, reference_id, pickup_id, total_amount, currency, \
     shipping_address, delivery_option, payment_method, payment_status, payment_id, status, \
     created_at, updated_at";

const ORDER_ITEM_COLUMNS: &str = "id, order_id, product_id, product_name, variant_id, \
     variant_attributes, quantity, unit_price, total_price";

/// Order statuses a payment update never overrides.
const FULFILMENT_STATUSES: &str = "'shipped', 'ready_for_pickup', 'delivered', 'picked_up'";

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: String,
    user_id: Option<i32>,
    reference_id: String,
    pickup_id: String,
    total_amount: Decimal,
    currency: String,
    shipping_address: Option<serde_json::Value>,
    delivery_option: String,
    payment_method: String,
    payment_status: String,
    payment_id: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn corrupt(order_id: &str, what: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::DataCorruption(format!("order {order_id}: {what}"))
}

impl TryFrom<OrderRow> for Order {
    type Error = RepositoryError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let shipping_address = row
            .shipping_address
            .map(serde_json::from_value::<ShippingAddress>)
            .transpose()
            .map_err(|e| corrupt(&row.id, e))?;

        Ok(Self {
            currency: row
                .currency
                .parse::<CurrencyCode>()
                .map_err(|e| corrupt(&row.id, e))?,
            delivery_option: row
                .delivery_option
                .parse::<DeliveryOption>()
                .map_err(|e| corrupt(&row.id, e))?,
            payment_status: row
                .payment_status
                .parse::<PaymentStatus>()
                .map_err(|e| corrupt(&row.id, e))?,
            status: row
                .status
                .parse::<OrderStatus>()
                .map_err(|e| corrupt(&row.id, e))?,
            id: OrderId::new(row.id),
            user_id: row.user_id.map(UserId::new),
            reference_id: ReferenceId::new(row.reference_id),
            pickup_id: PickupId::new(row.pickup_id),
            total_amount: row.total_amount,
            shipping_address,
            payment_method: row.payment_method,
            payment_id: row.payment_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    id: i32,
    order_id: String,
    product_id: i32,
    product_name: String,
    variant_id: String,
    variant_attributes: serde_json::Value,
    quantity: i32,
    unit_price: Decimal,
    total_price: Decimal,
}

impl TryFrom<OrderItemRow> for OrderItem {
    type Error = RepositoryError;

    fn try_from(row: OrderItemRow) -> Result<Self, Self::Error> {
        let variant_attributes: AttributeSelection =
            serde_json::from_value(row.variant_attributes).map_err(|e| corrupt(&row.order_id, e))?;
        Ok(Self {
            id: OrderItemId::new(row.id),
            product_id: ProductId::new(row.product_id),
            product_name: row.product_name,
            variant_id: VariantKey::from_option(Some(&row.variant_id)),
            variant_attributes,
            quantity: quantity_from_column(row.quantity, "order item quantity")?,
            unit_price: row.unit_price,
            total_price: row.total_price,
            order_id: OrderId::new(row.order_id),
        })
    }
}

#[derive(sqlx::FromRow)]
struct TransitionRow {
    previous_payment_status: String,
    #[sqlx(flatten)]
    order: OrderRow,
}

fn orders_from_rows(rows: Vec<OrderRow>) -> Result<Vec<Order>, RepositoryError> {
    rows.into_iter().map(Order::try_from).collect()
}

/// `PostgreSQL` implementation of [`OrderRepository`].
#[derive(Clone)]
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    /// Create a new order repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    async fn insert_order(&self, order: &NewOrder) -> Result<Order, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "INSERT INTO orders \
                 (id, user_id, reference_id, pickup_id, total_amount, currency, shipping_address, \
                  delivery_option, payment_method, payment_status, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'pending', 'pending', $10, $10) \
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(&order.id)
        .bind(order.user_id)
        .bind(&order.reference_id)
        .bind(&order.pickup_id)
        .bind(order.total_amount)
        .bind(order.currency.code())
        .bind(order.shipping_address.as_ref().map(Json))
        .bind(order.delivery_option.as_str())
        .bind(&order.payment_method)
        .bind(order.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::from_insert(e, "order"))?;

        row.try_into()
    }

    #[instrument(skip(self, items), fields(order_id = %order_id, count = items.len()))]
    async fn insert_items(
        &self,
        order_id: &OrderId,
        items: &[NewOrderItem],
    ) -> Result<Vec<OrderItem>, RepositoryError> {
        if items.is_empty() {
            return Err(RepositoryError::Conflict(
                "an order needs at least one item".to_owned(),
            ));
        }

        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "INSERT INTO order_item (order_id, product_id, product_name, variant_id, \
             variant_attributes, quantity, unit_price, total_price) ",
        );
        builder.push_values(items, |mut row, item| {
            row.push_bind(order_id.as_str())
                .push_bind(item.product_id)
                .push_bind(item.product_name.as_str())
                .push_bind(item.variant_id.as_str())
                .push_bind(Json(&item.variant_attributes))
                .push_bind(quantity_to_column(item.quantity))
                .push_bind(item.unit_price)
                .push_bind(item.total_price);
        });
        builder.push(format!(" RETURNING {ORDER_ITEM_COLUMNS}"));

        builder
            .build_query_as::<OrderItemRow>()
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(OrderItem::try_from)
            .collect()
    }

    #[instrument(skip(self), fields(order_id = %id))]
    async fn delete_order(&self, id: &OrderId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_by_reference(
        &self,
        reference_id: &ReferenceId,
    ) -> Result<Option<Order>, RepositoryError> {
        sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE reference_id = $1"
        ))
        .bind(reference_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Order::try_from)
        .transpose()
    }

    async fn items(&self, order_id: &OrderId) -> Result<Vec<OrderItem>, RepositoryError> {
        sqlx::query_as::<_, OrderItemRow>(&format!(
            "SELECT {ORDER_ITEM_COLUMNS} FROM order_item WHERE order_id = $1 ORDER BY id"
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(OrderItem::try_from)
        .collect()
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<OrderDetail>, RepositoryError> {
        let orders = orders_from_rows(
            sqlx::query_as::<_, OrderRow>(&format!(
                "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC"
            ))
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?,
        )?;
        if orders.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<&str> = orders.iter().map(|o| o.id.as_str()).collect();
        let items = sqlx::query_as::<_, OrderItemRow>(&format!(
            "SELECT {ORDER_ITEM_COLUMNS} FROM order_item WHERE order_id = ANY($1) ORDER BY id"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_order: HashMap<OrderId, Vec<OrderItem>> = HashMap::new();
        for item in items {
            let item = OrderItem::try_from(item)?;
            by_order.entry(item.order_id.clone()).or_default().push(item);
        }

        Ok(orders
            .into_iter()
            .map(|order| {
                let items = by_order.remove(&order.id).unwrap_or_default();
                OrderDetail { order, items }
            })
            .collect())
    }

    #[instrument(skip(self, update), fields(reference_id = %reference_id, payment_status = %update.payment_status))]
    async fn transition_payment(
        &self,
        reference_id: &ReferenceId,
        update: &PaymentUpdate,
    ) -> Result<Option<PaymentTransition>, RepositoryError> {
        // The sub-select locks the row and captures the pre-update status in
        // the same statement, so duplicate callbacks see each other's writes.
        // A paid row only matches a repeated paid.
        let returning = ORDER_COLUMNS
            .split(',')
            .map(|column| format!("o.{}", column.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        let row = sqlx::query_as::<_, TransitionRow>(&format!(
            "UPDATE orders o SET \
                 payment_status = $2, \
                 status = CASE WHEN o.status IN ({FULFILMENT_STATUSES}) THEN o.status ELSE $3 END, \
                 payment_id = COALESCE($4, o.payment_id), \
                 payment_method = COALESCE($5, o.payment_method), \
                 updated_at = $6 \
             FROM (SELECT id, payment_status FROM orders WHERE reference_id = $1 FOR UPDATE) prev \
             WHERE o.id = prev.id AND (prev.payment_status <> 'paid' OR $2 = 'paid') \
             RETURNING prev.payment_status AS previous_payment_status, {returning}"
        ))
        .bind(reference_id)
        .bind(update.payment_status.as_str())
        .bind(update.target_status().as_str())
        .bind(update.payment_id.as_deref())
        .bind(update.payment_method.as_deref())
        .bind(update.at)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            // Either no such reference or a paid order refusing the change.
            // Paid is final, so the re-read cannot race another transition.
            return Ok(self
                .find_by_reference(reference_id)
                .await?
                .map(|order| PaymentTransition {
                    previous: order.payment_status,
                    order,
                }));
        };
        let previous = row
            .previous_payment_status
            .parse::<PaymentStatus>()
            .map_err(|e| corrupt(&row.order.id, e))?;
        Ok(Some(PaymentTransition {
            previous,
            order: row.order.try_into()?,
        }))
    }

    #[instrument(skip(self))]
    async fn fail_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Order>, RepositoryError> {
        orders_from_rows(
            sqlx::query_as::<_, OrderRow>(&format!(
                "UPDATE orders SET payment_status = 'failed', updated_at = $2 \
                 WHERE payment_status = 'pending' AND created_at < $1 \
                 RETURNING {ORDER_COLUMNS}"
            ))
            .bind(cutoff)
            .bind(now)
            .fetch_all(&self.pool)
            .await?,
        )
    }

    #[instrument(skip(self))]
    async fn delete_stale_failed(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Order>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM order_item WHERE order_id IN \
             (SELECT id FROM orders WHERE payment_status = 'failed' AND created_at < $1)",
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;

        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "DELETE FROM orders WHERE payment_status = 'failed' AND created_at < $1 \
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        orders_from_rows(rows)
    }
}
