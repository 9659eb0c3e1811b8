//! Payment transaction log for `PostgreSQL`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchard_core::{OrderId, PaymentStatus, PaymentTransactionId, UserId};
use rust_decimal::Decimal;
use sqlx::PgPool;

use super::{PaymentLogRepository, RepositoryError};
use crate::models::{NewPaymentTransaction, PaymentTransaction};

const PAYMENT_COLUMNS: &str =
    "id, user_id, order_id, payment_id, amount, status, method, created_at";

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: i32,
    user_id: Option<i32>,
    order_id: String,
    payment_id: Option<String>,
    amount: Decimal,
    status: String,
    method: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for PaymentTransaction {
    type Error = RepositoryError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<PaymentStatus>().map_err(|e| {
            RepositoryError::DataCorruption(format!("payment transaction {}: {e}", row.id))
        })?;
        Ok(Self {
            id: PaymentTransactionId::new(row.id),
            user_id: row.user_id.map(UserId::new),
            order_id: OrderId::new(row.order_id),
            payment_id: row.payment_id,
            amount: row.amount,
            status,
            method: row.method,
            created_at: row.created_at,
        })
    }
}

/// `PostgreSQL` implementation of [`PaymentLogRepository`].
#[derive(Clone)]
pub struct PgPaymentLogRepository {
    pool: PgPool,
}

impl PgPaymentLogRepository {
    /// Create a new payment log repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentLogRepository for PgPaymentLogRepository {
    async fn append(
        &self,
        entry: &NewPaymentTransaction,
    ) -> Result<PaymentTransaction, RepositoryError> {
        sqlx::query_as::<_, PaymentRow>(&format!(
            "INSERT INTO payment_transaction \
                 (user_id, order_id, payment_id, amount, status, method, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(entry.user_id)
        .bind(&entry.order_id)
        .bind(entry.payment_id.as_deref())
        .bind(entry.amount)
        .bind(entry.status.as_str())
        .bind(entry.method.as_deref())
        .bind(entry.created_at)
        .fetch_one(&self.pool)
        .await?
        .try_into()
    }

    async fn list_for_order(
        &self,
        order_id: &OrderId,
    ) -> Result<Vec<PaymentTransaction>, RepositoryError> {
        sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payment_transaction WHERE order_id = $1 ORDER BY id"
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(PaymentTransaction::try_from)
        .collect()
    }
}
