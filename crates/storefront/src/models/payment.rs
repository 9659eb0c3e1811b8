//! Append-only payment transaction log.

use chrono::{DateTime, Utc};
use orchard_core::{OrderId, PaymentStatus, PaymentTransactionId, UserId};
use rust_decimal::Decimal;
use serde::Serialize;

/// A logged payment event. Never mutated after insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentTransaction {
    pub id: PaymentTransactionId,
    pub user_id: Option<UserId>,
    pub order_id: OrderId,
    pub payment_id: Option<String>,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub method: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Values for a new log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPaymentTransaction {
    pub user_id: Option<UserId>,
    pub order_id: OrderId,
    pub payment_id: Option<String>,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub method: Option<String>,
    pub created_at: DateTime<Utc>,
}
