//! Payment reconciliation.
//!
//! A confirmation moves an order's payment status under a row lock. Stock is
//! decremented only on the transition that first marks the order paid, so a
//! provider retrying the same callback never decrements twice.

use std::sync::Arc;

use chrono::Utc;
use orchard_core::{
    DecrementPath, OrderId, OrderStatus, PaymentStatus, PickupId, ProductId, ReferenceId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use super::CommerceError;
use super::cache::{CacheKey, ReadCache};
use super::inventory::StockLedger;
use crate::db::{OrderRepository, PaymentLogRepository, Repositories};
use crate::models::{NewPaymentTransaction, Order, PaymentTransition, PaymentUpdate};

/// Payment provider confirmation for one order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentConfirmation {
    pub reference_id: ReferenceId,
    pub status: String,
    #[serde(default)]
    pub payment_id: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
}

/// Units a paid order could not take from the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StockShortfall {
    pub product_id: ProductId,
    pub requested: u32,
    pub shortfall: u32,
}

/// Order state after a confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderStatusPayload {
    pub order_id: OrderId,
    pub reference_id: ReferenceId,
    pub pickup_id: PickupId,
    pub payment_status: PaymentStatus,
    pub status: OrderStatus,
    /// Whether this confirmation decremented stock.
    pub stock_applied: bool,
    pub stock_shortfalls: Vec<StockShortfall>,
}

impl OrderStatusPayload {
    fn new(order: &Order, stock_applied: bool, stock_shortfalls: Vec<StockShortfall>) -> Self {
        Self {
            order_id: order.id.clone(),
            reference_id: order.reference_id.clone(),
            pickup_id: order.pickup_id.clone(),
            payment_status: order.payment_status,
            status: order.status,
            stock_applied,
            stock_shortfalls,
        }
    }
}

/// Applies payment confirmations to orders and the stock ledger.
#[derive(Clone)]
pub struct PaymentReconciler {
    orders: Arc<dyn OrderRepository>,
    payments: Arc<dyn PaymentLogRepository>,
    ledger: StockLedger,
    cache: ReadCache,
}

impl PaymentReconciler {
    #[must_use]
    pub fn new(repos: &Repositories, ledger: StockLedger, cache: ReadCache) -> Self {
        Self {
            orders: Arc::clone(&repos.orders),
            payments: Arc::clone(&repos.payments),
            ledger,
            cache,
        }
    }

    /// Apply a confirmation.
    ///
    /// Stock is decremented once per order, on the first transition into
    /// `paid`. A paid order ignores later `pending` or `failed` callbacks. Decrement and log failures are logged and do not fail the
    /// confirmation; the status change has already been committed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStatus` for an unknown status, `NotFound` for an unknown
    /// reference and `Repository` when the status update fails.
    #[instrument(
        skip(self, confirmation),
        fields(reference_id = %confirmation.reference_id, status = %confirmation.status)
    )]
    pub async fn confirm_payment(
        &self,
        confirmation: PaymentConfirmation,
    ) -> Result<OrderStatusPayload, CommerceError> {
        let payment_status = PaymentStatus::parse_transition(&confirmation.status)
            .map_err(|e| CommerceError::InvalidStatus(e.to_string()))?;

        let now = Utc::now();
        let update = PaymentUpdate {
            payment_status,
            payment_id: confirmation.payment_id.clone(),
            payment_method: confirmation.payment_method.clone(),
            at: now,
        };

        let transition = self
            .orders
            .transition_payment(&confirmation.reference_id, &update)
            .await?
            .ok_or_else(|| {
                CommerceError::NotFound(format!("order with reference {}", confirmation.reference_id))
            })?;

        if !transition.previous.accepts(payment_status) {
            warn!(
                order_id = %transition.order.id,
                requested = %payment_status,
                "Ignoring payment status change on a paid order"
            );
        }

        let (stock_applied, shortfalls) = if transition.newly_paid() {
            self.apply_stock(&transition).await
        } else {
            (false, Vec::new())
        };

        let order = &transition.order;
        if let Some(amount) = confirmation.amount
            && amount != order.total_amount
        {
            warn!(
                order_id = %order.id,
                expected = %order.total_amount,
                received = %amount,
                "Payment amount differs from order total"
            );
        }

        let entry = NewPaymentTransaction {
            user_id: order.user_id,
            order_id: order.id.clone(),
            payment_id: confirmation.payment_id.or_else(|| order.payment_id.clone()),
            amount: confirmation.amount.unwrap_or(order.total_amount),
            status: payment_status,
            method: Some(
                confirmation
                    .payment_method
                    .unwrap_or_else(|| order.payment_method.clone()),
            ),
            created_at: now,
        };
        if let Err(e) = self.payments.append(&entry).await {
            warn!(error = %e, order_id = %order.id, "Failed to append payment log entry");
        }

        if let Some(user_id) = order.user_id {
            self.cache.invalidate(CacheKey::Orders(user_id)).await;
        }

        info!(
            order_id = %order.id,
            previous = %transition.previous,
            payment_status = %order.payment_status,
            order_status = %order.status,
            stock_applied,
            "Payment confirmation applied"
        );

        Ok(OrderStatusPayload::new(order, stock_applied, shortfalls))
    }

    async fn apply_stock(&self, transition: &PaymentTransition) -> (bool, Vec<StockShortfall>) {
        let order = &transition.order;
        let items = match self.orders.items(&order.id).await {
            Ok(items) => items,
            Err(e) => {
                error!(
                    error = %e,
                    order_id = %order.id,
                    "Order paid but its lines could not be loaded; stock not decremented"
                );
                return (false, Vec::new());
            }
        };

        let mut shortfalls = Vec::new();
        for item in &items {
            match self
                .ledger
                .decrement(item.product_id, item.quantity, Some(&item.variant_attributes))
                .await
            {
                Ok(result) => {
                    if result.path == DecrementPath::Unmatched {
                        warn!(
                            order_id = %order.id,
                            product_id = %item.product_id,
                            "No attribute entry matched the order line"
                        );
                    }
                    if result.shortfall > 0 {
                        warn!(
                            order_id = %order.id,
                            product_id = %item.product_id,
                            requested = item.quantity,
                            shortfall = result.shortfall,
                            "Stock exhausted while fulfilling paid order"
                        );
                        shortfalls.push(StockShortfall {
                            product_id: item.product_id,
                            requested: item.quantity,
                            shortfall: result.shortfall,
                        });
                    }
                }
                Err(e) => {
                    error!(
                        error = %e,
                        order_id = %order.id,
                        product_id = %item.product_id,
                        "Stock decrement failed for paid order"
                    );
                }
            }
        }
        (true, shortfalls)
    }
}
