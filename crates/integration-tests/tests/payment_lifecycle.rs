//! Payment reconciliation and the pending/failed order lifecycle.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{TimeDelta, Utc};
use orchard_core::{
    AttributeSelection, OrderStatus, PaymentStatus, ProductId, ReferenceId, StockLevel, UserId,
};
use orchard_integration_tests::{TestContext, order_line, pickup_checkout, user};
use orchard_storefront::config::{CommerceConfig, SupportContact};
use orchard_storefront::db::{MemoryStore, Repositories};
use orchard_storefront::services::{
    OrderStatusPayload, PaymentConfirmation, RateDecision, RateLimiter, Services,
};
use rust_decimal::Decimal;

fn confirmation(reference: &ReferenceId, status: &str) -> PaymentConfirmation {
    PaymentConfirmation {
        reference_id: reference.clone(),
        status: status.to_owned(),
        payment_id: Some("pay_789".to_owned()),
        payment_method: Some("card".to_owned()),
        amount: None,
    }
}

async fn stock_of(ctx: &TestContext, product: i32) -> StockLevel {
    ctx.services
        .ledger
        .availability(ProductId::new(product))
        .await
        .unwrap()
        .available
}

#[tokio::test]
async fn repeated_paid_callback_decrements_once() {
    let ctx = TestContext::new();
    ctx.product(1, "Mug", Decimal::TEN, Some(5)).await;
    ctx.add(1, 1, 2).await.unwrap();
    let summary = ctx
        .services
        .checkout
        .checkout("10.0.0.1", Some(&user(1)), pickup_checkout())
        .await
        .unwrap();

    let first = ctx
        .services
        .payments
        .confirm_payment(confirmation(&summary.reference_id, "paid"))
        .await
        .unwrap();
    let second = ctx
        .services
        .payments
        .confirm_payment(confirmation(&summary.reference_id, "success"))
        .await
        .unwrap();

    assert!(first.stock_applied);
    assert_eq!(first.payment_status, PaymentStatus::Paid);
    assert_eq!(first.status, OrderStatus::Confirmed);
    assert!(!second.stock_applied);
    assert_eq!(second.payment_status, PaymentStatus::Paid);
    assert_eq!(stock_of(&ctx, 1).await, StockLevel::Limited(3));
    assert_eq!(ctx.store.payment_log().await.len(), 2);

    let history = ctx.services.orders.list_for_user(UserId::new(1)).await.unwrap();
    assert_eq!(history[0].order.payment_status, PaymentStatus::Paid);
}

async fn replay_callbacks(ctx: &TestContext, statuses: &[&str]) -> Vec<OrderStatusPayload> {
    ctx.product(1, "Mug", Decimal::TEN, Some(5)).await;
    ctx.add(1, 1, 2).await.unwrap();
    let summary = ctx
        .services
        .checkout
        .checkout("10.0.0.1", Some(&user(1)), pickup_checkout())
        .await
        .unwrap();

    let mut payloads = Vec::new();
    for status in statuses {
        payloads.push(
            ctx.services
                .payments
                .confirm_payment(confirmation(&summary.reference_id, status))
                .await
                .unwrap(),
        );
    }
    payloads
}

#[tokio::test]
async fn late_pending_callback_does_not_redecrement_on_next_paid() {
    let ctx = TestContext::new();

    let payloads = replay_callbacks(&ctx, &["paid", "pending", "paid"]).await;

    assert!(payloads[0].stock_applied);
    assert_eq!(payloads[1].payment_status, PaymentStatus::Paid);
    assert_eq!(payloads[1].status, OrderStatus::Confirmed);
    assert!(!payloads[2].stock_applied);
    assert_eq!(stock_of(&ctx, 1).await, StockLevel::Limited(3));
}

#[tokio::test]
async fn late_failed_callback_does_not_cancel_a_paid_order() {
    let ctx = TestContext::new();

    let payloads = replay_callbacks(&ctx, &["paid", "failed", "paid"]).await;

    assert_eq!(payloads[1].payment_status, PaymentStatus::Paid);
    assert_eq!(payloads[1].status, OrderStatus::Confirmed);
    assert!(!payloads[1].stock_applied);
    assert!(!payloads[2].stock_applied);
    assert_eq!(stock_of(&ctx, 1).await, StockLevel::Limited(3));
    assert_eq!(ctx.store.payment_log().await.len(), 3);
}

#[tokio::test]
async fn janitor_keeps_paid_order_after_late_callbacks() {
    let ctx = TestContext::new();
    replay_callbacks(&ctx, &["paid", "pending", "failed"]).await;

    let report = ctx
        .services
        .janitor
        .sweep_at(Utc::now() + TimeDelta::days(2))
        .await
        .unwrap();

    assert_eq!(report.failed_count, 0);
    assert_eq!(report.deleted_count, 0);
    let history = ctx.services.orders.list_for_user(UserId::new(1)).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].order.payment_status, PaymentStatus::Paid);
    assert_eq!(history[0].order.status, OrderStatus::Confirmed);
    assert_eq!(stock_of(&ctx, 1).await, StockLevel::Limited(3));
}

#[tokio::test]
async fn failed_payment_leaves_stock_untouched() {
    let ctx = TestContext::new();
    ctx.product(1, "Mug", Decimal::TEN, Some(5)).await;
    let line = [order_line(1, 2, AttributeSelection::empty())];
    ctx.order_at("fail", 1, Utc::now(), &line).await;

    let payload = ctx
        .services
        .payments
        .confirm_payment(confirmation(&ReferenceId::new("REF-fail"), "failed"))
        .await
        .unwrap();

    assert!(!payload.stock_applied);
    assert_eq!(payload.payment_status, PaymentStatus::Failed);
    assert_eq!(payload.status, OrderStatus::Cancelled);
    assert_eq!(stock_of(&ctx, 1).await, StockLevel::Limited(5));
}

#[tokio::test]
async fn attribute_decrement_keeps_aggregate_equal_to_entries() {
    let ctx = TestContext::new();
    ctx.product_with_entries(1, 10, "size", &[("S", 2), ("M", 4), ("L", 1)])
        .await;
    assert_eq!(stock_of(&ctx, 1).await, StockLevel::Limited(7));
    ctx.order_at(
        "size",
        1,
        Utc::now(),
        &[order_line(1, 3, AttributeSelection::new([("size", "M")]))],
    )
    .await;

    let payload = ctx
        .services
        .payments
        .confirm_payment(confirmation(&ReferenceId::new("REF-size"), "paid"))
        .await
        .unwrap();

    assert!(payload.stock_applied);
    assert!(payload.stock_shortfalls.is_empty());
    let entries = &ctx.store.variants(ProductId::new(1)).await[0].primary_values;
    let quantities: Vec<_> = entries.iter().map(|e| e.quantity).collect();
    assert_eq!(quantities, vec![2, 1, 1]);
    let product = ctx.store.product(ProductId::new(1)).await.unwrap();
    assert_eq!(product.stock_level(), StockLevel::Limited(4));
    assert_eq!(stock_of(&ctx, 1).await, StockLevel::Limited(4));
}

#[tokio::test]
async fn janitor_fails_pending_orders_after_an_hour() {
    let ctx = TestContext::new();
    let now = Utc::now();
    ctx.order_at("fresh", 1, now - TimeDelta::minutes(59), &[]).await;
    ctx.order_at("stale", 1, now - TimeDelta::minutes(61), &[]).await;

    let report = ctx.services.janitor.sweep_at(now).await.unwrap();

    assert_eq!(report.failed_count, 1);
    assert_eq!(report.deleted_count, 0);
    let orders = ctx.store.orders().await;
    let status = |code: &str| {
        orders
            .iter()
            .find(|o| o.id.as_str() == format!("ORD-{code}"))
            .map(|o| o.payment_status)
    };
    assert_eq!(status("fresh"), Some(PaymentStatus::Pending));
    assert_eq!(status("stale"), Some(PaymentStatus::Failed));
}

#[tokio::test]
async fn janitor_deletes_failed_orders_after_a_day() {
    let ctx = TestContext::new();
    let now = Utc::now();
    let line = [order_line(1, 1, AttributeSelection::empty())];
    ctx.order_at("recent", 1, now - TimeDelta::hours(23), &line).await;
    ctx.order_at("old", 1, now - TimeDelta::hours(25), &line).await;

    let report = ctx.services.janitor.sweep_at(now).await.unwrap();

    assert_eq!(report.failed_count, 2);
    assert_eq!(report.deleted_count, 1);
    let orders = ctx.store.orders().await;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].id.as_str(), "ORD-recent");
    assert_eq!(ctx.store.order_item_count().await, 1);

    // Order history no longer shows the deleted order.
    let history = ctx.services.orders.list_for_user(UserId::new(1)).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[derive(Default)]
struct PruneCounter(AtomicUsize);

impl RateLimiter for PruneCounter {
    fn check(&self, _key: &str) -> RateDecision {
        RateDecision {
            allowed: true,
            remaining: 1,
            retry_after: None,
        }
    }

    fn prune(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn janitor_tick_prunes_the_checkout_limiter() {
    let store = Arc::new(MemoryStore::new());
    let repos = Repositories::in_memory(&store);
    let limiter = Arc::new(PruneCounter::default());
    let services = Services::with_rate_limiter(
        &repos,
        &CommerceConfig::default(),
        SupportContact {
            email: None,
            phone: None,
        },
        limiter.clone(),
    );

    services.janitor.tick().await;

    assert_eq!(limiter.0.load(Ordering::SeqCst), 1);
}
