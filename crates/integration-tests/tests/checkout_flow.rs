//! Checkout from cart to pending order, including rejection and compensation.

#![allow(clippy::unwrap_used)]

use orchard_core::{OrderStatus, PaymentStatus, ProductId, StockLevel, UserId};
use orchard_integration_tests::{TestContext, pickup_checkout, user};
use orchard_storefront::db::FailPoint;
use orchard_storefront::services::CommerceError;
use rust_decimal::Decimal;

#[tokio::test]
async fn checkout_turns_cart_into_pending_order() {
    let ctx = TestContext::new();
    ctx.product(1, "Mug", Decimal::TEN, Some(5)).await;
    ctx.product(2, "Sticker", Decimal::ONE, None).await;
    ctx.add(1, 1, 2).await.unwrap();
    ctx.add(1, 2, 4).await.unwrap();

    let summary = ctx
        .services
        .checkout
        .checkout("10.0.0.1", Some(&user(1)), pickup_checkout())
        .await
        .unwrap();

    assert_eq!(summary.total, Decimal::from(24));
    assert_eq!(summary.item_count, 6);
    assert_eq!(summary.status, OrderStatus::Pending);
    assert_eq!(summary.payment_status, PaymentStatus::Pending);
    assert!(summary.reference_id.as_str().starts_with("REF-"));

    // Stock is only taken once payment is confirmed.
    let availability = ctx
        .services
        .ledger
        .availability(ProductId::new(1))
        .await
        .unwrap();
    assert_eq!(availability.available, StockLevel::Limited(5));
    assert!(ctx.services.cart.list(UserId::new(1)).await.unwrap().is_empty());

    let history = ctx.services.orders.list_for_user(UserId::new(1)).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].items.len(), 2);
}

#[tokio::test]
async fn stock_drop_after_add_rejects_checkout() {
    let ctx = TestContext::new();
    ctx.product(1, "Mug", Decimal::TEN, Some(5)).await;
    ctx.add(1, 1, 3).await.unwrap();
    ctx.services
        .ledger
        .set_product_stock(ProductId::new(1), StockLevel::Limited(2))
        .await
        .unwrap();

    let err = ctx
        .services
        .checkout
        .checkout("10.0.0.1", Some(&user(1)), pickup_checkout())
        .await
        .unwrap_err();

    let CommerceError::StockConflict(lines) = err else {
        panic!("expected stock conflict, got {err}");
    };
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].product_id, ProductId::new(1));
    assert_eq!(lines[0].requested, 3);
    assert_eq!(lines[0].available, StockLevel::Limited(2));
    assert!(ctx.store.orders().await.is_empty());
    assert_eq!(ctx.cart_quantity(1, 1).await, 3);
}

#[tokio::test]
async fn failed_item_write_leaves_no_order_behind() {
    let ctx = TestContext::new();
    ctx.product(1, "Mug", Decimal::TEN, Some(5)).await;
    ctx.add(1, 1, 1).await.unwrap();
    ctx.store.fail(FailPoint::InsertOrderItems).await;

    let err = ctx
        .services
        .checkout
        .checkout("10.0.0.1", Some(&user(1)), pickup_checkout())
        .await
        .unwrap_err();

    assert!(matches!(err, CommerceError::OrderCreationFailed(_)));
    assert!(ctx.store.orders().await.is_empty());
    assert_eq!(ctx.store.order_item_count().await, 0);
    assert_eq!(ctx.cart_quantity(1, 1).await, 1);

    // The cart is intact, so a retry after recovery succeeds.
    ctx.store.heal(FailPoint::InsertOrderItems).await;
    let summary = ctx
        .services
        .checkout
        .checkout("10.0.0.1", Some(&user(1)), pickup_checkout())
        .await
        .unwrap();
    assert_eq!(summary.item_count, 1);
    assert_eq!(ctx.store.orders().await.len(), 1);
}

#[tokio::test]
async fn empty_cart_and_anonymous_checkout_are_rejected() {
    let ctx = TestContext::new();

    let anonymous = ctx
        .services
        .checkout
        .checkout("10.0.0.1", None, pickup_checkout())
        .await
        .unwrap_err();
    assert!(matches!(anonymous, CommerceError::Unauthenticated));

    let empty = ctx
        .services
        .checkout
        .checkout("10.0.0.1", Some(&user(1)), pickup_checkout())
        .await
        .unwrap_err();
    assert!(matches!(empty, CommerceError::Validation(_)));
    assert!(ctx.store.orders().await.is_empty());
}
