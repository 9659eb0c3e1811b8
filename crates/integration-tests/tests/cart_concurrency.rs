//! Cart stock clamping under concurrent, partial and merged adds.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use orchard_core::{ProductId, UserId};
use orchard_integration_tests::{TestContext, add_request};
use orchard_storefront::db::MemoryStore;
use orchard_storefront::services::cart::ConflictReason;
use orchard_storefront::services::{AddOutcome, CommerceError, GuestCartLine};
use rust_decimal::Decimal;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_adds_never_exceed_stock() {
    let ctx = Arc::new(TestContext::new());
    ctx.product(1, "Mug", Decimal::TEN, Some(5)).await;

    let handles: Vec<_> = (0..12)
        .map(|_| {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { ctx.add(1, 1, 1).await })
        })
        .collect();

    let mut added = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(AddOutcome::Added { .. }) => added += 1,
            Ok(AddOutcome::PartialStock(_)) => panic!("single-unit add reported partial stock"),
            Err(CommerceError::OutOfStock { .. } | CommerceError::Repository(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    // A write only loses a race against a full line, so exactly the stock is
    // taken and every taken unit is on the line.
    assert_eq!(added, 5);
    assert_eq!(ctx.cart_quantity(1, 1).await, 5);
    assert_eq!(ctx.services.cart.list(UserId::new(1)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn partial_stock_adds_what_is_left() {
    let ctx = TestContext::new();
    ctx.product(1, "Mug", Decimal::TEN, Some(3)).await;

    let outcome = ctx.add(1, 1, 5).await.unwrap();

    let AddOutcome::PartialStock(partial) = outcome else {
        panic!("expected partial stock");
    };
    assert_eq!(partial.requested, 5);
    assert_eq!(partial.added, 3);
    assert_eq!(partial.remaining, 2);
    assert_eq!(partial.item.quantity, 3);
    assert_eq!(partial.support.email.as_deref(), Some("care@orchard.test"));
    assert_eq!(ctx.cart_quantity(1, 1).await, 3);

    // The line already holds everything there is.
    let err = ctx.add(1, 1, 1).await.unwrap_err();
    assert!(matches!(err, CommerceError::OutOfStock { .. }));
}

#[tokio::test]
async fn carts_of_different_users_do_not_reserve_stock() {
    let ctx = TestContext::new();
    ctx.product(1, "Mug", Decimal::TEN, Some(4)).await;

    assert!(matches!(ctx.add(1, 1, 4).await.unwrap(), AddOutcome::Added { .. }));
    assert!(matches!(ctx.add(2, 1, 4).await.unwrap(), AddOutcome::Added { .. }));

    assert_eq!(ctx.cart_quantity(1, 1).await, 4);
    assert_eq!(ctx.cart_quantity(2, 1).await, 4);
}

#[tokio::test]
async fn unknown_product_is_not_found() {
    let ctx = TestContext::new();

    let err = ctx.add(1, 99, 1).await.unwrap_err();

    assert!(matches!(err, CommerceError::NotFound(_)));
}

#[tokio::test]
async fn merge_reports_conflicts_and_merges_the_rest() {
    let ctx = TestContext::new();
    ctx.product(1, "Mug", Decimal::TEN, Some(5)).await;
    ctx.product(2, "Poster", Decimal::ONE, Some(0)).await;
    ctx.add(1, 1, 2).await.unwrap();

    let guest = |product: i32, quantity: u32| GuestCartLine {
        product_id: ProductId::new(product),
        variant_id: None,
        variant_attributes: orchard_core::AttributeSelection::empty(),
        quantity,
    };
    let outcome = ctx
        .services
        .cart
        .merge(
            UserId::new(1),
            vec![guest(1, 10), guest(2, 1), guest(99, 1), guest(1, 0)],
        )
        .await
        .unwrap();

    assert_eq!(outcome.merged.len(), 1);
    assert_eq!(outcome.merged[0].quantity, 5);
    let reasons: Vec<_> = outcome
        .conflicts
        .iter()
        .map(|c| (c.product_id.as_i32(), c.reason))
        .collect();
    assert_eq!(
        reasons,
        vec![
            (2, ConflictReason::OutOfStock),
            (99, ConflictReason::NotFound),
            (1, ConflictReason::InvalidQuantity),
        ]
    );
    assert_eq!(ctx.cart_quantity(1, 1).await, 5);
}

#[tokio::test]
async fn degraded_store_still_clamps_sequential_adds() {
    let ctx = TestContext::with_store(MemoryStore::without_atomic_upsert());
    ctx.product(1, "Mug", Decimal::TEN, Some(4)).await;

    assert!(matches!(
        ctx.services
            .cart
            .add(UserId::new(1), add_request(1, 3))
            .await
            .unwrap(),
        AddOutcome::Added { .. }
    ));
    let outcome = ctx.add(1, 1, 3).await.unwrap();

    let AddOutcome::PartialStock(partial) = outcome else {
        panic!("expected partial stock");
    };
    assert_eq!(partial.added, 1);
    assert_eq!(ctx.cart_quantity(1, 1).await, 4);
}
