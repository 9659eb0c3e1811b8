//! Order history reads.

use std::sync::Arc;

use orchard_core::UserId;
use tracing::instrument;

use super::CommerceError;
use super::cache::ReadCache;
use crate::db::OrderRepository;
use crate::models::OrderDetail;

/// Read side of orders for the owning user.
#[derive(Clone)]
pub struct OrderService {
    orders: Arc<dyn OrderRepository>,
    cache: ReadCache,
}

impl OrderService {
    #[must_use]
    pub fn new(orders: Arc<dyn OrderRepository>, cache: ReadCache) -> Self {
        Self { orders, cache }
    }

    /// A user's orders with their lines, newest first.
    ///
    /// # Errors
    ///
    /// Returns `Repository` on storage failure.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Arc<Vec<OrderDetail>>, CommerceError> {
        if let Some(orders) = self.cache.orders(user_id).await {
            return Ok(orders);
        }
        let orders = Arc::new(self.orders.list_for_user(user_id).await?);
        self.cache.put_orders(user_id, Arc::clone(&orders)).await;
        Ok(orders)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeDelta, Utc};
    use orchard_core::{CurrencyCode, DeliveryOption, OrderId, PickupId, ReferenceId};
    use rust_decimal::Decimal;

    use super::*;
    use crate::db::MemoryStore;
    use crate::models::NewOrder;

    async fn order(store: &MemoryStore, code: &str, user: i32, minutes_ago: i64) {
        store
            .insert_order(&NewOrder {
                id: OrderId::new(format!("ORD-{code}")),
                user_id: Some(UserId::new(user)),
                reference_id: ReferenceId::new(format!("REF-{code}")),
                pickup_id: PickupId::new(format!("PU-{code}")),
                total_amount: Decimal::TEN,
                currency: CurrencyCode::USD,
                shipping_address: None,
                delivery_option: DeliveryOption::Pickup,
                payment_method: "online".to_owned(),
                created_at: Utc::now() - TimeDelta::minutes(minutes_ago),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_lists_only_own_orders_newest_first() {
        let store = Arc::new(MemoryStore::new());
        order(&store, "a", 1, 30).await;
        order(&store, "b", 1, 5).await;
        order(&store, "c", 2, 1).await;
        let service = OrderService::new(store.clone(), ReadCache::new(Duration::from_secs(30)));

        let orders = service.list_for_user(UserId::new(1)).await.unwrap();

        let ids: Vec<&str> = orders.iter().map(|o| o.order.id.as_str()).collect();
        assert_eq!(ids, vec!["ORD-b", "ORD-a"]);
    }

    #[tokio::test]
    async fn test_cached_until_invalidated() {
        let store = Arc::new(MemoryStore::new());
        let cache = ReadCache::new(Duration::from_secs(30));
        let service = OrderService::new(store.clone(), cache.clone());

        assert!(service.list_for_user(UserId::new(1)).await.unwrap().is_empty());
        order(&store, "a", 1, 1).await;
        assert!(service.list_for_user(UserId::new(1)).await.unwrap().is_empty());

        cache
            .invalidate(crate::services::CacheKey::Orders(UserId::new(1)))
            .await;
        assert_eq!(service.list_for_user(UserId::new(1)).await.unwrap().len(), 1);
    }
}
