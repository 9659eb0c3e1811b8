//! Process-local store implementing every repository trait.
//!
//! All state sits behind one `tokio::sync::Mutex`, which linearizes every
//! operation the same way row locks do in `PostgreSQL`. Used by unit tests and
//! the integration-test crate.
//!
//! Two knobs exist for exercising failure paths:
//!
//! - [`FailPoint`]s make chosen operations return `RepositoryError::Unavailable`.
//! - [`MemoryStore::without_atomic_upsert`] builds a store whose
//!   `upsert_increment` returns `Unsupported`, forcing the degraded cart path.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchard_core::{
    Availability, AttributeSelection, CartItemId, DecrementPath, LedgerDecrement, OrderId,
    OrderItemId, OrderStatus, PaymentStatus, PaymentTransactionId, PrimaryValue, ProductId,
    ReferenceId, StockLevel, UserId, VariantId, apply_decrement,
};
use tokio::sync::Mutex;

use super::{
    CartRepository, OrderRepository, PaymentLogRepository, ProductRepository, RepositoryError,
};
use crate::models::{
    CartItem, CartKey, NewCartLine, NewOrder, NewOrderItem, NewPaymentTransaction, Order,
    OrderDetail, OrderItem, PaymentTransaction, PaymentTransition, PaymentUpdate, Product,
    ProductStock, ProductVariant,
};

/// Operations that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// Product and stock reads.
    ReadStock,
    /// Stock decrements of one product.
    Decrement(ProductId),
    /// Order inserts.
    InsertOrder,
    /// Order item inserts.
    InsertOrderItems,
    /// Cart clears.
    ClearCart,
    /// Payment log appends.
    AppendPayment,
    /// Janitor sweeps of stale orders.
    Sweep,
}

#[derive(Default)]
struct State {
    products: BTreeMap<ProductId, Product>,
    variants: BTreeMap<VariantId, ProductVariant>,
    cart: BTreeMap<CartItemId, CartItem>,
    orders: BTreeMap<OrderId, Order>,
    order_items: BTreeMap<OrderItemId, OrderItem>,
    payments: Vec<PaymentTransaction>,
    next_id: i32,
    fail_points: HashSet<FailPoint>,
}

impl State {
    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    fn check(&self, point: FailPoint) -> Result<(), RepositoryError> {
        if self.fail_points.contains(&point) {
            return Err(RepositoryError::Unavailable(format!(
                "injected failure at {point:?}"
            )));
        }
        Ok(())
    }

    fn stock(&self, id: ProductId) -> Option<ProductStock> {
        let product = self.products.get(&id)?.clone();
        let variants = self
            .variants
            .values()
            .filter(|v| v.product_id == id)
            .cloned()
            .collect();
        Some(ProductStock { product, variants })
    }

    fn find_cart(&self, key: &CartKey) -> Option<&CartItem> {
        self.cart.values().find(|item| item.key() == *key)
    }

    fn insert_cart(&mut self, line: &NewCartLine) -> CartItem {
        let now = Utc::now();
        let item = CartItem {
            id: CartItemId::new(self.next_id()),
            user_id: line.key.user_id,
            product_id: line.key.product_id,
            variant_id: line.key.variant_id.clone(),
            variant_attributes: line.variant_attributes.clone(),
            quantity: line.quantity,
            price: line.price,
            currency: line.currency,
            applied_discount: line.applied_discount,
            created_at: now,
            updated_at: now,
        };
        self.cart.insert(item.id, item.clone());
        item
    }

    fn items_of(&self, order_id: &OrderId) -> Vec<OrderItem> {
        self.order_items
            .values()
            .filter(|item| item.order_id == *order_id)
            .cloned()
            .collect()
    }

    fn recompute(&mut self, id: ProductId, at: DateTime<Utc>) -> Option<Availability> {
        let availability = self.stock(id)?.availability();
        if let Some(product) = self.products.get_mut(&id) {
            product.apply_stock(availability.available, at);
        }
        Some(availability)
    }
}

/// In-memory implementation of all repositories.
pub struct MemoryStore {
    state: Mutex<State>,
    atomic_upsert: bool,
    read_delay: Option<Duration>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// An empty store with every primitive available.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            atomic_upsert: true,
            read_delay: None,
        }
    }

    /// A store without the atomic cart upsert primitive.
    #[must_use]
    pub fn without_atomic_upsert() -> Self {
        Self {
            atomic_upsert: false,
            ..Self::new()
        }
    }

    /// Delay every stock read by `delay` (for deadline tests).
    #[must_use]
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// Make `point` fail until [`MemoryStore::heal`] is called.
    pub async fn fail(&self, point: FailPoint) {
        self.state.lock().await.fail_points.insert(point);
    }

    /// Stop failing `point`.
    pub async fn heal(&self, point: FailPoint) {
        self.state.lock().await.fail_points.remove(&point);
    }

    /// Add or replace a product.
    pub async fn add_product(&self, product: Product) {
        let mut state = self.state.lock().await;
        let id = product.id;
        state.products.insert(id, product);
        state.recompute(id, Utc::now());
    }

    /// Add or replace a variant and recompute its product's aggregate.
    pub async fn add_variant(&self, variant: ProductVariant) {
        let mut state = self.state.lock().await;
        let product_id = variant.product_id;
        state.variants.insert(variant.id, variant);
        state.recompute(product_id, Utc::now());
    }

    /// Current product row.
    pub async fn product(&self, id: ProductId) -> Option<Product> {
        self.state.lock().await.products.get(&id).cloned()
    }

    /// Current variant rows of a product.
    pub async fn variants(&self, id: ProductId) -> Vec<ProductVariant> {
        self.state
            .lock()
            .await
            .stock(id)
            .map(|stock| stock.variants)
            .unwrap_or_default()
    }

    /// All orders.
    pub async fn orders(&self) -> Vec<Order> {
        self.state.lock().await.orders.values().cloned().collect()
    }

    /// Number of order items across all orders.
    pub async fn order_item_count(&self) -> usize {
        self.state.lock().await.order_items.len()
    }

    /// The whole payment log.
    pub async fn payment_log(&self) -> Vec<PaymentTransaction> {
        self.state.lock().await.payments.clone()
    }

    async fn delay_read(&self) {
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ProductRepository for MemoryStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        self.state.lock().await.check(FailPoint::ReadStock)
    }

    async fn find_stock(&self, id: ProductId) -> Result<Option<ProductStock>, RepositoryError> {
        self.delay_read().await;
        let state = self.state.lock().await;
        state.check(FailPoint::ReadStock)?;
        Ok(state.stock(id))
    }

    async fn find_stock_many(
        &self,
        ids: &[ProductId],
    ) -> Result<Vec<ProductStock>, RepositoryError> {
        self.delay_read().await;
        let state = self.state.lock().await;
        state.check(FailPoint::ReadStock)?;
        Ok(ids.iter().filter_map(|id| state.stock(*id)).collect())
    }

    async fn apply_decrement(
        &self,
        id: ProductId,
        quantity: u32,
        selection: Option<&AttributeSelection>,
    ) -> Result<LedgerDecrement, RepositoryError> {
        let mut guard = self.state.lock().await;
        guard.check(FailPoint::Decrement(id))?;
        let state = &mut *guard;

        let product_stock = state
            .products
            .get(&id)
            .map(Product::stock_level)
            .ok_or(RepositoryError::NotFound)?;
        let mut ledgers: Vec<&mut [PrimaryValue]> = state
            .variants
            .values_mut()
            .filter(|v| v.product_id == id)
            .map(|v| v.primary_values.as_mut_slice())
            .collect();
        let result = apply_decrement(product_stock, &mut ledgers, quantity, selection);

        if let Some(product) = state.products.get_mut(&id) {
            product.apply_stock(result.stock, Utc::now());
        }
        Ok(result)
    }

    async fn set_product_stock(
        &self,
        id: ProductId,
        level: StockLevel,
    ) -> Result<Availability, RepositoryError> {
        let mut state = self.state.lock().await;
        let stock = state.stock(id).ok_or(RepositoryError::NotFound)?;
        if stock.variants.iter().any(|v| !v.primary_values.is_empty()) {
            return Err(RepositoryError::Conflict(format!(
                "product {id} manages stock per attribute"
            )));
        }
        if let Some(product) = state.products.get_mut(&id) {
            product.apply_stock(level, Utc::now());
        }
        Ok(Availability::of(level))
    }

    async fn set_variant_quantity(
        &self,
        id: ProductId,
        variant: VariantId,
        attribute: &str,
        value: &str,
        quantity: u32,
    ) -> Result<Availability, RepositoryError> {
        let mut state = self.state.lock().await;
        if !state.products.contains_key(&id) {
            return Err(RepositoryError::NotFound);
        }
        let entry = state
            .variants
            .get_mut(&variant)
            .filter(|v| v.product_id == id)
            .and_then(|v| {
                v.primary_values
                    .iter_mut()
                    .find(|pv| pv.attribute == attribute && pv.value == value)
            })
            .ok_or(RepositoryError::NotFound)?;
        entry.quantity = quantity;
        state.recompute(id, Utc::now()).ok_or(RepositoryError::NotFound)
    }
}

#[async_trait]
impl CartRepository for MemoryStore {
    async fn list(&self, user_id: UserId) -> Result<Vec<CartItem>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .cart
            .values()
            .filter(|item| item.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn find(&self, key: &CartKey) -> Result<Option<CartItem>, RepositoryError> {
        Ok(self.state.lock().await.find_cart(key).cloned())
    }

    async fn find_by_id(&self, id: CartItemId) -> Result<Option<CartItem>, RepositoryError> {
        Ok(self.state.lock().await.cart.get(&id).cloned())
    }

    async fn upsert_increment(
        &self,
        line: &NewCartLine,
        cap: Option<u32>,
    ) -> Result<CartItem, RepositoryError> {
        if !self.atomic_upsert {
            return Err(RepositoryError::Unsupported("cart upsert_increment"));
        }
        let mut state = self.state.lock().await;
        let Some(id) = state.find_cart(&line.key).map(|item| item.id) else {
            return Ok(state.insert_cart(line));
        };
        let item = state.cart.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        let quantity = item.quantity.saturating_add(line.quantity);
        if cap.is_some_and(|cap| quantity > cap) {
            return Err(RepositoryError::Conflict(
                "cart line exceeds available stock".to_owned(),
            ));
        }
        item.quantity = quantity;
        item.variant_attributes = line.variant_attributes.clone();
        item.price = line.price;
        item.currency = line.currency;
        item.applied_discount = line.applied_discount;
        item.updated_at = Utc::now();
        Ok(item.clone())
    }

    async fn insert(&self, line: &NewCartLine) -> Result<CartItem, RepositoryError> {
        let mut state = self.state.lock().await;
        if state.find_cart(&line.key).is_some() {
            return Err(RepositoryError::Conflict("cart line already exists".to_owned()));
        }
        Ok(state.insert_cart(line))
    }

    async fn set_quantity(
        &self,
        id: CartItemId,
        quantity: u32,
    ) -> Result<CartItem, RepositoryError> {
        let mut state = self.state.lock().await;
        let item = state.cart.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        item.quantity = quantity;
        item.updated_at = Utc::now();
        Ok(item.clone())
    }

    async fn delete(&self, id: CartItemId) -> Result<bool, RepositoryError> {
        Ok(self.state.lock().await.cart.remove(&id).is_some())
    }

    async fn clear(
        &self,
        user_id: UserId,
        product_ids: Option<&[ProductId]>,
    ) -> Result<u64, RepositoryError> {
        let mut state = self.state.lock().await;
        state.check(FailPoint::ClearCart)?;
        let before = state.cart.len();
        state.cart.retain(|_, item| {
            item.user_id != user_id
                || product_ids.is_some_and(|ids| !ids.contains(&item.product_id))
        });
        Ok(u64::try_from(before - state.cart.len()).unwrap_or(u64::MAX))
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn insert_order(&self, order: &NewOrder) -> Result<Order, RepositoryError> {
        let mut state = self.state.lock().await;
        state.check(FailPoint::InsertOrder)?;
        if state.orders.contains_key(&order.id)
            || state
                .orders
                .values()
                .any(|o| o.reference_id == order.reference_id || o.pickup_id == order.pickup_id)
        {
            return Err(RepositoryError::Conflict("order already exists".to_owned()));
        }
        let stored = Order {
            id: order.id.clone(),
            user_id: order.user_id,
            reference_id: order.reference_id.clone(),
            pickup_id: order.pickup_id.clone(),
            total_amount: order.total_amount,
            currency: order.currency,
            shipping_address: order.shipping_address.clone(),
            delivery_option: order.delivery_option,
            payment_method: order.payment_method.clone(),
            payment_status: PaymentStatus::Pending,
            payment_id: None,
            status: OrderStatus::Pending,
            created_at: order.created_at,
            updated_at: order.created_at,
        };
        state.orders.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn insert_items(
        &self,
        order_id: &OrderId,
        items: &[NewOrderItem],
    ) -> Result<Vec<OrderItem>, RepositoryError> {
        let mut state = self.state.lock().await;
        state.check(FailPoint::InsertOrderItems)?;
        if items.is_empty() {
            return Err(RepositoryError::Conflict(
                "an order needs at least one item".to_owned(),
            ));
        }
        if !state.orders.contains_key(order_id) {
            return Err(RepositoryError::NotFound);
        }
        let mut stored = Vec::with_capacity(items.len());
        for item in items {
            let row = OrderItem {
                id: OrderItemId::new(state.next_id()),
                order_id: order_id.clone(),
                product_id: item.product_id,
                product_name: item.product_name.clone(),
                variant_id: item.variant_id.clone(),
                variant_attributes: item.variant_attributes.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                total_price: item.total_price,
            };
            state.order_items.insert(row.id, row.clone());
            stored.push(row);
        }
        Ok(stored)
    }

    async fn delete_order(&self, id: &OrderId) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().await;
        let removed = state.orders.remove(id).is_some();
        state.order_items.retain(|_, item| item.order_id != *id);
        Ok(removed)
    }

    async fn find_by_reference(
        &self,
        reference_id: &ReferenceId,
    ) -> Result<Option<Order>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .values()
            .find(|o| o.reference_id == *reference_id)
            .cloned())
    }

    async fn items(&self, order_id: &OrderId) -> Result<Vec<OrderItem>, RepositoryError> {
        Ok(self.state.lock().await.items_of(order_id))
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<OrderDetail>, RepositoryError> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.user_id == Some(user_id))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders
            .into_iter()
            .map(|order| OrderDetail {
                items: state.items_of(&order.id),
                order,
            })
            .collect())
    }

    async fn transition_payment(
        &self,
        reference_id: &ReferenceId,
        update: &PaymentUpdate,
    ) -> Result<Option<PaymentTransition>, RepositoryError> {
        let mut state = self.state.lock().await;
        let Some(order) = state
            .orders
            .values_mut()
            .find(|o| o.reference_id == *reference_id)
        else {
            return Ok(None);
        };
        let previous = order.payment_status;
        if !previous.accepts(update.payment_status) {
            return Ok(Some(PaymentTransition {
                previous,
                order: order.clone(),
            }));
        }
        order.payment_status = update.payment_status;
        if !order.status.is_fulfilment() {
            order.status = update.target_status();
        }
        if let Some(payment_id) = &update.payment_id {
            order.payment_id = Some(payment_id.clone());
        }
        if let Some(method) = &update.payment_method {
            order.payment_method.clone_from(method);
        }
        order.updated_at = update.at;
        Ok(Some(PaymentTransition {
            previous,
            order: order.clone(),
        }))
    }

    async fn fail_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Order>, RepositoryError> {
        let mut state = self.state.lock().await;
        state.check(FailPoint::Sweep)?;
        let mut failed = Vec::new();
        for order in state.orders.values_mut() {
            if order.payment_status == PaymentStatus::Pending && order.created_at < cutoff {
                order.payment_status = PaymentStatus::Failed;
                order.updated_at = now;
                failed.push(order.clone());
            }
        }
        Ok(failed)
    }

    async fn delete_stale_failed(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Order>, RepositoryError> {
        let mut state = self.state.lock().await;
        let stale: Vec<OrderId> = state
            .orders
            .values()
            .filter(|o| o.payment_status == PaymentStatus::Failed && o.created_at < cutoff)
            .map(|o| o.id.clone())
            .collect();
        state
            .order_items
            .retain(|_, item| !stale.contains(&item.order_id));
        Ok(stale
            .iter()
            .filter_map(|id| state.orders.remove(id))
            .collect())
    }
}

#[async_trait]
impl PaymentLogRepository for MemoryStore {
    async fn append(
        &self,
        entry: &NewPaymentTransaction,
    ) -> Result<PaymentTransaction, RepositoryError> {
        let mut state = self.state.lock().await;
        state.check(FailPoint::AppendPayment)?;
        let row = PaymentTransaction {
            id: PaymentTransactionId::new(state.next_id()),
            user_id: entry.user_id,
            order_id: entry.order_id.clone(),
            payment_id: entry.payment_id.clone(),
            amount: entry.amount,
            status: entry.status,
            method: entry.method.clone(),
            created_at: entry.created_at,
        };
        state.payments.push(row.clone());
        Ok(row)
    }

    async fn list_for_order(
        &self,
        order_id: &OrderId,
    ) -> Result<Vec<PaymentTransaction>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .iter()
            .filter(|p| p.order_id == *order_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use orchard_core::{CurrencyCode, VariantKey};
    use rust_decimal::Decimal;

    fn line(user: i32, product: i32, quantity: u32) -> NewCartLine {
        NewCartLine {
            key: CartKey {
                user_id: UserId::new(user),
                product_id: ProductId::new(product),
                variant_id: VariantKey::default_key(),
            },
            variant_attributes: AttributeSelection::empty(),
            quantity,
            price: Decimal::ONE,
            currency: CurrencyCode::USD,
            applied_discount: Decimal::ZERO,
        }
    }

    #[tokio::test]
    async fn test_upsert_increments_existing_line() {
        let store = MemoryStore::new();
        store.upsert_increment(&line(1, 1, 2), None).await.unwrap();
        let item = store.upsert_increment(&line(1, 1, 3), None).await.unwrap();
        assert_eq!(item.quantity, 5);
        assert_eq!(store.list(UserId::new(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_respects_cap() {
        let store = MemoryStore::new();
        store.upsert_increment(&line(1, 1, 2), Some(3)).await.unwrap();
        let err = store
            .upsert_increment(&line(1, 1, 2), Some(3))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
        let key = line(1, 1, 0).key;
        assert_eq!(store.find(&key).await.unwrap().unwrap().quantity, 2);
    }

    #[tokio::test]
    async fn test_without_atomic_upsert_reports_unsupported() {
        let store = MemoryStore::without_atomic_upsert();
        let err = store.upsert_increment(&line(1, 1, 1), None).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_selective_clear_keeps_other_products() {
        let store = MemoryStore::new();
        store.insert(&line(1, 1, 1)).await.unwrap();
        store.insert(&line(1, 2, 1)).await.unwrap();
        store.insert(&line(2, 1, 1)).await.unwrap();

        let removed = store
            .clear(UserId::new(1), Some(&[ProductId::new(1)]))
            .await
            .unwrap();

        assert_eq!(removed, 1);
        let remaining = store.list(UserId::new(1)).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].product_id, ProductId::new(2));
        assert_eq!(store.list(UserId::new(2)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_variant_edit_recomputes_aggregate() {
        let store = MemoryStore::new();
        store
            .add_product(Product::new(ProductId::new(1), "Tee", Decimal::TEN))
            .await;
        store
            .add_variant(ProductVariant::new(
                VariantId::new(5),
                ProductId::new(1),
                "size",
                vec![PrimaryValue::new("size", "M", 2), PrimaryValue::new("size", "L", 2)],
            ))
            .await;
        assert_eq!(
            store.product(ProductId::new(1)).await.unwrap().stock_quantity,
            Some(4)
        );

        let availability = store
            .set_variant_quantity(ProductId::new(1), VariantId::new(5), "size", "L", 7)
            .await
            .unwrap();

        assert_eq!(availability.available, StockLevel::Limited(9));
        assert_eq!(
            store.product(ProductId::new(1)).await.unwrap().stock_quantity,
            Some(9)
        );
        let err = store
            .set_product_stock(ProductId::new(1), StockLevel::Limited(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_fail_point_injects_unavailable() {
        let store = MemoryStore::new();
        store.fail(FailPoint::ReadStock).await;
        assert!(matches!(
            store.find_stock(ProductId::new(1)).await,
            Err(RepositoryError::Unavailable(_))
        ));
        store.heal(FailPoint::ReadStock).await;
        assert!(store.find_stock(ProductId::new(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_decrement_path_is_reported() {
        let store = MemoryStore::new();
        store
            .add_product(
                Product::new(ProductId::new(3), "Mug", Decimal::TEN).with_stock(Some(2)),
            )
            .await;
        let result = store
            .apply_decrement(ProductId::new(3), 5, None)
            .await
            .unwrap();
        assert_eq!(result.path, DecrementPath::Product);
        assert_eq!(result.shortfall, 3);
        let product = store.product(ProductId::new(3)).await.unwrap();
        assert_eq!(product.stock_quantity, Some(0));
        assert!(!product.in_stock);
    }
}
