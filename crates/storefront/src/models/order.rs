//! Orders, order items and payment transitions.

use chrono::{DateTime, Utc};
use orchard_core::{
    AttributeSelection, CurrencyCode, DeliveryOption, OrderId, OrderItemId, OrderStatus,
    PaymentStatus, PickupId, ProductId, ReferenceId, UserId, VariantKey,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Structured shipping address stored with an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub full_name: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: Option<String>,
    pub postal_code: String,
    pub country: String,
    pub phone: Option<String>,
}

/// Shipping address as submitted by the client.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ShippingAddressInput {
    #[validate(length(min = 1, max = 120, message = "full name is required"))]
    pub full_name: String,
    #[validate(length(min = 1, max = 200, message = "address line is required"))]
    pub line1: String,
    #[validate(length(max = 200))]
    pub line2: Option<String>,
    #[validate(length(min = 1, max = 100, message = "city is required"))]
    pub city: String,
    #[validate(length(max = 100))]
    pub state: Option<String>,
    #[validate(length(min = 1, max = 20, message = "postal code is required"))]
    pub postal_code: String,
    #[validate(length(min = 2, max = 56, message = "country is required"))]
    pub country: String,
    #[validate(length(max = 32))]
    pub phone: Option<String>,
}

impl ShippingAddressInput {
    /// Trim whitespace, drop control characters and blank optionals.
    #[must_use]
    pub fn sanitized(self) -> Self {
        Self {
            full_name: clean(&self.full_name),
            line1: clean(&self.line1),
            line2: clean_optional(self.line2.as_deref()),
            city: clean(&self.city),
            state: clean_optional(self.state.as_deref()),
            postal_code: clean(&self.postal_code),
            country: clean(&self.country),
            phone: clean_optional(self.phone.as_deref()),
        }
    }

    /// Convert a sanitized, validated input into the stored form.
    #[must_use]
    pub fn into_address(self) -> ShippingAddress {
        ShippingAddress {
            full_name: self.full_name,
            line1: self.line1,
            line2: self.line2,
            city: self.city,
            state: self.state,
            postal_code: self.postal_code,
            country: self.country,
            phone: self.phone,
        }
    }
}

fn clean(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn clean_optional(value: Option<&str>) -> Option<String> {
    value.map(clean).filter(|v| !v.is_empty())
}

/// A stored order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: Option<UserId>,
    pub reference_id: ReferenceId,
    pub pickup_id: PickupId,
    pub total_amount: Decimal,
    pub currency: CurrencyCode,
    pub shipping_address: Option<ShippingAddress>,
    pub delivery_option: DeliveryOption,
    pub payment_method: String,
    pub payment_status: PaymentStatus,
    pub payment_id: Option<String>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values for a new order row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub id: OrderId,
    pub user_id: Option<UserId>,
    pub reference_id: ReferenceId,
    pub pickup_id: PickupId,
    pub total_amount: Decimal,
    pub currency: CurrencyCode,
    pub shipping_address: Option<ShippingAddress>,
    pub delivery_option: DeliveryOption,
    pub payment_method: String,
    pub created_at: DateTime<Utc>,
}

/// An immutable order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub product_name: String,
    pub variant_id: VariantKey,
    pub variant_attributes: AttributeSelection,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

/// Values for a new order line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub variant_id: VariantKey,
    pub variant_attributes: AttributeSelection,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

/// An order with its lines (order history).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
}

/// Result returned by checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderSummary {
    pub order_id: OrderId,
    pub reference_id: ReferenceId,
    pub pickup_id: PickupId,
    pub total: Decimal,
    pub currency: CurrencyCode,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    /// Total units across all lines.
    pub item_count: u32,
    pub created_at: DateTime<Utc>,
}

impl OrderSummary {
    /// Summarize a freshly created order.
    #[must_use]
    pub fn new(order: &Order, items: &[OrderItem]) -> Self {
        Self {
            order_id: order.id.clone(),
            reference_id: order.reference_id.clone(),
            pickup_id: order.pickup_id.clone(),
            total: order.total_amount,
            currency: order.currency,
            status: order.status,
            payment_status: order.payment_status,
            item_count: items
                .iter()
                .fold(0_u32, |acc, item| acc.saturating_add(item.quantity)),
            created_at: order.created_at,
        }
    }
}

/// A requested payment state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentUpdate {
    pub payment_status: PaymentStatus,
    pub payment_id: Option<String>,
    pub payment_method: Option<String>,
    pub at: DateTime<Utc>,
}

impl PaymentUpdate {
    /// Order status the update moves non-fulfilment orders to.
    #[must_use]
    pub const fn target_status(&self) -> OrderStatus {
        OrderStatus::Pending.after_payment(self.payment_status)
    }
}

/// An applied payment transition: the updated order and the payment status it
/// had immediately before, read under the same row lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentTransition {
    pub previous: PaymentStatus,
    pub order: Order,
}

impl PaymentTransition {
    /// Whether this transition is the first to mark the order paid.
    #[must_use]
    pub fn newly_paid(&self) -> bool {
        self.order.payment_status == PaymentStatus::Paid && self.previous != PaymentStatus::Paid
    }
}
