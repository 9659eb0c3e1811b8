//! Domain models for the storefront.

pub mod cart;
pub mod catalog;
pub mod order;
pub mod payment;
pub mod session;

pub use cart::{CartItem, CartKey, NewCartLine};
pub use catalog::{Product, ProductStock, ProductVariant};
pub use order::{
    NewOrder, NewOrderItem, Order, OrderDetail, OrderItem, OrderSummary, PaymentTransition,
    PaymentUpdate, ShippingAddress, ShippingAddressInput,
};
pub use payment::{NewPaymentTransaction, PaymentTransaction};
pub use session::{CurrentUser, keys as session_keys};
