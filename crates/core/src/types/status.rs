//! Status enums for orders and payments.
//!
//! All statuses are stored as lowercase `snake_case` text and parsed through
//! `FromStr`, so unknown values surface as data errors rather than panics.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error parsing a status value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid {kind}: {value}")]
pub struct StatusParseError {
    /// Which status family failed to parse.
    pub kind: &'static str,
    /// The rejected value.
    pub value: String,
}

impl StatusParseError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_owned(),
        }
    }
}

/// Payment state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
    Unpaid,
}

impl PaymentStatus {
    /// Stored representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Unpaid => "unpaid",
        }
    }

    /// Whether an order in this payment state may move to `next`.
    ///
    /// `paid` is final: once paid, only a repeated `paid` is accepted.
    #[must_use]
    pub const fn accepts(self, next: Self) -> bool {
        !matches!(self, Self::Paid) || matches!(next, Self::Paid)
    }

    /// Parse a status requested by a payment callback or an operator.
    ///
    /// Only `paid` (alias `success`), `failed` and `pending` are accepted
    /// transitions; `unpaid` is a stored state, never a requested one.
    ///
    /// # Errors
    ///
    /// Returns `StatusParseError` for any other value.
    pub fn parse_transition(value: &str) -> Result<Self, StatusParseError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "paid" | "success" => Ok(Self::Paid),
            "failed" => Ok(Self::Failed),
            "pending" => Ok(Self::Pending),
            _ => Err(StatusParseError::new("payment status transition", value)),
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" | "success" => Ok(Self::Paid),
            "failed" => Ok(Self::Failed),
            "unpaid" => Ok(Self::Unpaid),
            _ => Err(StatusParseError::new("payment status", s)),
        }
    }
}

/// Fulfilment state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Shipped,
    ReadyForPickup,
    Delivered,
    PickedUp,
    Cancelled,
}

impl OrderStatus {
    /// Stored representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Shipped => "shipped",
            Self::ReadyForPickup => "ready_for_pickup",
            Self::Delivered => "delivered",
            Self::PickedUp => "picked_up",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the order has entered fulfilment (shipped or handed over).
    #[must_use]
    pub const fn is_fulfilment(&self) -> bool {
        matches!(
            self,
            Self::Shipped | Self::ReadyForPickup | Self::Delivered | Self::PickedUp
        )
    }

    /// Status an order moves to when its payment becomes `payment`.
    ///
    /// Orders already in fulfilment keep their status.
    #[must_use]
    pub const fn after_payment(self, payment: PaymentStatus) -> Self {
        if self.is_fulfilment() {
            return self;
        }
        match payment {
            PaymentStatus::Paid => Self::Confirmed,
            PaymentStatus::Failed => Self::Cancelled,
            PaymentStatus::Pending => Self::Pending,
            PaymentStatus::Unpaid => self,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "shipped" => Ok(Self::Shipped),
            "ready_for_pickup" => Ok(Self::ReadyForPickup),
            "delivered" => Ok(Self::Delivered),
            "picked_up" => Ok(Self::PickedUp),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(StatusParseError::new("order status", s)),
        }
    }
}

/// How the customer receives the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOption {
    #[default]
    Shipping,
    Pickup,
}

impl DeliveryOption {
    /// Stored representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Shipping => "shipping",
            Self::Pickup => "pickup",
        }
    }
}

impl std::fmt::Display for DeliveryOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeliveryOption {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shipping" => Ok(Self::Shipping),
            "pickup" => Ok(Self::Pickup),
            _ => Err(StatusParseError::new("delivery option", s)),
        }
    }
}

/// Accepted payment method.
///
/// Checkout only accepts the hosted payment provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    Online,
}

impl PaymentMethod {
    /// Stored representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "online" => Ok(Self::Online),
            _ => Err(StatusParseError::new("payment method", s)),
        }
    }
}
