//! Core types for Orchard.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod id;
pub mod price;
pub mod restock;
pub mod status;
pub mod stock;

pub use id::*;
pub use price::{CurrencyCode, CurrencyError, Price};
pub use restock::{RestockEta, ReturnTimeUnit, out_of_stock_message};
pub use status::*;
pub use stock::*;
