//! Orchard Core - Shared types library.
//!
//! This crate provides common types used across all Orchard components:
//! - `storefront` - Cart, checkout, payment reconciliation and order lifecycle
//! - `cli` - Command-line tools for migrations and operator actions
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no database
//! access, no HTTP clients. The stock ledger arithmetic lives here so it can be
//! exercised without a database and shared by every storage backend.
//!
//! # Modules
//!
//! - [`types`] - Typed IDs, order codes, money, statuses, stock levels and restock ETAs

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
