//! Session-related types.
//!
//! Sessions are issued elsewhere; the storefront only reads the identity.

use serde::{Deserialize, Serialize};

use orchard_core::UserId;

/// Session-stored user identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentUser {
    /// User's database ID.
    pub id: UserId,
    /// User's email address.
    pub email: String,
}

/// Session keys for authentication data.
pub mod keys {
    /// Key for storing the current logged-in user.
    pub const CURRENT_USER: &str = "current_user";
}
