//! Newtype IDs for type-safe entity references.
//!
//! Two families of identifiers live here:
//!
//! - `define_id!` wraps database-assigned `i32` keys (products, users, cart lines).
//! - `define_code!` wraps application-generated string codes (order number,
//!   payment reference, pickup code). Codes are a UTC timestamp followed by a
//!   random suffix, which keeps them sortable and collision resistant.

use chrono::{DateTime, Utc};
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

/// Macro to define a type-safe ID wrapper.
///
/// Creates a newtype wrapper around `i32` with:
/// - `Serialize`/`Deserialize` with `#[serde(transparent)]`
/// - `Debug`, `Clone`, `Copy`, `PartialEq`, `Eq`, `Hash`, `Ord`
/// - Conversion methods: `new()`, `as_i32()`
/// - `From<i32>` and `Into<i32>` implementations
/// - `sqlx` `Type`, `Encode`, and `Decode` implementations (with `postgres` feature)
///
/// # Example
///
/// ```rust
/// # use orchard_core::define_id;
/// define_id!(WarehouseId);
/// define_id!(ShelfId);
///
/// let warehouse = WarehouseId::new(1);
/// let shelf = ShelfId::new(1);
///
/// // These are different types, so this won't compile:
/// // let _: WarehouseId = shelf;
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            ::serde::Serialize,
            ::serde::Deserialize
        )]
        #[serde(transparent)]
        pub struct $name(i32);

        impl $name {
            /// Create a new ID from an i32 value.
            #[must_use]
            pub const fn new(id: i32) -> Self {
                Self(id)
            }

            /// Get the underlying i32 value.
            #[must_use]
            pub const fn as_i32(&self) -> i32 {
                self.0
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i32> for $name {
            fn from(id: i32) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i32 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        #[cfg(feature = "postgres")]
        impl ::sqlx::Type<::sqlx::Postgres> for $name {
            fn type_info() -> ::sqlx::postgres::PgTypeInfo {
                <i32 as ::sqlx::Type<::sqlx::Postgres>>::type_info()
            }

            fn compatible(ty: &::sqlx::postgres::PgTypeInfo) -> bool {
                <i32 as ::sqlx::Type<::sqlx::Postgres>>::compatible(ty)
            }
        }

        #[cfg(feature = "postgres")]
        impl<'r> ::sqlx::Decode<'r, ::sqlx::Postgres> for $name {
            fn decode(
                value: ::sqlx::postgres::PgValueRef<'r>,
            ) -> ::core::result::Result<Self, ::sqlx::error::BoxDynError> {
                let id = <i32 as ::sqlx::Decode<::sqlx::Postgres>>::decode(value)?;
                Ok(Self(id))
            }
        }

        #[cfg(feature = "postgres")]
        impl ::sqlx::Encode<'_, ::sqlx::Postgres> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut ::sqlx::postgres::PgArgumentBuffer,
            ) -> ::std::result::Result<::sqlx::encode::IsNull, ::sqlx::error::BoxDynError> {
                <i32 as ::sqlx::Encode<::sqlx::Postgres>>::encode_by_ref(&self.0, buf)
            }
        }
    };
}

/// Macro to define a string-backed code wrapper.
///
/// Same shape as [`define_id!`] but around `String`, with `as_str()` and
/// `sqlx` support delegating to `TEXT`.
#[macro_export]
macro_rules! define_code {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            ::serde::Serialize,
            ::serde::Deserialize
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing code.
            #[must_use]
            pub fn new(code: impl Into<String>) -> Self {
                Self(code.into())
            }

            /// Borrow the code as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(code: String) -> Self {
                Self(code)
            }
        }

        impl From<&str> for $name {
            fn from(code: &str) -> Self {
                Self(code.to_owned())
            }
        }

        #[cfg(feature = "postgres")]
        impl ::sqlx::Type<::sqlx::Postgres> for $name {
            fn type_info() -> ::sqlx::postgres::PgTypeInfo {
                <String as ::sqlx::Type<::sqlx::Postgres>>::type_info()
            }

            fn compatible(ty: &::sqlx::postgres::PgTypeInfo) -> bool {
                <String as ::sqlx::Type<::sqlx::Postgres>>::compatible(ty)
            }
        }

        #[cfg(feature = "postgres")]
        impl<'r> ::sqlx::Decode<'r, ::sqlx::Postgres> for $name {
            fn decode(
                value: ::sqlx::postgres::PgValueRef<'r>,
            ) -> ::core::result::Result<Self, ::sqlx::error::BoxDynError> {
                let code = <String as ::sqlx::Decode<::sqlx::Postgres>>::decode(value)?;
                Ok(Self(code))
            }
        }

        #[cfg(feature = "postgres")]
        impl ::sqlx::Encode<'_, ::sqlx::Postgres> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut ::sqlx::postgres::PgArgumentBuffer,
            ) -> ::std::result::Result<::sqlx::encode::IsNull, ::sqlx::error::BoxDynError> {
                <String as ::sqlx::Encode<::sqlx::Postgres>>::encode_by_ref(&self.0, buf)
            }
        }
    };
}

// Database-assigned keys
define_id!(UserId);
define_id!(ProductId);
define_id!(VariantId);
define_id!(CartItemId);
define_id!(OrderItemId);
define_id!(PaymentTransactionId);

// Application-generated codes
define_code!(OrderId);
define_code!(ReferenceId);
define_code!(PickupId);

/// Unambiguous alphabet for generated codes (no 0/O, 1/I).
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of the random suffix appended to generated codes.
const CODE_SUFFIX_LEN: usize = 10;

fn random_suffix(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .filter_map(|_| CODE_ALPHABET.choose(&mut rng).copied().map(char::from))
        .collect()
}

fn generate_code(prefix: &str, now: DateTime<Utc>) -> String {
    format!(
        "{prefix}-{}-{}",
        now.format("%Y%m%d%H%M%S"),
        random_suffix(CODE_SUFFIX_LEN)
    )
}

impl OrderId {
    /// Generate a fresh order number (`ORD-<timestamp>-<suffix>`).
    #[must_use]
    pub fn generate(now: DateTime<Utc>) -> Self {
        Self(generate_code("ORD", now))
    }
}

impl ReferenceId {
    /// Generate a fresh payment reference (`REF-<timestamp>-<suffix>`).
    #[must_use]
    pub fn generate(now: DateTime<Utc>) -> Self {
        Self(generate_code("REF", now))
    }
}

impl PickupId {
    /// Generate a fresh pickup code (`PU-<timestamp>-<suffix>`).
    #[must_use]
    pub fn generate(now: DateTime<Utc>) -> Self {
        Self(generate_code("PU", now))
    }
}

/// Cart variant selector.
///
/// Never null: products without a meaningful variant selection use the literal
/// `"default"` so the `(user, product, variant)` unique key merges duplicate adds.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantKey(String);

impl VariantKey {
    /// The selector used when no variant is chosen.
    pub const DEFAULT: &'static str = "default";

    /// Normalize an optional client-provided selector.
    ///
    /// Missing, blank and `"null"` values collapse to [`VariantKey::DEFAULT`].
    #[must_use]
    pub fn from_option(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("" | "null" | "undefined") => Self::default_key(),
            Some(value) => Self(value.to_owned()),
        }
    }

    /// The default selector.
    #[must_use]
    pub fn default_key() -> Self {
        Self(Self::DEFAULT.to_owned())
    }

    /// Selector pointing at a concrete variant row.
    #[must_use]
    pub fn for_variant(id: VariantId) -> Self {
        Self(id.to_string())
    }

    /// Whether this is the default selector.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.0 == Self::DEFAULT
    }

    /// The variant row this selector points at, if it is numeric.
    #[must_use]
    pub fn variant_id(&self) -> Option<VariantId> {
        self.0.parse::<i32>().ok().map(VariantId::new)
    }

    /// Borrow the selector as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for VariantKey {
    fn default() -> Self {
        Self::default_key()
    }
}

impl std::fmt::Display for VariantKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
