//! Stock ledger arithmetic.
//!
//! A product either manages stock on its own (`stock_quantity`, `None` meaning
//! unlimited) or through attribute-level entries (`PrimaryValue`) spread across
//! its variants. In the second case the product aggregate is always recomputed
//! as the sum of the entries after a write, never decremented on its own.
//!
//! Everything in this module is pure so it can be shared by every storage
//! backend and tested without a database.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Available quantity for a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StockLevel {
    /// Stock is not tracked.
    Unlimited,
    /// A finite number of units.
    Limited(u32),
}

impl StockLevel {
    /// Build from a nullable stored column. Negative values are treated as 0.
    #[must_use]
    pub fn from_column(value: Option<i32>) -> Self {
        value.map_or(Self::Unlimited, |q| {
            Self::Limited(u32::try_from(q).unwrap_or(0))
        })
    }

    /// Stored representation (`None` for unlimited).
    #[must_use]
    pub fn to_column(self) -> Option<i32> {
        match self {
            Self::Unlimited => None,
            Self::Limited(q) => Some(i32::try_from(q).unwrap_or(i32::MAX)),
        }
    }

    /// `true` iff unlimited or at least one unit is left.
    #[must_use]
    pub const fn in_stock(self) -> bool {
        match self {
            Self::Unlimited => true,
            Self::Limited(q) => q > 0,
        }
    }

    /// Whether `requested` units can be supplied.
    #[must_use]
    pub const fn covers(self, requested: u32) -> bool {
        match self {
            Self::Unlimited => true,
            Self::Limited(q) => q >= requested,
        }
    }

    /// How many of `requested` units can be supplied.
    #[must_use]
    pub fn fulfillable(self, requested: u32) -> u32 {
        match self {
            Self::Unlimited => requested,
            Self::Limited(q) => q.min(requested),
        }
    }

    /// Units left after `already_held` are taken out.
    #[must_use]
    pub const fn remaining_after(self, already_held: u32) -> Self {
        match self {
            Self::Unlimited => Self::Unlimited,
            Self::Limited(q) => Self::Limited(q.saturating_sub(already_held)),
        }
    }

    /// Finite quantity, if any.
    #[must_use]
    pub const fn quantity(self) -> Option<u32> {
        match self {
            Self::Unlimited => None,
            Self::Limited(q) => Some(q),
        }
    }

    /// Take `quantity` units, floored at zero.
    ///
    /// Returns the new level and the shortfall (units that could not be taken).
    #[must_use]
    pub fn decrement(self, quantity: u32) -> (Self, u32) {
        match self {
            Self::Unlimited => (Self::Unlimited, 0),
            Self::Limited(q) => {
                let taken = q.min(quantity);
                (Self::Limited(q - taken), quantity - taken)
            }
        }
    }
}

impl Serialize for StockLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Unlimited => serializer.serialize_str("unlimited"),
            Self::Limited(q) => serializer.serialize_u32(*q),
        }
    }
}

impl<'de> Deserialize<'de> for StockLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::Null => Self::Unlimited,
            Value::String(s) if s.eq_ignore_ascii_case("unlimited") => Self::Unlimited,
            other => Self::Limited(parse_quantity(&other)),
        })
    }
}

/// Availability answer of the stock ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    /// Units available.
    pub available: StockLevel,
    /// Derived purchasability flag.
    pub in_stock: bool,
}

impl Availability {
    /// Availability of a stock level.
    #[must_use]
    pub const fn of(level: StockLevel) -> Self {
        Self {
            available: level,
            in_stock: level.in_stock(),
        }
    }

    /// Availability of a product given its own column and its variant ledgers.
    ///
    /// When any attribute entries exist they are authoritative and summed live;
    /// otherwise the product column is used as-is.
    #[must_use]
    pub fn from_ledger<'a, I>(product_stock: StockLevel, ledgers: I) -> Self
    where
        I: IntoIterator<Item = &'a [PrimaryValue]>,
    {
        let mut has_entries = false;
        let mut total: u32 = 0;
        for ledger in ledgers {
            for entry in ledger {
                has_entries = true;
                total = total.saturating_add(entry.quantity);
            }
        }
        if has_entries {
            Self::of(StockLevel::Limited(total))
        } else {
            Self::of(product_stock)
        }
    }
}

/// Lenient quantity parse: malformed, negative or non-numeric values become 0.
#[must_use]
pub fn parse_quantity(value: &Value) -> u32 {
    match value {
        Value::Number(n) => n
            .as_u64()
            .map(|q| u32::try_from(q).unwrap_or(u32::MAX))
            .or_else(|| n.as_f64().map(float_quantity))
            .unwrap_or(0),
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<u32>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().map(float_quantity))
                .unwrap_or(0)
        }
        _ => 0,
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "value is clamped to the u32 range first"
)]
fn float_quantity(value: f64) -> u32 {
    if value.is_finite() && value > 0.0 {
        value.floor().min(f64::from(u32::MAX)) as u32
    } else {
        0
    }
}

fn lenient_quantity<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(parse_quantity(&value))
}

/// Attribute-level stock entry (e.g. `color = red`, 4 units).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryValue {
    /// Attribute name (e.g. `color`).
    pub attribute: String,
    /// Attribute value (e.g. `red`).
    pub value: String,
    /// Units on hand for this value.
    #[serde(default, deserialize_with = "lenient_quantity")]
    pub quantity: u32,
}

impl PrimaryValue {
    /// Create an entry.
    #[must_use]
    pub fn new(attribute: impl Into<String>, value: impl Into<String>, quantity: u32) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
            quantity,
        }
    }

    /// Take up to `quantity` units; returns the shortfall.
    pub fn take(&mut self, quantity: u32) -> u32 {
        let taken = self.quantity.min(quantity);
        self.quantity -= taken;
        quantity - taken
    }
}

/// One attribute/value pair chosen by the customer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributePair {
    /// Attribute name.
    pub attribute: String,
    /// Chosen value.
    pub value: String,
}

/// Ordered attribute selection snapshot (cart line and order item).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeSelection(Vec<AttributePair>);

impl AttributeSelection {
    /// Build from ordered pairs, dropping blank entries.
    #[must_use]
    pub fn new<I, A, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (A, V)>,
        A: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(a, v)| AttributePair {
                    attribute: a.into().trim().to_owned(),
                    value: v.into().trim().to_owned(),
                })
                .filter(|p| !p.attribute.is_empty() && !p.value.is_empty())
                .collect(),
        )
    }

    /// The empty selection.
    #[must_use]
    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    /// Whether nothing is selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The ordered pairs.
    #[must_use]
    pub fn pairs(&self) -> &[AttributePair] {
        &self.0
    }

    /// `Some(self)` when not empty.
    #[must_use]
    pub fn as_option(&self) -> Option<&Self> {
        (!self.is_empty()).then_some(self)
    }

    /// Structural match: an entry matches when some selected pair has the same
    /// attribute name and value.
    #[must_use]
    pub fn matches(&self, entry: &PrimaryValue) -> bool {
        self.0
            .iter()
            .any(|p| p.attribute == entry.attribute && p.value == entry.value)
    }
}

/// Which ledger a decrement was applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "path")]
pub enum DecrementPath {
    /// Product-level `stock_quantity`.
    Product,
    /// Attribute entries matched by the selection.
    Attributes {
        /// Number of entries reduced.
        matched: usize,
    },
    /// No selection given on a product with attribute entries; units were
    /// drained from entries in ledger order.
    Drained,
    /// A selection was given but no entry matched; nothing was reduced.
    Unmatched,
}

/// Result of a ledger decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LedgerDecrement {
    /// Ledger that absorbed the decrement.
    pub path: DecrementPath,
    /// Units that could not be taken because the ledger hit zero.
    pub shortfall: u32,
    /// Product aggregate after the decrement.
    pub stock: StockLevel,
}

impl LedgerDecrement {
    /// Derived purchasability after the decrement.
    #[must_use]
    pub const fn in_stock(&self) -> bool {
        self.stock.in_stock()
    }
}

/// Apply a decrement of `quantity` units.
///
/// - No attribute entries: the product level is reduced, floored at zero.
/// - Selection present: every matching entry across all ledgers is reduced by
///   `quantity`, floored at zero.
/// - No selection on a product with entries: units are drained in ledger order
///   so the aggregate still equals the sum of the entries.
///
/// The returned aggregate is recomputed from the entries whenever they exist.
pub fn apply_decrement(
    product_stock: StockLevel,
    ledgers: &mut [&mut [PrimaryValue]],
    quantity: u32,
    selection: Option<&AttributeSelection>,
) -> LedgerDecrement {
    if ledgers.iter().all(|ledger| ledger.is_empty()) {
        let (stock, shortfall) = product_stock.decrement(quantity);
        return LedgerDecrement {
            path: DecrementPath::Product,
            shortfall,
            stock,
        };
    }

    let (path, shortfall) = match selection.filter(|s| !s.is_empty()) {
        Some(selection) => {
            let mut matched = 0;
            let mut shortfall = 0_u32;
            for entry in ledgers
                .iter_mut()
                .flat_map(|ledger| ledger.iter_mut())
                .filter(|entry| selection.matches(entry))
            {
                matched += 1;
                shortfall = shortfall.max(entry.take(quantity));
            }
            if matched == 0 {
                (DecrementPath::Unmatched, quantity)
            } else {
                (DecrementPath::Attributes { matched }, shortfall)
            }
        }
        None => {
            let mut remaining = quantity;
            for entry in ledgers.iter_mut().flat_map(|ledger| ledger.iter_mut()) {
                if remaining == 0 {
                    break;
                }
                remaining = entry.take(remaining);
            }
            (DecrementPath::Drained, remaining)
        }
    };

    LedgerDecrement {
        path,
        shortfall,
        stock: StockLevel::Limited(ledger_total(ledgers)),
    }
}

/// Sum of all attribute entries.
#[must_use]
pub fn ledger_total(ledgers: &[&mut [PrimaryValue]]) -> u32 {
    ledgers
        .iter()
        .flat_map(|ledger| ledger.iter())
        .fold(0_u32, |acc, entry| acc.saturating_add(entry.quantity))
}
