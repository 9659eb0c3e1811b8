//! Restock estimates shown on out-of-stock responses.

use serde::{Deserialize, Serialize};

/// Unit of a restock estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnTimeUnit {
    Hours,
    Days,
    Weeks,
    Months,
}

impl ReturnTimeUnit {
    /// Lenient parse of a stored unit (`"day"`, `"Days"`, `"weeks"` ...).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.trim_end_matches('s') {
            "hour" | "hr" => Some(Self::Hours),
            "day" => Some(Self::Days),
            "week" | "wk" => Some(Self::Weeks),
            "month" => Some(Self::Months),
            _ => None,
        }
    }

    const fn label(self, singular: bool) -> &'static str {
        match (self, singular) {
            (Self::Hours, true) => "hour",
            (Self::Hours, false) => "hours",
            (Self::Days, true) => "day",
            (Self::Days, false) => "days",
            (Self::Weeks, true) => "week",
            (Self::Weeks, false) => "weeks",
            (Self::Months, true) => "month",
            (Self::Months, false) => "months",
        }
    }
}

/// Estimated time until a product is back in stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestockEta {
    pub unit: ReturnTimeUnit,
    pub value: u32,
}

impl RestockEta {
    /// Build from the product's stored columns.
    ///
    /// Returns `None` unless both parts are present and the value is positive.
    #[must_use]
    pub fn from_parts(unit: Option<&str>, value: Option<i32>) -> Option<Self> {
        let unit = ReturnTimeUnit::parse(unit?)?;
        let value = u32::try_from(value?).ok().filter(|v| *v > 0)?;
        Some(Self { unit, value })
    }

    /// Customer-facing description, e.g. `"Expected back in 3 days"`.
    #[must_use]
    pub fn describe(&self) -> String {
        format!(
            "Expected back in {} {}",
            self.value,
            self.unit.label(self.value == 1)
        )
    }
}

/// Out-of-stock message for a product, with the restock estimate when known.
#[must_use]
pub fn out_of_stock_message(product_name: &str, eta: Option<&RestockEta>) -> String {
    match eta {
        Some(eta) => format!("{product_name} is out of stock. {}.", eta.describe()),
        None => format!("{product_name} is out of stock."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_parse_is_lenient() {
        assert_eq!(ReturnTimeUnit::parse("Days"), Some(ReturnTimeUnit::Days));
        assert_eq!(ReturnTimeUnit::parse(" week "), Some(ReturnTimeUnit::Weeks));
        assert_eq!(ReturnTimeUnit::parse("hrs"), Some(ReturnTimeUnit::Hours));
        assert_eq!(ReturnTimeUnit::parse("fortnight"), None);
    }

    #[test]
    fn test_from_parts_requires_both_parts() {
        assert!(RestockEta::from_parts(Some("days"), None).is_none());
        assert!(RestockEta::from_parts(None, Some(3)).is_none());
        assert!(RestockEta::from_parts(Some("days"), Some(0)).is_none());
        assert!(RestockEta::from_parts(Some("days"), Some(-1)).is_none());
        assert_eq!(
            RestockEta::from_parts(Some("days"), Some(3)),
            Some(RestockEta {
                unit: ReturnTimeUnit::Days,
                value: 3
            })
        );
    }

    #[test]
    fn test_describe_is_singular_aware() {
        let one = RestockEta {
            unit: ReturnTimeUnit::Weeks,
            value: 1,
        };
        assert_eq!(one.describe(), "Expected back in 1 week");
        let many = RestockEta {
            unit: ReturnTimeUnit::Months,
            value: 2,
        };
        assert_eq!(many.describe(), "Expected back in 2 months");
    }

    #[test]
    fn test_out_of_stock_message() {
        assert_eq!(out_of_stock_message("Mug", None), "Mug is out of stock.");
        let eta = RestockEta {
            unit: ReturnTimeUnit::Days,
            value: 3,
        };
        assert_eq!(
            out_of_stock_message("Mug", Some(&eta)),
            "Mug is out of stock. Expected back in 3 days."
        );
    }
}
