//! Manual stock corrections.
//!
//! # Usage
//!
//! ```bash
//! # Product-level stock (omit --quantity for unlimited)
//! orchard-cli stock set --product 12 --quantity 40
//!
//! # One attribute entry of a variant
//! orchard-cli stock set-variant --product 12 --variant 3 --attribute color --value red --quantity 8
//! ```

use orchard_core::{ProductId, StockLevel, VariantId};

use super::{CommandError, connect_services};

/// Overwrite product-level stock.
///
/// # Errors
///
/// Returns an error when the product tracks stock per attribute or on
/// storage failure.
pub async fn set(product: i32, quantity: Option<u32>) -> Result<(), CommandError> {
    let services = connect_services().await?;
    let level = quantity.map_or(StockLevel::Unlimited, StockLevel::Limited);
    let availability = services
        .ledger
        .set_product_stock(ProductId::new(product), level)
        .await?;
    tracing::info!(
        product_id = product,
        available = ?availability.available,
        in_stock = availability.in_stock,
        "Product stock updated"
    );
    Ok(())
}

/// Overwrite one attribute entry; the product aggregate is recomputed.
///
/// # Errors
///
/// Returns an error for blank attributes, unknown entries or on storage
/// failure.
pub async fn set_variant(
    product: i32,
    variant: i32,
    attribute: &str,
    value: &str,
    quantity: u32,
) -> Result<(), CommandError> {
    if attribute.trim().is_empty() || value.trim().is_empty() {
        return Err(CommandError::InvalidArgument(
            "attribute and value must not be blank".to_string(),
        ));
    }

    let services = connect_services().await?;
    let availability = services
        .ledger
        .set_variant_quantity(
            ProductId::new(product),
            VariantId::new(variant),
            attribute,
            value,
            quantity,
        )
        .await?;
    tracing::info!(
        product_id = product,
        variant_id = variant,
        available = ?availability.available,
        "Variant stock updated"
    );
    Ok(())
}
