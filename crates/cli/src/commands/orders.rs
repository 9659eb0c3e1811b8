//! Order lifecycle commands.
//!
//! # Usage
//!
//! ```bash
//! # Fail stale pending orders and delete stale failed ones
//! orchard-cli orders sweep
//!
//! # Apply a payment confirmation by hand (e.g. after a lost callback)
//! orchard-cli orders confirm-payment --reference REF-20260301120000-AB12CD34EF --status paid
//! ```

use orchard_core::ReferenceId;
use orchard_storefront::services::PaymentConfirmation;

use super::{CommandError, connect_services};

/// Run one lifecycle sweep.
///
/// # Errors
///
/// Returns an error if the database is unreachable or the sweep fails.
pub async fn sweep() -> Result<(), CommandError> {
    let services = connect_services().await?;
    let report = services.janitor.run_sweep().await?;
    tracing::info!(
        failed = report.failed_count,
        deleted = report.deleted_count,
        "Sweep complete"
    );
    Ok(())
}

/// Apply a payment status to the order with `reference`.
///
/// # Errors
///
/// Returns an error for unknown references or statuses and on storage
/// failure.
pub async fn confirm_payment(
    reference: &str,
    status: &str,
    payment_id: Option<String>,
    method: Option<String>,
) -> Result<(), CommandError> {
    let services = connect_services().await?;
    let payload = services
        .payments
        .confirm_payment(PaymentConfirmation {
            reference_id: ReferenceId::new(reference),
            status: status.to_owned(),
            payment_id,
            payment_method: method,
            amount: None,
        })
        .await?;

    for shortfall in &payload.stock_shortfalls {
        tracing::warn!(
            product_id = %shortfall.product_id,
            requested = shortfall.requested,
            shortfall = shortfall.shortfall,
            "Stock shortfall, follow up with the customer"
        );
    }
    tracing::info!(payload = %serde_json::to_string(&payload)?, "Payment applied");
    Ok(())
}
