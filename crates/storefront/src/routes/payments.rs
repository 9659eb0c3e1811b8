//! Payment provider callback.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use chrono::Utc;

use crate::error::{AppError, Result, add_breadcrumb};
use crate::services::webhook::SIGNATURE_HEADER;
use crate::services::{OrderStatusPayload, PaymentConfirmation};
use crate::state::AppState;

/// Apply a signed payment confirmation.
///
/// POST /api/payments/webhook
///
/// The signature is checked over the raw body before it is parsed.
///
/// # Errors
///
/// Returns 401 for a bad signature, 400 for a malformed body or status and
/// 404 for an unknown reference.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<OrderStatusPayload>> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    state.webhook().verify(signature, &body, Utc::now())?;

    let confirmation: PaymentConfirmation = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid payment callback: {e}")))?;

    add_breadcrumb(
        "payment",
        "Payment callback received",
        &[
            ("reference_id", confirmation.reference_id.as_str()),
            ("status", confirmation.status.as_str()),
        ],
    );

    let payload = state.services().payments.confirm_payment(confirmation).await?;
    Ok(Json(payload))
}
