//! Ad-hoc totals computation handler.

use axum::extract::{Json, State};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::handlers::quote::LineItemRequest;
use crate::models::CreateQuoteItem;
use crate::services::compute_totals;
use crate::startup::AppState;
use service_core::error::AppError;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct ComputeTotalsRequest {
    #[validate(nested)]
    pub items: Vec<LineItemRequest>,
    #[serde(default)]
    pub discount: Decimal,
}

#[derive(Debug, Serialize)]
pub struct ComputeTotalsResponse {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub grand_total: Decimal,
}

/// Compute totals over ad-hoc line items, without persisting anything. Used
/// by clients previewing a document while editing.
///
/// POST /totals/compute
pub async fn compute(
    State(_state): State<AppState>,
    Json(req): Json<ComputeTotalsRequest>,
) -> Result<Json<ComputeTotalsResponse>, AppError> {
    req.validate()?;

    let items: Vec<CreateQuoteItem> = req.items.into_iter().map(Into::into).collect();
    let totals = compute_totals(&items, req.discount);

    Ok(Json(ComputeTotalsResponse {
        subtotal: totals.subtotal,
        tax_amount: totals.tax_amount,
        grand_total: totals.grand_total,
    }))
}
