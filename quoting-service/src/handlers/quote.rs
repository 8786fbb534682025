//! Quote lifecycle handlers.
//!
//! Each operation has an `_impl` function holding the logic and a thin axum
//! wrapper doing extraction and status-code selection.

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::models::{CreateQuote, CreateQuoteItem, Invoice, InvoiceItem, Quote, QuoteItem};
use crate::services::metrics::QUOTES_TOTAL;
use crate::startup::AppState;
use service_core::error::AppError;
use service_core::retry::{retry_with_backoff, RetryConfig};

// ============================================================================
// Request/Response DTOs
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct LineItemRequest {
    #[validate(length(min = 1, message = "description must not be empty"))]
    pub description: String,
    #[validate(custom(function = "validate_non_negative"))]
    pub quantity: Decimal,
    #[validate(custom(function = "validate_non_negative"))]
    pub unit_price: Decimal,
    #[serde(default)]
    #[validate(custom(function = "validate_tax_rate"))]
    pub tax_rate: Decimal,
    #[serde(default)]
    pub sort_order: i32,
}

pub fn validate_non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() {
        return Err(ValidationError::new("negative").with_message("must not be negative".into()));
    }
    Ok(())
}

pub fn validate_tax_rate(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() || *value > Decimal::from(100) {
        return Err(
            ValidationError::new("tax_rate").with_message("must be between 0 and 100".into())
        );
    }
    Ok(())
}

impl From<LineItemRequest> for CreateQuoteItem {
    fn from(req: LineItemRequest) -> Self {
        CreateQuoteItem {
            description: req.description,
            quantity: req.quantity,
            unit_price: req.unit_price,
            tax_rate: req.tax_rate,
            sort_order: req.sort_order,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateQuoteRequest {
    #[validate(length(min = 1, message = "customer_name must not be empty"))]
    pub customer_name: String,
    #[validate(email(message = "Invalid email format"))]
    pub customer_email: String,
    #[serde(default)]
    pub discount: Decimal,
    pub notes: Option<String>,
    #[serde(default)]
    #[validate(nested)]
    pub items: Vec<LineItemRequest>,
}

#[derive(Debug, Serialize)]
pub struct QuoteResponse {
    pub quote_id: Uuid,
    pub number: Option<String>,
    pub status: String,
    pub customer_name: String,
    pub customer_email: String,
    pub issue_date: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,
    pub discount: Decimal,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub grand_total: Decimal,
    pub public_access_token: String,
    pub notes: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub sent_utc: Option<DateTime<Utc>>,
    pub accepted_utc: Option<DateTime<Utc>>,
    pub invoiced_utc: Option<DateTime<Utc>>,
    pub items: Vec<QuoteItem>,
}

impl QuoteResponse {
    pub fn from_parts(quote: Quote, items: Vec<QuoteItem>) -> Self {
        Self {
            quote_id: quote.quote_id,
            number: quote.number,
            status: quote.status,
            customer_name: quote.customer_name,
            customer_email: quote.customer_email,
            issue_date: quote.issue_date,
            valid_until: quote.valid_until,
            discount: quote.discount,
            subtotal: quote.subtotal,
            tax_amount: quote.tax_amount,
            grand_total: quote.grand_total,
            public_access_token: quote.public_access_token,
            notes: quote.notes,
            created_utc: quote.created_utc,
            sent_utc: quote.sent_utc,
            accepted_utc: quote.accepted_utc,
            invoiced_utc: quote.invoiced_utc,
            items,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InvoiceResponse {
    pub invoice_id: Uuid,
    pub number: String,
    /// Stored status with `overdue` derived on read; never written back.
    pub status: String,
    pub source_quote_id: Option<Uuid>,
    pub customer_name: String,
    pub customer_email: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub discount: Decimal,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub grand_total: Decimal,
    pub amount_paid: Decimal,
    pub created_utc: DateTime<Utc>,
    pub items: Vec<InvoiceItem>,
}

impl InvoiceResponse {
    pub fn from_parts(invoice: Invoice, items: Vec<InvoiceItem>, today: NaiveDate) -> Self {
        let status = invoice.effective_status(today).as_str().to_string();
        Self {
            invoice_id: invoice.invoice_id,
            number: invoice.number,
            status,
            source_quote_id: invoice.source_quote_id,
            customer_name: invoice.customer_name,
            customer_email: invoice.customer_email,
            issue_date: invoice.issue_date,
            due_date: invoice.due_date,
            discount: invoice.discount,
            subtotal: invoice.subtotal,
            tax_amount: invoice.tax_amount,
            grand_total: invoice.grand_total,
            amount_paid: invoice.amount_paid,
            created_utc: invoice.created_utc,
            items,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Create a draft quote - implementation.
#[tracing::instrument(skip(state, req), fields(customer = %req.customer_name))]
pub async fn create_quote_impl(
    state: &AppState,
    req: CreateQuoteRequest,
) -> Result<QuoteResponse, AppError> {
    req.validate()?;

    let input = CreateQuote {
        customer_name: req.customer_name,
        customer_email: req.customer_email,
        discount: req.discount,
        notes: req.notes,
    };
    let items: Vec<CreateQuoteItem> = req.items.into_iter().map(Into::into).collect();

    let quote = state.db.create_quote(&input, &items).await?;
    let items = state.db.get_quote_items(quote.quote_id).await?;

    QUOTES_TOTAL.with_label_values(&["draft"]).inc();

    Ok(QuoteResponse::from_parts(quote, items))
}

/// Create a draft quote.
///
/// POST /quotes
pub async fn create_quote(
    State(state): State<AppState>,
    Json(req): Json<CreateQuoteRequest>,
) -> Result<(StatusCode, Json<QuoteResponse>), AppError> {
    let response = create_quote_impl(&state, req).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Add a line item to a draft quote - implementation.
#[tracing::instrument(skip(state, req), fields(quote_id = %quote_id))]
pub async fn add_quote_item_impl(
    state: &AppState,
    quote_id: Uuid,
    req: LineItemRequest,
) -> Result<QuoteResponse, AppError> {
    req.validate()?;

    state.db.add_quote_item(quote_id, &req.into()).await?;

    let quote = state
        .db
        .get_quote(quote_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("quote not found")))?;
    let items = state.db.get_quote_items(quote_id).await?;

    Ok(QuoteResponse::from_parts(quote, items))
}

/// Add a line item to a draft quote.
///
/// POST /quotes/{id}/items
pub async fn add_quote_item(
    State(state): State<AppState>,
    Path(quote_id): Path<Uuid>,
    Json(req): Json<LineItemRequest>,
) -> Result<(StatusCode, Json<QuoteResponse>), AppError> {
    let response = add_quote_item_impl(&state, quote_id, req).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Fetch a quote with its items.
///
/// GET /quotes/{id}
pub async fn get_quote(
    State(state): State<AppState>,
    Path(quote_id): Path<Uuid>,
) -> Result<Json<QuoteResponse>, AppError> {
    let quote = state
        .db
        .get_quote(quote_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("quote not found")))?;
    let items = state.db.get_quote_items(quote_id).await?;
    Ok(Json(QuoteResponse::from_parts(quote, items)))
}

/// Fetch a quote through its public access token. No authentication; the
/// token itself is the capability.
///
/// GET /public/quotes/{access_token}
pub async fn get_public_quote(
    State(state): State<AppState>,
    Path(access_token): Path<String>,
) -> Result<Json<QuoteResponse>, AppError> {
    let quote = state
        .db
        .get_quote_by_access_token(&access_token)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("quote not found")))?;
    let items = state.db.get_quote_items(quote.quote_id).await?;
    Ok(Json(QuoteResponse::from_parts(quote, items)))
}

/// Send a quote - implementation.
///
/// Assigns the document number and freezes the totals; notification and
/// rendering run after the commit and are logged-only on failure.
#[tracing::instrument(skip(state), fields(quote_id = %quote_id))]
pub async fn send_quote_impl(state: &AppState, quote_id: Uuid) -> Result<QuoteResponse, AppError> {
    let quote = state
        .db
        .send_quote(
            quote_id,
            &state.allocator,
            &state.config.engine.quote_prefix,
            state.clock.now(),
            state.config.engine.quote_validity_days,
        )
        .await?;
    let items = state.db.get_quote_items(quote_id).await?;

    QUOTES_TOTAL.with_label_values(&["sent"]).inc();

    let number = quote.number.clone().unwrap_or_default();
    let public_url = format!(
        "{}/public/quotes/{}",
        state.config.public_base_url, quote.public_access_token
    );
    if let Err(e) = state
        .dispatcher
        .send_quote_notification(&quote.customer_email, &number, &public_url)
        .await
    {
        tracing::error!(quote_id = %quote_id, error = %e, "Quote notification failed");
    }
    if let Err(e) = state.renderer.render_quote(&quote, &items).await {
        tracing::error!(quote_id = %quote_id, error = %e, "Quote render failed");
    }

    Ok(QuoteResponse::from_parts(quote, items))
}

/// Send a quote.
///
/// POST /quotes/{id}/send
pub async fn send_quote(
    State(state): State<AppState>,
    Path(quote_id): Path<Uuid>,
) -> Result<Json<QuoteResponse>, AppError> {
    let response = send_quote_impl(&state, quote_id).await?;
    Ok(Json(response))
}

/// Convert an accepted quote to an invoice - implementation.
///
/// Sequence contention is the one transient failure; it gets a short bounded
/// retry before surfacing as 503.
#[tracing::instrument(skip(state), fields(quote_id = %quote_id))]
pub async fn convert_quote_impl(
    state: &AppState,
    quote_id: Uuid,
) -> Result<InvoiceResponse, AppError> {
    let invoice = retry_with_backoff(
        &RetryConfig::quick(),
        "convert_quote",
        |e: &crate::error::EngineError| e.is_retryable(),
        || state.conversion.convert(quote_id),
    )
    .await?;

    QUOTES_TOTAL.with_label_values(&["invoiced"]).inc();

    let items = state.db.get_invoice_items(invoice.invoice_id).await?;

    if let Err(e) = state
        .dispatcher
        .send_conversion_confirmation(&invoice.customer_email, &invoice.number)
        .await
    {
        tracing::error!(invoice_id = %invoice.invoice_id, error = %e, "Conversion confirmation failed");
    }
    if let Err(e) = state.renderer.render_invoice(&invoice, &items).await {
        tracing::error!(invoice_id = %invoice.invoice_id, error = %e, "Invoice render failed");
    }

    Ok(InvoiceResponse::from_parts(
        invoice,
        items,
        state.clock.today(),
    ))
}

/// Convert an accepted quote to an invoice.
///
/// POST /quotes/{id}/convert
pub async fn convert_quote(
    State(state): State<AppState>,
    Path(quote_id): Path<Uuid>,
) -> Result<(StatusCode, Json<InvoiceResponse>), AppError> {
    let response = convert_quote_impl(&state, quote_id).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Fetch an invoice with its items. The status in the response is the
/// effective status as of today.
///
/// GET /invoices/{id}
pub async fn get_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<InvoiceResponse>, AppError> {
    let invoice = state
        .db
        .get_invoice(invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("invoice not found")))?;
    let items = state.db.get_invoice_items(invoice_id).await?;
    Ok(Json(InvoiceResponse::from_parts(
        invoice,
        items,
        state.clock.today(),
    )))
}
