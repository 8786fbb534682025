//! Document rendering boundary.
//!
//! Rendering runs strictly after the owning transaction commits; a failed
//! render is logged and never rolls back the state change it follows.

use crate::models::{Invoice, InvoiceItem, Quote, QuoteItem};
use async_trait::async_trait;
use service_core::error::AppError;

#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render_quote(&self, quote: &Quote, items: &[QuoteItem]) -> Result<(), AppError>;

    async fn render_invoice(&self, invoice: &Invoice, items: &[InvoiceItem])
        -> Result<(), AppError>;
}

/// Default renderer: records that a render was requested and does nothing.
/// A PDF backend plugs in behind the same trait.
pub struct NoopRenderer;

#[async_trait]
impl DocumentRenderer for NoopRenderer {
    async fn render_quote(&self, quote: &Quote, items: &[QuoteItem]) -> Result<(), AppError> {
        tracing::debug!(quote_id = %quote.quote_id, items = items.len(), "Quote render skipped");
        Ok(())
    }

    async fn render_invoice(
        &self,
        invoice: &Invoice,
        items: &[InvoiceItem],
    ) -> Result<(), AppError> {
        tracing::debug!(
            invoice_id = %invoice.invoice_id,
            items = items.len(),
            "Invoice render skipped"
        );
        Ok(())
    }
}
