//! Atomic quote-to-invoice conversion.

use crate::error::EngineError;
use crate::models::{Invoice, InvoiceItem, InvoiceStatus, QuoteStatus};
use crate::services::database::Database;
use crate::services::metrics::{CONVERSIONS_TOTAL, DB_QUERY_DURATION};
use crate::services::sequence::SequenceAllocator;
use crate::services::totals::compute_totals;
use crate::services::Clock;
use chrono::{Datelike, Duration};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

pub struct ConversionService {
    db: Database,
    allocator: SequenceAllocator,
    invoice_prefix: String,
    clock: Arc<dyn Clock>,
    due_days: i64,
}

impl ConversionService {
    pub fn new(
        db: Database,
        allocator: SequenceAllocator,
        invoice_prefix: String,
        clock: Arc<dyn Clock>,
        due_days: i64,
    ) -> Self {
        Self {
            db,
            allocator,
            invoice_prefix,
            clock,
            due_days,
        }
    }

    /// Convert an accepted quote into a draft invoice.
    ///
    /// Everything happens in one transaction: the quote row is locked first,
    /// so two concurrent conversions serialize and the loser fails the
    /// `QuoteAlreadyInvoiced` guard. The unique constraint on
    /// `invoices.source_quote_id` backs the guard at the schema level.
    ///
    /// The invoice deep-copies the quote's line items and draws its number
    /// from its own sequence; later edits to either document never touch the
    /// other.
    #[instrument(skip(self), fields(quote_id = %quote_id))]
    pub async fn convert(&self, quote_id: Uuid) -> Result<Invoice, EngineError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["convert_quote"])
            .start_timer();

        let now = self.clock.now();
        let mut tx = self.db.pool().begin().await?;

        let quote = Database::lock_quote(&mut tx, quote_id)
            .await?
            .ok_or(EngineError::QuoteNotFound)?;

        if quote.status() == QuoteStatus::Invoiced
            || Database::find_invoice_by_source(&mut tx, quote_id)
                .await?
                .is_some()
        {
            CONVERSIONS_TOTAL
                .with_label_values(&["already_invoiced"])
                .inc();
            return Err(EngineError::QuoteAlreadyInvoiced);
        }
        if quote.status() != QuoteStatus::Accepted {
            CONVERSIONS_TOTAL.with_label_values(&["rejected"]).inc();
            return Err(EngineError::QuoteNotAccepted);
        }

        let quote_items = Database::quote_items(&mut tx, quote_id).await?;
        if quote_items.is_empty() {
            CONVERSIONS_TOTAL.with_label_values(&["rejected"]).inc();
            return Err(EngineError::EmptyQuote);
        }

        let issue_date = now.date_naive();
        let number = self
            .allocator
            .next_number(&mut tx, &self.invoice_prefix, issue_date.year())
            .await?;

        let totals = compute_totals(&quote_items, quote.discount);
        let invoice_id = Uuid::new_v4();
        let invoice = Invoice {
            invoice_id,
            number,
            status: InvoiceStatus::Draft.as_str().to_string(),
            source_quote_id: Some(quote_id),
            customer_name: quote.customer_name.clone(),
            customer_email: quote.customer_email.clone(),
            issue_date,
            due_date: issue_date + Duration::days(self.due_days),
            discount: quote.discount,
            subtotal: totals.subtotal,
            tax_amount: totals.tax_amount,
            grand_total: totals.grand_total,
            amount_paid: rust_decimal::Decimal::ZERO,
            created_utc: now,
        };
        Database::insert_invoice(&mut tx, &invoice).await?;

        let invoice_items: Vec<InvoiceItem> = quote_items
            .iter()
            .map(|item| InvoiceItem {
                invoice_item_id: Uuid::new_v4(),
                invoice_id,
                description: item.description.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                tax_rate: item.tax_rate,
                sort_order: item.sort_order,
                created_utc: now,
            })
            .collect();
        Database::insert_invoice_items(&mut tx, &invoice_items).await?;

        Database::update_quote_status(&mut tx, quote_id, QuoteStatus::Invoiced, now).await?;

        tx.commit().await?;
        timer.observe_duration();
        CONVERSIONS_TOTAL.with_label_values(&["converted"]).inc();

        info!(
            invoice_id = %invoice.invoice_id,
            number = %invoice.number,
            "Quote converted to invoice"
        );

        Ok(invoice)
    }
}
