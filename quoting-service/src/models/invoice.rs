//! Invoice model and status handling.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Invoice status.
///
/// `Overdue` is a derived observation, not a stored fact: it is recomputed
/// from the due date and the amount paid on every read (see
/// [`Invoice::effective_status`]) and never written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
    PartiallyPaid,
    Overdue,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::PartiallyPaid => "partially_paid",
            InvoiceStatus::Overdue => "overdue",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "sent" => InvoiceStatus::Sent,
            "paid" => InvoiceStatus::Paid,
            "partially_paid" => InvoiceStatus::PartiallyPaid,
            "overdue" => InvoiceStatus::Overdue,
            _ => InvoiceStatus::Draft,
        }
    }
}

/// Billing document, usually derived from an accepted quote.
///
/// `source_quote_id` is informational only: the invoice owns copies of the
/// quote's line items and survives quote deletion.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub number: String,
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
}

impl Invoice {
    pub fn status(&self) -> InvoiceStatus {
        InvoiceStatus::from_string(&self.status)
    }

    /// Status as observed on `today`: an outstanding invoice past its due
    /// date reads as `Overdue` without any stored state changing. Only a
    /// fully paid invoice escapes the derivation.
    pub fn effective_status(&self, today: NaiveDate) -> InvoiceStatus {
        let outstanding = self.amount_paid < self.grand_total;
        if outstanding && today > self.due_date {
            InvoiceStatus::Overdue
        } else {
            self.status()
        }
    }
}
