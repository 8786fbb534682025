//! Domain models for quoting-service.

mod challenge;
mod invoice;
mod invoice_item;
mod quote;
mod quote_item;

pub use challenge::ValidationChallenge;
pub use invoice::{Invoice, InvoiceStatus};
pub use invoice_item::InvoiceItem;
pub use quote::{CreateQuote, Quote, QuoteStatus};
pub use quote_item::{CreateQuoteItem, QuoteItem};
