//! Quote line item model.

use crate::error::EngineError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Line item on a quote, owned exclusively by it (deleted with the quote).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QuoteItem {
    pub quote_item_id: Uuid,
    pub quote_id: Uuid,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub tax_rate: Decimal,
    pub sort_order: i32,
    pub created_utc: DateTime<Utc>,
}

/// Input for creating a line item.
#[derive(Debug, Clone)]
pub struct CreateQuoteItem {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub tax_rate: Decimal,
    pub sort_order: i32,
}

impl CreateQuoteItem {
    /// Quantity and price are non-negative (fractional quantities allowed),
    /// tax rate is a percentage in 0..=100.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.description.trim().is_empty() {
            return Err(EngineError::InvalidLineItem(
                "description must not be empty".to_string(),
            ));
        }
        if self.quantity < Decimal::ZERO {
            return Err(EngineError::InvalidLineItem(
                "quantity must not be negative".to_string(),
            ));
        }
        if self.unit_price < Decimal::ZERO {
            return Err(EngineError::InvalidLineItem(
                "unit price must not be negative".to_string(),
            ));
        }
        if self.tax_rate < Decimal::ZERO || self.tax_rate > Decimal::from(100) {
            return Err(EngineError::InvalidLineItem(
                "tax rate must be between 0 and 100".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(quantity: &str, unit_price: &str, tax_rate: &str) -> CreateQuoteItem {
        CreateQuoteItem {
            description: "Consulting".to_string(),
            quantity: quantity.parse().unwrap(),
            unit_price: unit_price.parse().unwrap(),
            tax_rate: tax_rate.parse().unwrap(),
            sort_order: 0,
        }
    }

    #[test]
    fn accepts_fractional_quantities() {
        assert!(item("1.33", "7.99", "20").validate().is_ok());
    }

    #[test]
    fn rejects_negative_amounts_and_out_of_range_tax() {
        assert!(item("-1", "10", "20").validate().is_err());
        assert!(item("1", "-10", "20").validate().is_err());
        assert!(item("1", "10", "101").validate().is_err());
        assert!(item("1", "10", "-5").validate().is_err());
    }

    #[test]
    fn rejects_blank_description() {
        let mut it = item("1", "10", "20");
        it.description = "   ".to_string();
        assert!(it.validate().is_err());
    }
}
