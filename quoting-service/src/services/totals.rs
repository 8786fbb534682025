//! Totals calculation for quotes and invoices.
//!
//! Pure and idempotent: callers recompute and overwrite the stored derived
//! fields on every line-item mutation. All rounding is half-up to 2 decimal
//! places; banker's rounding would silently underbill.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::models::{CreateQuoteItem, InvoiceItem, QuoteItem};

/// The monetary inputs of a single line.
#[derive(Debug, Clone, Copy)]
pub struct LineInput {
    pub quantity: Decimal,
    pub unit_price: Decimal,
    /// Percentage in 0..=100.
    pub tax_rate: Decimal,
}

impl From<&QuoteItem> for LineInput {
    fn from(item: &QuoteItem) -> Self {
        Self {
            quantity: item.quantity,
            unit_price: item.unit_price,
            tax_rate: item.tax_rate,
        }
    }
}

impl From<&CreateQuoteItem> for LineInput {
    fn from(item: &CreateQuoteItem) -> Self {
        Self {
            quantity: item.quantity,
            unit_price: item.unit_price,
            tax_rate: item.tax_rate,
        }
    }
}

impl From<&InvoiceItem> for LineInput {
    fn from(item: &InvoiceItem) -> Self {
        Self {
            quantity: item.quantity,
            unit_price: item.unit_price,
            tax_rate: item.tax_rate,
        }
    }
}

/// Derived document totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub grand_total: Decimal,
}

impl Totals {
    pub fn zero() -> Self {
        Self {
            subtotal: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            grand_total: Decimal::ZERO,
        }
    }
}

/// Round half-up to 2 decimal places.
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Compute `(subtotal, tax, grand total)` over ordered line items.
///
/// Each line's subtotal is `round2(quantity * unit_price)`. The discount is
/// subtracted from the summed subtotal, clamped at zero; tax is computed per
/// line on its pro-rata reduced base, summed, then rounded once. A discount
/// exceeding the subtotal is a defined degenerate case yielding all zeros,
/// never an error.
pub fn compute_totals<'a, I, T>(items: I, discount: Decimal) -> Totals
where
    I: IntoIterator<Item = &'a T>,
    T: 'a,
    LineInput: From<&'a T>,
{
    let lines: Vec<LineInput> = items.into_iter().map(LineInput::from).collect();

    let line_subtotals: Vec<Decimal> = lines
        .iter()
        .map(|line| round2(line.quantity * line.unit_price))
        .collect();
    let raw_subtotal: Decimal = line_subtotals.iter().copied().sum();

    // Over-discounted (or empty) documents collapse to zero across the board.
    let discount = discount.max(Decimal::ZERO);
    if raw_subtotal <= Decimal::ZERO || discount >= raw_subtotal {
        return Totals::zero();
    }

    let subtotal = round2(raw_subtotal - discount);
    // Each line's taxable base shrinks by the same ratio the discount
    // removed from the subtotal.
    let taxable_ratio = subtotal / raw_subtotal;

    let tax_sum: Decimal = lines
        .iter()
        .zip(line_subtotals.iter())
        .map(|(line, line_subtotal)| {
            line_subtotal * taxable_ratio * line.tax_rate / Decimal::from(100)
        })
        .sum();
    let tax_amount = round2(tax_sum);

    Totals {
        subtotal,
        tax_amount,
        grand_total: subtotal + tax_amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(quantity: &str, unit_price: &str, tax_rate: &str) -> QuoteItem {
        QuoteItem {
            quote_item_id: uuid::Uuid::new_v4(),
            quote_id: uuid::Uuid::new_v4(),
            description: "Line".to_string(),
            quantity: quantity.parse().unwrap(),
            unit_price: unit_price.parse().unwrap(),
            tax_rate: tax_rate.parse().unwrap(),
            sort_order: 0,
            created_utc: chrono::Utc::now(),
        }
    }

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn sums_lines_with_per_line_tax() {
        let items = vec![line("2", "100", "20"), line("1", "50", "20")];
        let totals = compute_totals(&items, Decimal::ZERO);
        assert_eq!(totals.subtotal, dec("250.00"));
        assert_eq!(totals.tax_amount, dec("50.00"));
        assert_eq!(totals.grand_total, dec("300.00"));
    }

    #[test]
    fn rounds_half_up_per_line_and_on_the_tax_sum() {
        // 1.33 * 7.99 = 10.6267 -> 10.63; 20% of 10.63 = 2.126 -> 2.13
        let items = vec![line("1.33", "7.99", "20")];
        let totals = compute_totals(&items, Decimal::ZERO);
        assert_eq!(totals.subtotal, dec("10.63"));
        assert_eq!(totals.tax_amount, dec("2.13"));
        assert_eq!(totals.grand_total, dec("12.76"));
    }

    #[test]
    fn discount_reduces_tax_pro_rata() {
        // 100 subtotal, 50 discount -> taxable base halves, tax halves.
        let items = vec![line("1", "100", "20")];
        let totals = compute_totals(&items, dec("50"));
        assert_eq!(totals.subtotal, dec("50.00"));
        assert_eq!(totals.tax_amount, dec("10.00"));
        assert_eq!(totals.grand_total, dec("60.00"));
    }

    #[test]
    fn discount_exceeding_subtotal_clamps_everything_to_zero() {
        let items = vec![line("1", "100", "20")];
        let totals = compute_totals(&items, dec("150"));
        assert_eq!(totals, Totals::zero());
    }

    #[test]
    fn discount_equal_to_subtotal_is_also_zero() {
        let items = vec![line("1", "100", "20")];
        let totals = compute_totals(&items, dec("100"));
        assert_eq!(totals, Totals::zero());
    }

    #[test]
    fn empty_item_list_is_zero() {
        let items: Vec<QuoteItem> = vec![];
        assert_eq!(compute_totals(&items, Decimal::ZERO), Totals::zero());
    }

    #[test]
    fn mixed_tax_rates_are_applied_per_line() {
        let items = vec![line("1", "100", "20"), line("1", "100", "0")];
        let totals = compute_totals(&items, Decimal::ZERO);
        assert_eq!(totals.subtotal, dec("200.00"));
        assert_eq!(totals.tax_amount, dec("20.00"));
        assert_eq!(totals.grand_total, dec("220.00"));
    }

    #[test]
    fn negative_discount_is_ignored() {
        let items = vec![line("1", "100", "20")];
        let totals = compute_totals(&items, dec("-10"));
        assert_eq!(totals.subtotal, dec("100.00"));
        assert_eq!(totals.tax_amount, dec("20.00"));
    }

    #[test]
    fn recomputation_is_idempotent() {
        let items = vec![line("3", "19.99", "8.5")];
        let first = compute_totals(&items, dec("5"));
        let second = compute_totals(&items, dec("5"));
        assert_eq!(first, second);
    }
}
