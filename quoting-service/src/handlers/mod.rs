pub mod challenge;
pub mod quote;
pub mod totals;
