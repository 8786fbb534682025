//! Quoting service: quote lifecycle, two-factor acceptance, and conversion
//! of accepted quotes into invoices.

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;

pub use error::EngineError;
pub use startup::{AppState, Application};
