//! Typed error taxonomy for the document lifecycle engine.
//!
//! Persistence-layer errors are translated here at the transaction boundary;
//! no raw `sqlx::Error` crosses into the handlers.

use service_core::error::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("quote not found")]
    QuoteNotFound,

    #[error("invoice not found")]
    InvoiceNotFound,

    #[error("illegal status transition from '{from}' to '{to}'")]
    IllegalStatusTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("invalid line item: {0}")]
    InvalidLineItem(String),

    #[error("quote has no line items")]
    EmptyQuote,

    #[error("line items can only change while a quote is in draft")]
    QuoteNotDraft,

    #[error("quote must be sent before a validation challenge can be issued")]
    QuoteNotSent,

    #[error("quote has not been accepted")]
    QuoteNotAccepted,

    #[error("this quote was already converted to an invoice")]
    QuoteAlreadyInvoiced,

    #[error("a document with this number already exists")]
    DuplicateDocumentNumber,

    #[error("could not acquire the numbering lock in time")]
    SequenceContention,

    #[error("validation challenge not found")]
    ChallengeNotFound,

    #[error("validation challenge has expired, request a new code")]
    ChallengeExpired,

    #[error("too many failed attempts, request a new code")]
    AttemptsExhausted,

    #[error("database error: {0}")]
    Database(#[source] anyhow::Error),
}

impl EngineError {
    /// Stable label for the errors metric.
    pub fn metric_label(&self) -> &'static str {
        match self {
            EngineError::QuoteNotFound => "quote_not_found",
            EngineError::InvoiceNotFound => "invoice_not_found",
            EngineError::IllegalStatusTransition { .. } => "illegal_transition",
            EngineError::InvalidLineItem(_) => "invalid_line_item",
            EngineError::EmptyQuote => "empty_quote",
            EngineError::QuoteNotDraft => "quote_not_draft",
            EngineError::QuoteNotSent => "quote_not_sent",
            EngineError::QuoteNotAccepted => "quote_not_accepted",
            EngineError::QuoteAlreadyInvoiced => "quote_already_invoiced",
            EngineError::DuplicateDocumentNumber => "duplicate_number",
            EngineError::SequenceContention => "sequence_contention",
            EngineError::ChallengeNotFound => "challenge_not_found",
            EngineError::ChallengeExpired => "challenge_expired",
            EngineError::AttemptsExhausted => "attempts_exhausted",
            EngineError::Database(_) => "database",
        }
    }

    /// Contention errors are the only ones worth an automatic retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::SequenceContention)
    }
}

/// SQLSTATE for Postgres `lock_not_available`, raised when `lock_timeout`
/// expires while waiting on a row lock.
const LOCK_NOT_AVAILABLE: &str = "55P03";

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.code().as_deref() == Some(LOCK_NOT_AVAILABLE) {
                return EngineError::SequenceContention;
            }
            // The unique indexes on the number columns are the last line of
            // defense; a violation means the race is lost, not a server fault.
            if db_err.is_unique_violation() {
                return EngineError::DuplicateDocumentNumber;
            }
        }
        EngineError::Database(anyhow::Error::new(err))
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        crate::services::metrics::ERRORS_TOTAL
            .with_label_values(&[err.metric_label()])
            .inc();
        let message = err.to_string();
        match err {
            EngineError::QuoteNotFound
            | EngineError::InvoiceNotFound
            | EngineError::ChallengeNotFound => AppError::NotFound(anyhow::anyhow!(message)),

            EngineError::IllegalStatusTransition { .. }
            | EngineError::InvalidLineItem(_)
            | EngineError::EmptyQuote
            | EngineError::QuoteNotDraft
            | EngineError::QuoteNotSent
            | EngineError::QuoteNotAccepted => AppError::BadRequest(anyhow::anyhow!(message)),

            // Definitive integrity failures: retrying cannot change the outcome.
            EngineError::QuoteAlreadyInvoiced => AppError::Conflict(anyhow::anyhow!(
                "this document was already processed"
            )),
            EngineError::DuplicateDocumentNumber => AppError::Conflict(anyhow::anyhow!(message)),

            // Retryable by the caller.
            EngineError::SequenceContention => AppError::ServiceUnavailable,

            EngineError::ChallengeExpired => AppError::Gone(anyhow::anyhow!(message)),
            EngineError::AttemptsExhausted => AppError::TooManyRequests(message, None),

            EngineError::Database(inner) => AppError::DatabaseError(inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_contention_is_retryable() {
        assert!(EngineError::SequenceContention.is_retryable());
        assert!(!EngineError::QuoteAlreadyInvoiced.is_retryable());
        assert!(!EngineError::ChallengeExpired.is_retryable());
    }

    #[test]
    fn duplicate_number_is_a_conflict() {
        let app_err = AppError::from(EngineError::DuplicateDocumentNumber);
        assert!(matches!(app_err, AppError::Conflict(_)));
    }

    #[test]
    fn transition_error_names_both_states() {
        let err = EngineError::IllegalStatusTransition {
            from: "draft",
            to: "accepted",
        };
        let msg = err.to_string();
        assert!(msg.contains("draft"));
        assert!(msg.contains("accepted"));
    }
}
