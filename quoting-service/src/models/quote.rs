//! Quote model and its status state machine.

use crate::error::EngineError;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Quote status.
///
/// Legal transitions: Draft → Sent → {Accepted, Rejected}, Accepted → Invoiced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    Draft,
    Sent,
    Accepted,
    Rejected,
    Invoiced,
}

impl QuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteStatus::Draft => "draft",
            QuoteStatus::Sent => "sent",
            QuoteStatus::Accepted => "accepted",
            QuoteStatus::Rejected => "rejected",
            QuoteStatus::Invoiced => "invoiced",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "sent" => QuoteStatus::Sent,
            "accepted" => QuoteStatus::Accepted,
            "rejected" => QuoteStatus::Rejected,
            "invoiced" => QuoteStatus::Invoiced,
            _ => QuoteStatus::Draft,
        }
    }

    /// Validate a transition, failing with `IllegalStatusTransition` naming
    /// the current and attempted state.
    pub fn validate_transition(self, to: QuoteStatus) -> Result<(), EngineError> {
        let legal = matches!(
            (self, to),
            (QuoteStatus::Draft, QuoteStatus::Sent)
                | (QuoteStatus::Sent, QuoteStatus::Accepted)
                | (QuoteStatus::Sent, QuoteStatus::Rejected)
                | (QuoteStatus::Accepted, QuoteStatus::Invoiced)
        );
        if legal {
            Ok(())
        } else {
            Err(EngineError::IllegalStatusTransition {
                from: self.as_str(),
                to: to.as_str(),
            })
        }
    }
}

/// Commercial quote awaiting client acceptance.
///
/// `number` is assigned exactly once, at Draft → Sent. The derived totals are
/// recomputed on every line-item mutation and are never hand-edited.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Quote {
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
}

impl Quote {
    pub fn status(&self) -> QuoteStatus {
        QuoteStatus::from_string(&self.status)
    }
}

/// Input for creating a draft quote.
#[derive(Debug, Clone)]
pub struct CreateQuote {
    pub customer_name: String,
    pub customer_email: String,
    pub discount: Decimal,
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions_pass() {
        assert!(QuoteStatus::Draft
            .validate_transition(QuoteStatus::Sent)
            .is_ok());
        assert!(QuoteStatus::Sent
            .validate_transition(QuoteStatus::Accepted)
            .is_ok());
        assert!(QuoteStatus::Sent
            .validate_transition(QuoteStatus::Rejected)
            .is_ok());
        assert!(QuoteStatus::Accepted
            .validate_transition(QuoteStatus::Invoiced)
            .is_ok());
    }

    #[test]
    fn draft_cannot_jump_to_accepted() {
        let err = QuoteStatus::Draft
            .validate_transition(QuoteStatus::Accepted)
            .unwrap_err();
        match err {
            EngineError::IllegalStatusTransition { from, to } => {
                assert_eq!(from, "draft");
                assert_eq!(to, "accepted");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for from in [QuoteStatus::Rejected, QuoteStatus::Invoiced] {
            for to in [
                QuoteStatus::Draft,
                QuoteStatus::Sent,
                QuoteStatus::Accepted,
                QuoteStatus::Rejected,
                QuoteStatus::Invoiced,
            ] {
                assert!(from.validate_transition(to).is_err());
            }
        }
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            QuoteStatus::Draft,
            QuoteStatus::Sent,
            QuoteStatus::Accepted,
            QuoteStatus::Rejected,
            QuoteStatus::Invoiced,
        ] {
            assert_eq!(QuoteStatus::from_string(status.as_str()), status);
        }
    }
}
