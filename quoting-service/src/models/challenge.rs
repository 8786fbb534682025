//! Validation challenge model - two-factor quote acceptance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Short-lived secret-code exchange confirming client acceptance of a quote.
///
/// Only the SHA-256 of the code is stored; the plaintext code exists solely
/// in the out-of-band delivery. At most one active challenge exists per quote:
/// issuing a new one supersedes the previous.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ValidationChallenge {
    pub challenge_id: Uuid,
    pub quote_id: Uuid,
    pub token: String,
    pub code_hash: String,
    pub expires_utc: DateTime<Utc>,
    pub confirmed_utc: Option<DateTime<Utc>>,
    pub superseded_utc: Option<DateTime<Utc>>,
    pub attempt_count: i32,
    pub attempt_max: i32,
    pub created_utc: DateTime<Utc>,
}

impl ValidationChallenge {
    pub fn is_confirmed(&self) -> bool {
        self.confirmed_utc.is_some()
    }

    pub fn is_superseded(&self) -> bool {
        self.superseded_utc.is_some()
    }

    /// Expiry is a passive, time-checked condition; nothing ever actively
    /// expires a challenge.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_utc
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempt_count >= self.attempt_max
    }

    pub fn attempts_remaining(&self) -> i32 {
        (self.attempt_max - self.attempt_count).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn challenge(expires_in_minutes: i64, attempts: i32) -> ValidationChallenge {
        let now = Utc::now();
        ValidationChallenge {
            challenge_id: Uuid::new_v4(),
            quote_id: Uuid::new_v4(),
            token: "ab".repeat(16),
            code_hash: "00".repeat(32),
            expires_utc: now + Duration::minutes(expires_in_minutes),
            confirmed_utc: None,
            superseded_utc: None,
            attempt_count: attempts,
            attempt_max: 5,
            created_utc: now,
        }
    }

    #[test]
    fn expiry_is_checked_against_the_supplied_clock() {
        let ch = challenge(15, 0);
        assert!(!ch.is_expired(Utc::now()));
        assert!(ch.is_expired(Utc::now() + Duration::minutes(16)));
        // exactly at the boundary the challenge is still alive
        assert!(!ch.is_expired(ch.expires_utc));
    }

    #[test]
    fn attempts_exhaust_at_the_limit() {
        assert!(!challenge(15, 4).attempts_exhausted());
        assert!(challenge(15, 5).attempts_exhausted());
        assert_eq!(challenge(15, 3).attempts_remaining(), 2);
        assert_eq!(challenge(15, 7).attempts_remaining(), 0);
    }
}
