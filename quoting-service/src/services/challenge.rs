//! Validation challenge issue/verify service.
//!
//! A challenge pairs an opaque URL token with a short numeric code delivered
//! out of band. Confirming the code is what moves a quote from Sent to
//! Accepted; both writes happen in one transaction so no quote can read as
//! accepted without a confirmed challenge behind it.

use crate::error::EngineError;
use crate::models::{Quote, QuoteStatus, ValidationChallenge};
use crate::services::database::Database;
use crate::services::metrics::{CHALLENGES_ISSUED_TOTAL, CHALLENGE_VERIFICATIONS_TOTAL};
use crate::services::Clock;
use chrono::Duration;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// A freshly issued challenge. `code` is the plaintext for out-of-band
/// delivery; it is never persisted and never leaves the issuing flow.
pub struct IssuedChallenge {
    pub challenge: ValidationChallenge,
    pub code: String,
}

/// Outcome of a verification attempt. A wrong code is a result, not an
/// error: the attempt is consumed and the caller is told what remains.
#[derive(Debug)]
pub enum VerifyOutcome {
    Confirmed(Quote),
    CodeMismatch { attempts_remaining: i32 },
}

pub struct ChallengeService {
    db: Database,
    clock: Arc<dyn Clock>,
    ttl_minutes: i64,
    attempt_max: i32,
}

impl ChallengeService {
    pub fn new(db: Database, clock: Arc<dyn Clock>, ttl_minutes: i64, attempt_max: i32) -> Self {
        Self {
            db,
            clock,
            ttl_minutes,
            attempt_max,
        }
    }

    /// Issue a new challenge for a sent quote, superseding any active one.
    #[instrument(skip(self), fields(quote_id = %quote_id))]
    pub async fn issue(&self, quote_id: Uuid) -> Result<IssuedChallenge, EngineError> {
        let now = self.clock.now();
        let mut tx = self.db.pool().begin().await?;

        let quote = Database::lock_quote(&mut tx, quote_id)
            .await?
            .ok_or(EngineError::QuoteNotFound)?;
        if quote.status() != QuoteStatus::Sent {
            CHALLENGES_ISSUED_TOTAL.with_label_values(&["rejected"]).inc();
            return Err(EngineError::QuoteNotSent);
        }

        let superseded = Database::supersede_active_challenges(&mut tx, quote_id, now).await?;
        if superseded > 0 {
            info!(superseded = superseded, "Previous challenges superseded");
        }

        let code = generate_code();
        let challenge = ValidationChallenge {
            challenge_id: Uuid::new_v4(),
            quote_id,
            token: generate_token(),
            code_hash: hash_code(&code),
            expires_utc: now + Duration::minutes(self.ttl_minutes),
            confirmed_utc: None,
            superseded_utc: None,
            attempt_count: 0,
            attempt_max: self.attempt_max,
            created_utc: now,
        };
        Database::insert_challenge(&mut tx, &challenge).await?;

        tx.commit().await?;
        CHALLENGES_ISSUED_TOTAL.with_label_values(&["issued"]).inc();

        info!(challenge_id = %challenge.challenge_id, "Validation challenge issued");

        Ok(IssuedChallenge { challenge, code })
    }

    /// Verify a code against the challenge behind `token`.
    ///
    /// Expiry and the attempt budget are checked before the code is compared,
    /// so hammering an expired or exhausted challenge reveals nothing about
    /// the code. On mismatch the attempt increment commits; on match the
    /// confirmation and the quote's Sent -> Accepted transition commit
    /// together.
    #[instrument(skip(self, token, code))]
    pub async fn verify(&self, token: &str, code: &str) -> Result<VerifyOutcome, EngineError> {
        let now = self.clock.now();
        let mut tx = self.db.pool().begin().await?;

        // Row locks are taken quote first, then challenge, the same order
        // issue() uses; an unlocked read resolves the token to its quote
        // before either lock.
        let routing = match Database::find_challenge_by_token(&mut tx, token).await? {
            Some(c) => c,
            None => {
                CHALLENGE_VERIFICATIONS_TOTAL
                    .with_label_values(&["not_found"])
                    .inc();
                return Err(EngineError::ChallengeNotFound);
            }
        };
        let quote = Database::lock_quote(&mut tx, routing.quote_id)
            .await?
            .ok_or(EngineError::QuoteNotFound)?;

        // Authoritative re-read under the lock; the unlocked copy may be
        // stale by the time the quote lock is granted.
        let challenge = match Database::lock_challenge_by_token(&mut tx, token).await? {
            Some(c) => c,
            None => {
                CHALLENGE_VERIFICATIONS_TOTAL
                    .with_label_values(&["not_found"])
                    .inc();
                return Err(EngineError::ChallengeNotFound);
            }
        };

        // A superseded challenge is dead regardless of its expiry.
        if challenge.is_superseded() {
            CHALLENGE_VERIFICATIONS_TOTAL
                .with_label_values(&["not_found"])
                .inc();
            return Err(EngineError::ChallengeNotFound);
        }
        if challenge.is_confirmed() {
            // Idempotent re-submits of the right code still conflict; the
            // quote already moved on.
            return Err(EngineError::IllegalStatusTransition {
                from: quote.status().as_str(),
                to: QuoteStatus::Accepted.as_str(),
            });
        }
        if challenge.is_expired(now) {
            CHALLENGE_VERIFICATIONS_TOTAL
                .with_label_values(&["expired"])
                .inc();
            return Err(EngineError::ChallengeExpired);
        }
        if challenge.attempts_exhausted() {
            CHALLENGE_VERIFICATIONS_TOTAL
                .with_label_values(&["exhausted"])
                .inc();
            return Err(EngineError::AttemptsExhausted);
        }

        Database::record_challenge_attempt(&mut tx, challenge.challenge_id).await?;

        if !code_matches(&challenge.code_hash, code) {
            // The consumed attempt must survive this request.
            tx.commit().await?;
            CHALLENGE_VERIFICATIONS_TOTAL
                .with_label_values(&["mismatch"])
                .inc();
            let remaining = (challenge.attempt_max - challenge.attempt_count - 1).max(0);
            warn!(
                challenge_id = %challenge.challenge_id,
                attempts_remaining = remaining,
                "Challenge code mismatch"
            );
            return Ok(VerifyOutcome::CodeMismatch {
                attempts_remaining: remaining,
            });
        }

        quote.status().validate_transition(QuoteStatus::Accepted)?;

        Database::confirm_challenge(&mut tx, challenge.challenge_id, now).await?;
        let quote =
            Database::update_quote_status(&mut tx, challenge.quote_id, QuoteStatus::Accepted, now)
                .await?;

        tx.commit().await?;
        CHALLENGE_VERIFICATIONS_TOTAL
            .with_label_values(&["confirmed"])
            .inc();

        info!(quote_id = %quote.quote_id, "Quote accepted via validation challenge");

        Ok(VerifyOutcome::Confirmed(quote))
    }
}

/// Generate an opaque URL-safe token: 16 random bytes, hex-encoded.
pub fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.gen();
    hex::encode(bytes)
}

/// Generate a 6-digit numeric code. Leading zeros are significant.
pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..6).map(|_| rng.gen_range(0..10).to_string()).collect()
}

/// SHA-256 of the code, hex-encoded. Only this digest is stored.
pub fn hash_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time comparison of a submitted code against the stored digest.
fn code_matches(stored_hash: &str, submitted: &str) -> bool {
    hash_code(submitted).as_bytes().ct_eq(stored_hash.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_is_six_digits() {
        for _ in 0..50 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn token_is_32_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_is_deterministic_and_hides_the_code() {
        let hash = hash_code("123456");
        assert_eq!(hash, hash_code("123456"));
        assert_ne!(hash, hash_code("123457"));
        assert!(!hash.contains("123456"));
    }

    #[test]
    fn comparison_accepts_only_the_exact_code() {
        let stored = hash_code("042931");
        assert!(code_matches(&stored, "042931"));
        assert!(!code_matches(&stored, "42931"));
        assert!(!code_matches(&stored, "042930"));
        assert!(!code_matches(&stored, ""));
    }
}
