//! Collision-free document number allocation.
//!
//! One allocator serves both quote and invoice numbering; only the prefix
//! differs. The counter for each `(prefix, year)` pair lives in its own row,
//! locked with `SELECT ... FOR UPDATE` inside the caller's transaction, so
//! the read-increment-write span is exclusive for the whole transaction.
//! `SET LOCAL lock_timeout` bounds the wait; when Postgres gives up
//! (SQLSTATE 55P03) the caller sees `SequenceContention` and retries the
//! whole transaction. Aborted transactions may burn a number - gaps are
//! acceptable, duplicates are not.

use crate::error::EngineError;
use crate::services::metrics::SEQUENCE_CONTENTION_TOTAL;
use sqlx::PgConnection;
use tracing::instrument;

#[derive(Debug, Clone)]
pub struct SequenceAllocator {
    lock_timeout_ms: u64,
}

impl SequenceAllocator {
    pub fn new(lock_timeout_ms: u64) -> Self {
        Self { lock_timeout_ms }
    }

    /// Issue the next number for `prefix` within `year`, e.g. `DEV-2025-004`.
    ///
    /// Must run inside an open transaction; the counter row stays locked
    /// until that transaction commits or rolls back.
    #[instrument(skip(self, conn))]
    pub async fn next_number(
        &self,
        conn: &mut PgConnection,
        prefix: &str,
        year: i32,
    ) -> Result<String, EngineError> {
        // lock_timeout does not accept bind parameters; the value is a
        // config-sourced integer, not user input.
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout_ms
        ))
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO document_sequences (prefix, year, last_value)
            VALUES ($1, $2, 0)
            ON CONFLICT (prefix, year) DO NOTHING
            "#,
        )
        .bind(prefix)
        .bind(year)
        .execute(&mut *conn)
        .await?;

        let current: i32 = sqlx::query_scalar(
            r#"
            SELECT last_value
            FROM document_sequences
            WHERE prefix = $1 AND year = $2
            FOR UPDATE
            "#,
        )
        .bind(prefix)
        .bind(year)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| {
            let err = EngineError::from(e);
            if matches!(err, EngineError::SequenceContention) {
                SEQUENCE_CONTENTION_TOTAL.with_label_values(&[prefix]).inc();
            }
            err
        })?;

        let next = current + 1;
        sqlx::query(
            r#"
            UPDATE document_sequences
            SET last_value = $3
            WHERE prefix = $1 AND year = $2
            "#,
        )
        .bind(prefix)
        .bind(year)
        .bind(next)
        .execute(&mut *conn)
        .await?;

        Ok(format_number(prefix, year, next))
    }
}

/// Format a document number: zero-padded to 3 digits, wider once the
/// sequence outgrows 999.
pub fn format_number(prefix: &str, year: i32, sequence: i32) -> String {
    format!("{prefix}-{year}-{sequence:03}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_to_three_digits() {
        assert_eq!(format_number("DEV", 2025, 4), "DEV-2025-004");
        assert_eq!(format_number("FAC", 2025, 17), "FAC-2025-017");
        assert_eq!(format_number("DEV", 2025, 999), "DEV-2025-999");
    }

    #[test]
    fn grows_past_three_digits_without_truncation() {
        assert_eq!(format_number("DEV", 2025, 1000), "DEV-2025-1000");
    }
}
