//! Database service for quoting-service.
//!
//! Pool-level methods serve the handlers directly. The `pub(crate)` methods
//! taking `&mut PgConnection` are row-level building blocks for the challenge
//! and conversion services, which compose them inside a single transaction.

use crate::error::EngineError;
use crate::models::{
    CreateQuote, CreateQuoteItem, Invoice, InvoiceItem, Quote, QuoteItem, QuoteStatus,
    ValidationChallenge,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::sequence::SequenceAllocator;
use crate::services::totals::{compute_totals, Totals};
use chrono::{DateTime, Datelike, Duration, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::PgConnection;
use tracing::{info, instrument};
use uuid::Uuid;

const QUOTE_COLUMNS: &str = "quote_id, number, status, customer_name, customer_email, \
     issue_date, valid_until, discount, subtotal, tax_amount, grand_total, \
     public_access_token, notes, created_utc, sent_utc, accepted_utc, invoiced_utc";

const INVOICE_COLUMNS: &str = "invoice_id, number, status, source_quote_id, customer_name, \
     customer_email, issue_date, due_date, discount, subtotal, tax_amount, grand_total, \
     amount_paid, created_utc";

const CHALLENGE_COLUMNS: &str = "challenge_id, quote_id, token, code_hash, expires_utc, \
     confirmed_utc, superseded_utc, attempt_count, attempt_max, created_utc";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "quoting-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .idle_timeout(std::time::Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Wrap an already-built pool (test harness entry point).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Quote Operations
    // -------------------------------------------------------------------------

    /// Create a new draft quote with its initial line items.
    #[instrument(skip(self, input, items), fields(customer = %input.customer_name))]
    pub async fn create_quote(
        &self,
        input: &CreateQuote,
        items: &[CreateQuoteItem],
    ) -> Result<Quote, EngineError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_quote"])
            .start_timer();

        for item in items {
            item.validate()?;
        }

        let mut tx = self.pool.begin().await?;

        let quote_id = Uuid::new_v4();
        let access_token = crate::services::challenge::generate_token();
        sqlx::query(
            r#"
            INSERT INTO quotes (quote_id, status, customer_name, customer_email,
                discount, public_access_token, notes)
            VALUES ($1, 'draft', $2, $3, $4, $5, $6)
            "#,
        )
        .bind(quote_id)
        .bind(&input.customer_name)
        .bind(&input.customer_email)
        .bind(input.discount)
        .bind(&access_token)
        .bind(&input.notes)
        .execute(&mut *tx)
        .await?;

        for item in items {
            Self::insert_quote_item(&mut tx, quote_id, item).await?;
        }

        let stored = Self::quote_items(&mut tx, quote_id).await?;
        let totals = compute_totals(&stored, input.discount);
        Self::update_quote_totals(&mut tx, quote_id, &totals).await?;

        let quote = Self::fetch_quote(&mut tx, quote_id)
            .await?
            .ok_or(EngineError::QuoteNotFound)?;

        tx.commit().await?;
        timer.observe_duration();

        info!(quote_id = %quote.quote_id, "Draft quote created");

        Ok(quote)
    }

    /// Get a quote by ID.
    #[instrument(skip(self), fields(quote_id = %quote_id))]
    pub async fn get_quote(&self, quote_id: Uuid) -> Result<Option<Quote>, EngineError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_quote"])
            .start_timer();

        let quote = sqlx::query_as::<_, Quote>(&format!(
            "SELECT {QUOTE_COLUMNS} FROM quotes WHERE quote_id = $1"
        ))
        .bind(quote_id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();

        Ok(quote)
    }

    /// Get a quote by its public access token (unauthenticated client flow).
    #[instrument(skip(self, access_token))]
    pub async fn get_quote_by_access_token(
        &self,
        access_token: &str,
    ) -> Result<Option<Quote>, EngineError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_quote_by_access_token"])
            .start_timer();

        let quote = sqlx::query_as::<_, Quote>(&format!(
            "SELECT {QUOTE_COLUMNS} FROM quotes WHERE public_access_token = $1"
        ))
        .bind(access_token)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();

        Ok(quote)
    }

    /// Get line items for a quote.
    #[instrument(skip(self), fields(quote_id = %quote_id))]
    pub async fn get_quote_items(&self, quote_id: Uuid) -> Result<Vec<QuoteItem>, EngineError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_quote_items"])
            .start_timer();

        let items = sqlx::query_as::<_, QuoteItem>(
            r#"
            SELECT quote_item_id, quote_id, description, quantity, unit_price,
                tax_rate, sort_order, created_utc
            FROM quote_items
            WHERE quote_id = $1
            ORDER BY sort_order, created_utc
            "#,
        )
        .bind(quote_id)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();

        Ok(items)
    }

    /// Add a line item to a draft quote and recompute its totals.
    #[instrument(skip(self, input), fields(quote_id = %quote_id))]
    pub async fn add_quote_item(
        &self,
        quote_id: Uuid,
        input: &CreateQuoteItem,
    ) -> Result<QuoteItem, EngineError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["add_quote_item"])
            .start_timer();

        input.validate()?;

        let mut tx = self.pool.begin().await?;

        let quote = Self::lock_quote(&mut tx, quote_id)
            .await?
            .ok_or(EngineError::QuoteNotFound)?;
        if quote.status() != QuoteStatus::Draft {
            return Err(EngineError::QuoteNotDraft);
        }

        let item = Self::insert_quote_item(&mut tx, quote_id, input).await?;

        let stored = Self::quote_items(&mut tx, quote_id).await?;
        let totals = compute_totals(&stored, quote.discount);
        Self::update_quote_totals(&mut tx, quote_id, &totals).await?;

        tx.commit().await?;
        timer.observe_duration();

        info!(quote_item_id = %item.quote_item_id, "Line item added");

        Ok(item)
    }

    /// Send a quote: Draft -> Sent, assigning its number exactly once.
    ///
    /// The number's year comes from the issue date fixed here; validity
    /// defaults to issue date + 30 days.
    #[instrument(skip(self, allocator), fields(quote_id = %quote_id))]
    pub async fn send_quote(
        &self,
        quote_id: Uuid,
        allocator: &SequenceAllocator,
        prefix: &str,
        now: DateTime<Utc>,
        validity_days: i64,
    ) -> Result<Quote, EngineError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["send_quote"])
            .start_timer();

        let mut tx = self.pool.begin().await?;

        let quote = Self::lock_quote(&mut tx, quote_id)
            .await?
            .ok_or(EngineError::QuoteNotFound)?;
        quote.status().validate_transition(QuoteStatus::Sent)?;

        let items = Self::quote_items(&mut tx, quote_id).await?;
        if items.is_empty() {
            return Err(EngineError::EmptyQuote);
        }

        let issue_date = now.date_naive();
        let number = allocator
            .next_number(&mut tx, prefix, issue_date.year())
            .await?;
        let valid_until = issue_date + Duration::days(validity_days);
        let totals = compute_totals(&items, quote.discount);

        let quote = sqlx::query_as::<_, Quote>(&format!(
            r#"
            UPDATE quotes
            SET number = $2,
                status = 'sent',
                issue_date = $3,
                valid_until = $4,
                subtotal = $5,
                tax_amount = $6,
                grand_total = $7,
                sent_utc = $8
            WHERE quote_id = $1
            RETURNING {QUOTE_COLUMNS}
            "#
        ))
        .bind(quote_id)
        .bind(&number)
        .bind(issue_date)
        .bind(valid_until)
        .bind(totals.subtotal)
        .bind(totals.tax_amount)
        .bind(totals.grand_total)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        timer.observe_duration();

        info!(quote_id = %quote.quote_id, number = %number, "Quote sent");

        Ok(quote)
    }

    // -------------------------------------------------------------------------
    // Invoice Operations
    // -------------------------------------------------------------------------

    /// Get an invoice by ID.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, EngineError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE invoice_id = $1"
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();

        Ok(invoice)
    }

    /// Get line items for an invoice.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn get_invoice_items(
        &self,
        invoice_id: Uuid,
    ) -> Result<Vec<InvoiceItem>, EngineError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice_items"])
            .start_timer();

        let items = sqlx::query_as::<_, InvoiceItem>(
            r#"
            SELECT invoice_item_id, invoice_id, description, quantity, unit_price,
                tax_rate, sort_order, created_utc
            FROM invoice_items
            WHERE invoice_id = $1
            ORDER BY sort_order, created_utc
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();

        Ok(items)
    }

    // -------------------------------------------------------------------------
    // Row-level building blocks (run inside a caller-owned transaction)
    // -------------------------------------------------------------------------

    /// Fetch a quote taking an exclusive row lock for the transaction's span.
    pub(crate) async fn lock_quote(
        conn: &mut PgConnection,
        quote_id: Uuid,
    ) -> Result<Option<Quote>, EngineError> {
        let quote = sqlx::query_as::<_, Quote>(&format!(
            "SELECT {QUOTE_COLUMNS} FROM quotes WHERE quote_id = $1 FOR UPDATE"
        ))
        .bind(quote_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(quote)
    }

    pub(crate) async fn fetch_quote(
        conn: &mut PgConnection,
        quote_id: Uuid,
    ) -> Result<Option<Quote>, EngineError> {
        let quote = sqlx::query_as::<_, Quote>(&format!(
            "SELECT {QUOTE_COLUMNS} FROM quotes WHERE quote_id = $1"
        ))
        .bind(quote_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(quote)
    }

    pub(crate) async fn quote_items(
        conn: &mut PgConnection,
        quote_id: Uuid,
    ) -> Result<Vec<QuoteItem>, EngineError> {
        let items = sqlx::query_as::<_, QuoteItem>(
            r#"
            SELECT quote_item_id, quote_id, description, quantity, unit_price,
                tax_rate, sort_order, created_utc
            FROM quote_items
            WHERE quote_id = $1
            ORDER BY sort_order, created_utc
            "#,
        )
        .bind(quote_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(items)
    }

    pub(crate) async fn insert_quote_item(
        conn: &mut PgConnection,
        quote_id: Uuid,
        input: &CreateQuoteItem,
    ) -> Result<QuoteItem, EngineError> {
        let item = sqlx::query_as::<_, QuoteItem>(
            r#"
            INSERT INTO quote_items (quote_item_id, quote_id, description, quantity,
                unit_price, tax_rate, sort_order)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING quote_item_id, quote_id, description, quantity, unit_price,
                tax_rate, sort_order, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(quote_id)
        .bind(&input.description)
        .bind(input.quantity)
        .bind(input.unit_price)
        .bind(input.tax_rate)
        .bind(input.sort_order)
        .fetch_one(&mut *conn)
        .await?;
        Ok(item)
    }

    pub(crate) async fn update_quote_totals(
        conn: &mut PgConnection,
        quote_id: Uuid,
        totals: &Totals,
    ) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            UPDATE quotes
            SET subtotal = $2, tax_amount = $3, grand_total = $4
            WHERE quote_id = $1
            "#,
        )
        .bind(quote_id)
        .bind(totals.subtotal)
        .bind(totals.tax_amount)
        .bind(totals.grand_total)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Set a quote's status and the timestamp column that witnesses it.
    pub(crate) async fn update_quote_status(
        conn: &mut PgConnection,
        quote_id: Uuid,
        status: QuoteStatus,
        now: DateTime<Utc>,
    ) -> Result<Quote, EngineError> {
        let quote = sqlx::query_as::<_, Quote>(&format!(
            r#"
            UPDATE quotes
            SET status = $2,
                accepted_utc = CASE WHEN $2 = 'accepted' THEN $3 ELSE accepted_utc END,
                invoiced_utc = CASE WHEN $2 = 'invoiced' THEN $3 ELSE invoiced_utc END
            WHERE quote_id = $1
            RETURNING {QUOTE_COLUMNS}
            "#
        ))
        .bind(quote_id)
        .bind(status.as_str())
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;
        Ok(quote)
    }

    // -------------------------------------------------------------------------
    // Validation Challenge Operations
    // -------------------------------------------------------------------------

    /// Invalidate any active (unconfirmed, unsuperseded) challenges for a
    /// quote. At most one challenge is active per quote at any time.
    pub(crate) async fn supersede_active_challenges(
        conn: &mut PgConnection,
        quote_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, EngineError> {
        let result = sqlx::query(
            r#"
            UPDATE validation_challenges
            SET superseded_utc = $2
            WHERE quote_id = $1 AND confirmed_utc IS NULL AND superseded_utc IS NULL
            "#,
        )
        .bind(quote_id)
        .bind(now)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    pub(crate) async fn insert_challenge(
        conn: &mut PgConnection,
        challenge: &ValidationChallenge,
    ) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO validation_challenges (challenge_id, quote_id, token, code_hash,
                expires_utc, attempt_count, attempt_max, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(challenge.challenge_id)
        .bind(challenge.quote_id)
        .bind(&challenge.token)
        .bind(&challenge.code_hash)
        .bind(challenge.expires_utc)
        .bind(challenge.attempt_count)
        .bind(challenge.attempt_max)
        .bind(challenge.created_utc)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Fetch a challenge by token without locking it. Used to resolve the
    /// token to its quote before any row lock is taken.
    pub(crate) async fn find_challenge_by_token(
        conn: &mut PgConnection,
        token: &str,
    ) -> Result<Option<ValidationChallenge>, EngineError> {
        let challenge = sqlx::query_as::<_, ValidationChallenge>(&format!(
            "SELECT {CHALLENGE_COLUMNS} FROM validation_challenges WHERE token = $1"
        ))
        .bind(token)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(challenge)
    }

    /// Fetch a challenge by token, locking its row for the transaction.
    pub(crate) async fn lock_challenge_by_token(
        conn: &mut PgConnection,
        token: &str,
    ) -> Result<Option<ValidationChallenge>, EngineError> {
        let challenge = sqlx::query_as::<_, ValidationChallenge>(&format!(
            "SELECT {CHALLENGE_COLUMNS} FROM validation_challenges WHERE token = $1 FOR UPDATE"
        ))
        .bind(token)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(challenge)
    }

    pub(crate) async fn record_challenge_attempt(
        conn: &mut PgConnection,
        challenge_id: Uuid,
    ) -> Result<(), EngineError> {
        sqlx::query(
            "UPDATE validation_challenges SET attempt_count = attempt_count + 1 WHERE challenge_id = $1",
        )
        .bind(challenge_id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub(crate) async fn confirm_challenge(
        conn: &mut PgConnection,
        challenge_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        sqlx::query(
            "UPDATE validation_challenges SET confirmed_utc = $2 WHERE challenge_id = $1",
        )
        .bind(challenge_id)
        .bind(now)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Invoice row-level operations
    // -------------------------------------------------------------------------

    pub(crate) async fn find_invoice_by_source(
        conn: &mut PgConnection,
        quote_id: Uuid,
    ) -> Result<Option<Invoice>, EngineError> {
        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE source_quote_id = $1"
        ))
        .bind(quote_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(invoice)
    }

    pub(crate) async fn insert_invoice(
        conn: &mut PgConnection,
        invoice: &Invoice,
    ) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO invoices (invoice_id, number, status, source_quote_id,
                customer_name, customer_email, issue_date, due_date, discount,
                subtotal, tax_amount, grand_total, amount_paid, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(invoice.invoice_id)
        .bind(&invoice.number)
        .bind(&invoice.status)
        .bind(invoice.source_quote_id)
        .bind(&invoice.customer_name)
        .bind(&invoice.customer_email)
        .bind(invoice.issue_date)
        .bind(invoice.due_date)
        .bind(invoice.discount)
        .bind(invoice.subtotal)
        .bind(invoice.tax_amount)
        .bind(invoice.grand_total)
        .bind(invoice.amount_paid)
        .bind(invoice.created_utc)
        .execute(&mut *conn)
        .await
        .map_err(|e| match e {
            // The unique constraint on source_quote_id is the constraint-level
            // backstop against a double conversion racing past the row lock.
            sqlx::Error::Database(ref db_err)
                if db_err.is_unique_violation()
                    && db_err.constraint() == Some("invoices_source_quote_id_key") =>
            {
                EngineError::QuoteAlreadyInvoiced
            }
            other => EngineError::from(other),
        })?;
        Ok(())
    }

    pub(crate) async fn insert_invoice_items(
        conn: &mut PgConnection,
        items: &[InvoiceItem],
    ) -> Result<(), EngineError> {
        for item in items {
            sqlx::query(
                r#"
                INSERT INTO invoice_items (invoice_item_id, invoice_id, description,
                    quantity, unit_price, tax_rate, sort_order, created_utc)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(item.invoice_item_id)
            .bind(item.invoice_id)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.tax_rate)
            .bind(item.sort_order)
            .bind(item.created_utc)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }
}
