//! Validation challenge handlers.

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::handlers::quote::QuoteResponse;
use crate::services::metrics::QUOTES_TOTAL;
use crate::services::VerifyOutcome;
use crate::startup::AppState;
use service_core::error::AppError;

#[derive(Debug, Serialize)]
pub struct IssueChallengeResponse {
    pub token: String,
    pub expires_utc: DateTime<Utc>,
    pub attempt_max: i32,
}

#[derive(Debug, Deserialize)]
pub struct VerifyChallengeRequest {
    pub token: String,
    pub code: String,
}

/// Verification result. A wrong code is a 200 with `verified: false`; only
/// expired/exhausted/unknown challenges are errors.
#[derive(Debug, Serialize)]
pub struct VerifyChallengeResponse {
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts_remaining: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote: Option<QuoteResponse>,
}

/// Issue a validation challenge for a sent quote - implementation.
///
/// The code leaves through the dispatcher only; the response carries just the
/// token and expiry.
#[tracing::instrument(skip(state), fields(quote_id = %quote_id))]
pub async fn issue_challenge_impl(
    state: &AppState,
    quote_id: Uuid,
) -> Result<IssueChallengeResponse, AppError> {
    let issued = state.challenges.issue(quote_id).await?;

    let quote = state
        .db
        .get_quote(quote_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("quote not found")))?;
    let number = quote.number.clone().unwrap_or_default();

    // The challenge is already committed; a delivery failure must not undo
    // it. The caller can re-issue to trigger a fresh send.
    if let Err(e) = state
        .dispatcher
        .send_validation_code(&quote.customer_email, &number, &issued.code)
        .await
    {
        tracing::error!(quote_id = %quote_id, error = %e, "Validation code delivery failed");
    }

    Ok(IssueChallengeResponse {
        token: issued.challenge.token,
        expires_utc: issued.challenge.expires_utc,
        attempt_max: issued.challenge.attempt_max,
    })
}

/// Issue a validation challenge for a sent quote.
///
/// POST /quotes/{id}/challenge
pub async fn issue_challenge(
    State(state): State<AppState>,
    Path(quote_id): Path<Uuid>,
) -> Result<(StatusCode, Json<IssueChallengeResponse>), AppError> {
    let response = issue_challenge_impl(&state, quote_id).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Verify a challenge code - implementation.
#[tracing::instrument(skip(state, req))]
pub async fn verify_challenge_impl(
    state: &AppState,
    req: VerifyChallengeRequest,
) -> Result<VerifyChallengeResponse, AppError> {
    match state.challenges.verify(&req.token, &req.code).await? {
        VerifyOutcome::Confirmed(quote) => {
            QUOTES_TOTAL.with_label_values(&["accepted"]).inc();
            let items = state.db.get_quote_items(quote.quote_id).await?;
            Ok(VerifyChallengeResponse {
                verified: true,
                attempts_remaining: None,
                quote: Some(QuoteResponse::from_parts(quote, items)),
            })
        }
        VerifyOutcome::CodeMismatch { attempts_remaining } => Ok(VerifyChallengeResponse {
            verified: false,
            attempts_remaining: Some(attempts_remaining),
            quote: None,
        }),
    }
}

/// Verify a challenge code.
///
/// POST /challenges/verify
pub async fn verify_challenge(
    State(state): State<AppState>,
    Json(req): Json<VerifyChallengeRequest>,
) -> Result<Json<VerifyChallengeResponse>, AppError> {
    let response = verify_challenge_impl(&state, req).await?;
    Ok(Json(response))
}
