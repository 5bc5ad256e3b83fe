use axum::{extract::State, Json};
use chrono::{Duration, Utc};
use shared::{Envelope, DEFAULT_HISTORY_LIMIT};

use crate::{
    domain::{AccountSummary, SelfExclusionRequest, VerifyOtpRequest},
    repository::AccountDeletion,
    errors::{AppError, Rejection, Result},
    extractors::{AuthenticatedMsisdn, ValidatedJson},
    state::AppState,
};

pub async fn summary(
    State(state): State<AppState>,
    AuthenticatedMsisdn(msisdn): AuthenticatedMsisdn,
) -> Result<Json<AccountSummary>> {
    let summary = state
        .validator
        .account_summary(&msisdn, DEFAULT_HISTORY_LIMIT)
        .await?;
    Ok(Json(summary))
}

pub async fn self_exclude(
    State(state): State<AppState>,
    AuthenticatedMsisdn(msisdn): AuthenticatedMsisdn,
    ValidatedJson(req): ValidatedJson<SelfExclusionRequest>,
) -> Result<Json<Envelope>> {
    let requested = Utc::now() + Duration::days(i64::from(req.days));
    let account = state
        .stores
        .accounts
        .extend_self_exclusion(&msisdn, requested)
        .await?
        .ok_or_else(|| AppError::not_found("Account"))?;
    // A longer exclusion already in force wins
    let until = account.self_exclusion_until.unwrap_or(requested);

    tracing::info!(msisdn = %account.msisdn, until = %until, "Self-exclusion set");

    Ok(Json(Envelope::ok(format!(
        "Self-exclusion active until {}",
        until.format("%Y-%m-%d")
    ))))
}

/// Step one of account deletion: text a confirmation code
pub async fn request_deletion(
    State(state): State<AppState>,
    AuthenticatedMsisdn(msisdn): AuthenticatedMsisdn,
) -> Result<Json<Envelope>> {
    let account = state
        .stores
        .accounts
        .find_account(&msisdn)
        .await?
        .ok_or_else(|| AppError::not_found("Account"))?;
    if !account.balance.is_zero() {
        return Err(Rejection::AccountHasBalance.into());
    }
    state.otp.issue(&msisdn).await?;

    Ok(Json(Envelope::ok("Confirmation code sent")))
}

pub async fn confirm_deletion(
    State(state): State<AppState>,
    AuthenticatedMsisdn(msisdn): AuthenticatedMsisdn,
    ValidatedJson(req): ValidatedJson<VerifyOtpRequest>,
) -> Result<Json<Envelope>> {
    state.otp.verify(&msisdn, &req.otp).await?;

    match state.stores.accounts.delete_account(&msisdn).await? {
        AccountDeletion::Deleted => {}
        AccountDeletion::NotFound => return Err(AppError::not_found("Account")),
        AccountDeletion::HasBalance => return Err(Rejection::AccountHasBalance.into()),
        AccountDeletion::WithdrawalPending => return Err(Rejection::WithdrawalPending.into()),
    }

    tracing::info!(msisdn = %msisdn, "Account deleted");
    metrics::counter!("accounts_deleted_total").increment(1);

    Ok(Json(Envelope::ok("Account deleted")))
}
