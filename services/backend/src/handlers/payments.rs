use axum::{extract::State, Json};
use chrono::Utc;
use shared::Envelope;

use crate::{
    domain::{DepositResponse, InitiateDepositRequest, InitiateWithdrawalRequest, WithdrawalResponse},
    errors::Result,
    extractors::{AuthenticatedMsisdn, ValidatedJson},
    state::AppState,
};

pub async fn initiate_deposit(
    State(state): State<AppState>,
    AuthenticatedMsisdn(msisdn): AuthenticatedMsisdn,
    ValidatedJson(req): ValidatedJson<InitiateDepositRequest>,
) -> Result<Json<DepositResponse>> {
    let started = state.payments.initiate_deposit(&msisdn, &req).await?;

    Ok(Json(DepositResponse {
        envelope: Envelope::ok("Deposit initiated, confirm the payment prompt on your phone"),
        free_bet: started.account.available_free_bets(Utc::now()),
        reference: started.deposit.reference,
    }))
}

pub async fn initiate_withdrawal(
    State(state): State<AppState>,
    AuthenticatedMsisdn(msisdn): AuthenticatedMsisdn,
    ValidatedJson(req): ValidatedJson<InitiateWithdrawalRequest>,
) -> Result<Json<WithdrawalResponse>> {
    let started = state.payments.initiate_withdrawal(&msisdn, &req).await?;

    Ok(Json(WithdrawalResponse {
        envelope: Envelope::ok("Withdrawal initiated"),
        reference: started.withdrawal.reference,
    }))
}
