//! Provider callbacks
//!
//! Replies are part of the provider contract: a replayed or unmatched
//! withdrawal is still a 200, only the message differs.

use axum::{extract::State, http::StatusCode, Json};
use shared::{Envelope, ErrorCategory};

use crate::{
    domain::{CallbackStatus, DepositCallback, GameCallback, WithdrawalCallback},
    errors::Result,
    extractors::ValidatedJson,
    services::{Callback, ProviderFormat, Reconciliation},
    state::AppState,
};

const APPLIED: &str = "Success";
const NOT_APPLIED: &str = "Not Found/Transaction already processed";

fn settled(result: &Reconciliation) -> Json<Envelope> {
    Json(Envelope::ok(if result.applied { APPLIED } else { NOT_APPLIED }))
}

pub async fn deposit(
    State(state): State<AppState>,
    ValidatedJson(callback): ValidatedJson<DepositCallback>,
) -> Result<(StatusCode, Json<Envelope>)> {
    let result = state.reconciler.apply(Callback::Deposit(callback)).await?;

    match result.status {
        CallbackStatus::Failure => {
            let description = result
                .description
                .unwrap_or_else(|| "Deposit failed".to_string());
            Ok((
                StatusCode::BAD_REQUEST,
                Json(Envelope::from_category(ErrorCategory::Validation, description)),
            ))
        }
        CallbackStatus::Pending => Ok((StatusCode::OK, Json(Envelope::ok("Pending")))),
        CallbackStatus::Success => Ok((StatusCode::OK, settled(&result))),
    }
}

pub async fn withdrawal(
    State(state): State<AppState>,
    ValidatedJson(callback): ValidatedJson<WithdrawalCallback>,
) -> Result<Json<Envelope>> {
    let format = ProviderFormat::for_mobile(
        &callback.reference,
        &state.config.settlement.withdrawal_reference_prefix,
    );
    let result = state
        .reconciler
        .apply(Callback::Withdrawal { format, callback })
        .await?;

    Ok(settled(&result))
}

pub async fn b2b_withdrawal(
    State(state): State<AppState>,
    ValidatedJson(callback): ValidatedJson<WithdrawalCallback>,
) -> Result<Json<Envelope>> {
    let result = state
        .reconciler
        .apply(Callback::Withdrawal {
            format: ProviderFormat::B2b,
            callback,
        })
        .await?;

    Ok(settled(&result))
}

pub async fn game(
    State(state): State<AppState>,
    ValidatedJson(callback): ValidatedJson<GameCallback>,
) -> Result<Json<Envelope>> {
    let result = state.reconciler.apply(Callback::Game(callback)).await?;
    Ok(settled(&result))
}
