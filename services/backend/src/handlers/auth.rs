use axum::{extract::State, Json};
use shared::{Envelope, Msisdn};
use std::time::Duration;

use crate::{
    domain::{OtpRequest, TokenResponse, VerifyOtpRequest},
    errors::{AppError, Result},
    extractors::ValidatedJson,
    state::AppState,
};

pub async fn request_otp(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<OtpRequest>,
) -> Result<Json<Envelope>> {
    let msisdn = Msisdn::parse(&req.msisdn)?;
    state.otp.issue(&msisdn).await?;

    Ok(Json(Envelope::ok("Verification code sent")))
}

/// Exchange a verification code for a session token
pub async fn verify_otp(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<VerifyOtpRequest>,
) -> Result<Json<TokenResponse>> {
    let raw = req
        .msisdn
        .as_deref()
        .ok_or_else(|| AppError::invalid_input("Missing required field: msisdn"))?;
    let msisdn = Msisdn::parse(raw)?;

    let remaining = state.otp.verify(&msisdn, &req.otp).await?;
    // Sessions can be created for new numbers; the account appears on first bet or deposit
    let ttl = Duration::from_secs(remaining.unsigned_abs());
    let token = state.stores.sessions.create_session(&msisdn, ttl).await?;

    tracing::info!(msisdn = %msisdn, expire_in = remaining, "Session issued");

    Ok(Json(TokenResponse {
        envelope: Envelope::ok("Verified"),
        token,
        expire_in: remaining,
    }))
}
