use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use shared::{Envelope, DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT};
use tracing::Instrument;

use crate::{
    domain::{
        BetHistoryResponse, BetOutcome, GameResults, PlaceBetRequest, PlaceBetResponse,
        SpinRequest, SpinResponse,
    },
    errors::{AppError, Result},
    extractors::{AuthenticatedMsisdn, ValidatedJson},
    jobs::Job,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct ListBetsQuery {
    pub limit: Option<usize>,
}

pub async fn place_bet(
    State(state): State<AppState>,
    AuthenticatedMsisdn(msisdn): AuthenticatedMsisdn,
    ValidatedJson(req): ValidatedJson<PlaceBetRequest>,
) -> Result<Json<PlaceBetResponse>> {
    let span = tracing::info_span!(
        "place_bet",
        msisdn = %msisdn,
        game_cat_id = %req.game_cat_id,
        amount = %req.amount,
        choice = req.choice,
        ussd = req.ussd
    );

    let placed = state.bets.place_bet(&msisdn, &req).instrument(span).await?;
    let bet = placed.bet;

    let message = match bet.outcome {
        BetOutcome::Won => format!("Congratulations! You won {}", bet.payout),
        _ => "Better luck next time".to_string(),
    };

    Ok(Json(PlaceBetResponse {
        envelope: Envelope::ok(message),
        free_bet: placed.account.available_free_bets(Utc::now()),
        game_results: GameResults {
            bet_id: bet.bet_id,
            outcome: bet.outcome,
            drawn_number: bet.drawn_number,
            payout: bet.payout,
            balance: placed.account.balance,
        },
    }))
}

pub async fn place_spin(
    State(state): State<AppState>,
    AuthenticatedMsisdn(msisdn): AuthenticatedMsisdn,
    ValidatedJson(req): ValidatedJson<SpinRequest>,
) -> Result<Json<SpinResponse>> {
    let span = tracing::info_span!(
        "place_spin",
        msisdn = %msisdn,
        game_cat_id = %req.game_cat_id,
        amount = %req.amount,
        mode = %req.mode
    );

    let placed = state.bets.place_spin(&msisdn, &req).instrument(span).await?;
    let bet_id = placed.bet.bet_id;

    if let Err(e) = state.jobs.enqueue(Job::DispatchSpin {
        bet: placed.bet,
        mode: req.mode,
    }) {
        // The stake is held on a pending bet; only a game callback releases it
        tracing::error!(bet_id = %bet_id, msisdn = %msisdn, error = %e, "Spin debited but not dispatched");
        return Err(AppError::Internal(anyhow::anyhow!("spin dispatch failed: {}", e)));
    }

    Ok(Json(SpinResponse {
        envelope: Envelope::ok("Spin accepted"),
        reference: bet_id,
    }))
}

pub async fn list_bets(
    State(state): State<AppState>,
    AuthenticatedMsisdn(msisdn): AuthenticatedMsisdn,
    Query(query): Query<ListBetsQuery>,
) -> Result<Json<BetHistoryResponse>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    let bets = state.stores.ledger.bets_for(&msisdn, limit).await?;

    tracing::debug!(msisdn = %msisdn, count = bets.len(), "Listed bets");

    Ok(Json(BetHistoryResponse {
        envelope: Envelope::ok("Success"),
        bets,
    }))
}
