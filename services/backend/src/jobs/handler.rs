use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use super::{Job, JobHandler};
use crate::domain::{BetOutcome, DepositRequest, FailedDepositNotice, PlaceBetRequest};
use crate::errors::{AppError, Rejection, Result};
use crate::gateway::{GameProvider, SmsSender};
use crate::repository::LedgerWriter;
use crate::services::BetService;

/// Runs the settlement side effects
pub struct EngineJobs {
    bets: BetService,
    ledger: Arc<dyn LedgerWriter>,
    sms: Arc<dyn SmsSender>,
    games: Arc<dyn GameProvider>,
}

impl EngineJobs {
    pub fn new(
        bets: BetService,
        ledger: Arc<dyn LedgerWriter>,
        sms: Arc<dyn SmsSender>,
        games: Arc<dyn GameProvider>,
    ) -> Self {
        Self {
            bets,
            ledger,
            sms,
            games,
        }
    }

    async fn play_deposit_intent(&self, deposit: &DepositRequest) -> Result<()> {
        let Some(intent) = &deposit.bet_intent else {
            return Ok(());
        };

        let request = PlaceBetRequest {
            amount: deposit.amount,
            choice: intent.choice,
            game_cat_id: intent.game_cat_id.clone(),
            channel: intent.channel.clone(),
            ussd: true,
            use_free_bet: false,
        };

        let bet_id = intent_bet_id(&deposit.reference);
        let message = match self.bets.place_bet_as(&deposit.msisdn, &request, bet_id).await {
            Ok(placed) => {
                let message = match placed.bet.outcome {
                    BetOutcome::Won => format!(
                        "Congratulations! Lucky number {} won you {}. Balance: {}",
                        placed.bet.drawn_number.unwrap_or_default(),
                        placed.bet.payout,
                        placed.account.balance
                    ),
                    _ => format!(
                        "The lucky number was {}. Better luck next time! Balance: {}",
                        placed.bet.drawn_number.unwrap_or_default(),
                        placed.account.balance
                    ),
                };
                // The bet is committed; a failed text must not re-run the job
                if let Err(err) = self.notify(&deposit.msisdn, &message).await {
                    tracing::warn!(
                        reference = %deposit.reference,
                        bet_id = %bet_id,
                        error = %err,
                        "Bet result SMS not delivered"
                    );
                    metrics::counter!("sms_undelivered_total", "kind" => "bet_result").increment(1);
                }
                return Ok(());
            }
            Err(AppError::Rejected(Rejection::BetAlreadyPlaced)) => {
                tracing::info!(
                    reference = %deposit.reference,
                    bet_id = %bet_id,
                    "Deposit bet already placed"
                );
                return Ok(());
            }
            Err(err) if err.is_retryable() => return Err(err),
            Err(err) => {
                // Rule refusals will not change on retry; tell the player instead
                tracing::warn!(
                    reference = %deposit.reference,
                    msisdn = %deposit.msisdn,
                    error = %err,
                    "Deposit bet refused"
                );
                format!(
                    "Your deposit of {} was received but the bet could not be placed: {}",
                    deposit.amount,
                    refusal_text(&err)
                )
            }
        };

        self.notify(&deposit.msisdn, &message).await
    }

    async fn notify_failed_deposit(&self, notice: &FailedDepositNotice) -> Result<()> {
        // Keyed by reference, so a retried job rewrites the same record
        self.ledger.record_failed_deposit(notice).await?;

        let message = format!(
            "Your deposit of {} was not completed. Dial again to retry.",
            notice.amount
        );
        self.notify(&notice.msisdn, &message).await
    }

    async fn notify(&self, msisdn: &shared::Msisdn, message: &str) -> Result<()> {
        self.sms
            .send_sms(msisdn, message)
            .await
            .map_err(|e| AppError::Internal(e.context("sending SMS")))
    }
}

/// Bet id for the intent carried by a deposit. Derived from the reference so
/// every run of the job for one deposit targets the same bet.
fn intent_bet_id(reference: &str) -> Uuid {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("deposit-intent:{}", reference).as_bytes(),
    )
}

fn refusal_text(err: &AppError) -> String {
    match err {
        AppError::NotFound(what) => format!("{} not found", what),
        other => other.to_string(),
    }
}

#[async_trait]
impl JobHandler for EngineJobs {
    async fn handle(&self, job: &Job) -> Result<()> {
        match job {
            Job::PlayDepositIntent { deposit } => self.play_deposit_intent(deposit).await,
            Job::NotifyFailedDeposit { notice } => self.notify_failed_deposit(notice).await,
            Job::DispatchSpin { bet, mode } => self
                .games
                .start_spin(bet, mode)
                .await
                .map_err(|e| AppError::Internal(e.context("starting spin"))),
        }
    }
}
