//! Outbound money movement: deposit collection and withdrawal disbursement
//!
//! Both only start the flow. The balance changes when the provider's
//! callback is reconciled, except for withdrawals, where the amount is held
//! up front so it cannot be bet away while the disbursement is in flight.
//!
//! A gateway refusal rolls the request back at once. A call whose outcome is
//! unknown leaves the request pending for the provider's callback to settle.

use chrono::Utc;
use shared::{Msisdn, DEPOSIT_REFERENCE_PREFIX, MAX_LUCKY_NUMBER, MIN_LUCKY_NUMBER};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{
    Account, BetIntent, DepositRequest, GameCategory, GameKey, InitiateDepositRequest,
    InitiateWithdrawalRequest, RequestStatus, WithdrawalKind, WithdrawalRequest,
};
use crate::errors::{AppError, Rejection, Result};
use crate::gateway::{GatewayError, PaymentGateway};
use crate::repository::{AccountStore, GameCatalog, LedgerWriter, Transition, TransitionOutcome};

const B2B_REFERENCE_PREFIX: &str = "B2B_";

#[derive(Debug, Clone)]
pub struct DepositStarted {
    pub deposit: DepositRequest,
    pub account: Account,
}

#[derive(Debug, Clone)]
pub struct WithdrawalStarted {
    pub withdrawal: WithdrawalRequest,
    pub account: Account,
}

#[derive(Clone)]
pub struct PaymentService {
    accounts: Arc<dyn AccountStore>,
    games: Arc<dyn GameCatalog>,
    ledger: Arc<dyn LedgerWriter>,
    gateway: Arc<dyn PaymentGateway>,
    withdrawal_prefix: String,
}

impl PaymentService {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        games: Arc<dyn GameCatalog>,
        ledger: Arc<dyn LedgerWriter>,
        gateway: Arc<dyn PaymentGateway>,
        withdrawal_prefix: impl Into<String>,
    ) -> Self {
        Self {
            accounts,
            games,
            ledger,
            gateway,
            withdrawal_prefix: withdrawal_prefix.into(),
        }
    }

    pub async fn initiate_deposit(
        &self,
        msisdn: &Msisdn,
        request: &InitiateDepositRequest,
    ) -> Result<DepositStarted> {
        if request.amount.is_zero() {
            return Err(AppError::invalid_input("Deposit amount must be positive"));
        }
        let bet_intent = self.bet_intent(request).await?;
        let account = self.accounts.get_or_create_account(msisdn).await?;

        let now = Utc::now();
        let deposit = DepositRequest {
            reference: format!("{}{}", DEPOSIT_REFERENCE_PREFIX, Uuid::new_v4().simple()),
            msisdn: msisdn.clone(),
            amount: request.amount,
            channel: request.channel.clone(),
            status: RequestStatus::Pending,
            bet_intent,
            transaction_id: None,
            description: None,
            created_at: now,
            updated_at: now,
        };
        self.ledger.record_deposit(&deposit).await?;

        match self.gateway.request_deposit(&deposit).await {
            Ok(()) => {}
            Err(GatewayError::Declined(reason)) => {
                tracing::warn!(reference = %deposit.reference, msisdn = %msisdn, reason = %reason, "Deposit collection declined");
                self.accounts
                    .apply(Transition::FailDeposit {
                        reference: deposit.reference.clone(),
                        description: Some(format!("Collection declined: {}", reason)),
                        at: Utc::now(),
                    })
                    .await?;
                metrics::counter!("gateway_declined_total", "operation" => "deposit").increment(1);
                return Err(Rejection::PaymentDeclined.into());
            }
            Err(GatewayError::Unknown(e)) => {
                tracing::warn!(reference = %deposit.reference, msisdn = %msisdn, error = %e, "Deposit collection outcome unknown, awaiting callback");
                metrics::counter!("gateway_outcome_unknown_total", "operation" => "deposit").increment(1);
            }
        }

        tracing::info!(
            reference = %deposit.reference,
            msisdn = %msisdn,
            amount = %deposit.amount,
            with_bet = deposit.bet_intent.is_some(),
            "Deposit initiated"
        );
        metrics::counter!("deposits_initiated_total").increment(1);

        Ok(DepositStarted { deposit, account })
    }

    pub async fn initiate_withdrawal(
        &self,
        msisdn: &Msisdn,
        request: &InitiateWithdrawalRequest,
    ) -> Result<WithdrawalStarted> {
        if request.amount.is_zero() {
            return Err(AppError::invalid_input("Withdrawal amount must be positive"));
        }
        if self.accounts.find_account(msisdn).await?.is_none() {
            return Err(AppError::not_found("Account"));
        }

        let (kind, prefix) = if request.b2b {
            (WithdrawalKind::B2b, B2B_REFERENCE_PREFIX)
        } else {
            (WithdrawalKind::Mobile, self.withdrawal_prefix.as_str())
        };
        let now = Utc::now();
        let mut withdrawal = WithdrawalRequest {
            reference: format!("{}{}", prefix, Uuid::new_v4().simple()),
            kind,
            msisdn: msisdn.clone(),
            amount: request.amount,
            channel: request.channel.clone(),
            transaction_id: None,
            status: RequestStatus::Pending,
            description: None,
            created_at: now,
            updated_at: now,
        };

        let account = match self
            .accounts
            .apply(Transition::HoldWithdrawal {
                withdrawal: withdrawal.clone(),
            })
            .await?
        {
            TransitionOutcome::Applied(account) => account,
            TransitionOutcome::InsufficientBalance { .. } => {
                return Err(AppError::InsufficientBalance)
            }
            TransitionOutcome::NoFreeBet
            | TransitionOutcome::AlreadyRecorded
            | TransitionOutcome::NotFound => {
                return Err(AppError::not_found("Account"))
            }
        };

        match self.gateway.request_withdrawal(&withdrawal).await {
            Ok(Some(transaction_id)) => {
                self.ledger
                    .attach_withdrawal_transaction(kind, &withdrawal.reference, &transaction_id)
                    .await?;
                withdrawal.transaction_id = Some(transaction_id);
            }
            Ok(None) => {}
            Err(GatewayError::Declined(reason)) => {
                tracing::warn!(reference = %withdrawal.reference, msisdn = %msisdn, reason = %reason, "Disbursement declined, releasing hold");
                self.accounts
                    .apply(Transition::ResolveWithdrawal {
                        kind,
                        reference: withdrawal.reference.clone(),
                        transaction_id: None,
                        succeeded: false,
                        description: Some(format!("Disbursement declined: {}", reason)),
                        at: Utc::now(),
                    })
                    .await?;
                metrics::counter!("gateway_declined_total", "operation" => "withdrawal").increment(1);
                return Err(Rejection::PaymentDeclined.into());
            }
            Err(GatewayError::Unknown(e)) => {
                // Funds may already be on their way; the hold stays until the callback
                tracing::warn!(reference = %withdrawal.reference, msisdn = %msisdn, error = %e, "Disbursement outcome unknown, keeping hold");
                metrics::counter!("gateway_outcome_unknown_total", "operation" => "withdrawal").increment(1);
            }
        }

        tracing::info!(
            reference = %withdrawal.reference,
            msisdn = %msisdn,
            amount = %withdrawal.amount,
            kind = kind.as_str(),
            "Withdrawal initiated"
        );
        metrics::counter!("withdrawals_initiated_total", "kind" => kind.as_str()).increment(1);

        Ok(WithdrawalStarted {
            withdrawal,
            account,
        })
    }

    /// A deposit may carry a bet to play on arrival; check it now, not later
    async fn bet_intent(&self, request: &InitiateDepositRequest) -> Result<Option<BetIntent>> {
        let Some(game_cat_id) = request.game_cat_id.clone() else {
            return Ok(None);
        };
        let choice = request
            .choice
            .filter(|choice| (i64::from(MIN_LUCKY_NUMBER)..=i64::from(MAX_LUCKY_NUMBER)).contains(choice))
            .ok_or(Rejection::InvalidLuckyNumber)?;

        let key = GameKey::new(GameCategory::LuckyNumber, game_cat_id.clone());
        let game = self
            .games
            .find_game(&key)
            .await?
            .filter(|game| game.active)
            .ok_or_else(|| AppError::not_found(format!("Game {}", key)))?;
        if game.bet_amount != request.amount {
            return Err(Rejection::InvalidBetAmount.into());
        }

        Ok(Some(BetIntent {
            game_cat_id,
            choice,
            channel: request.channel.clone(),
        }))
    }
}
