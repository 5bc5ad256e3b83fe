//! Bet execution
//!
//! Preconditions run in a fixed order: stake amount, lucky number, funds.
//! The funds check here is an early exit only; the store transition checks
//! again atomically, which is what actually serializes concurrent bets.

use chrono::Utc;
use shared::{MAX_LUCKY_NUMBER, MIN_LUCKY_NUMBER};
use std::sync::Arc;
use uuid::Uuid;

use super::resolver::GameResolver;
use crate::domain::{Account, BetOutcome, BetRecord, GameConfig, PlaceBetRequest, SpinRequest};
use crate::errors::{AppError, Rejection, Result};
use crate::repository::{AccountStore, Transition, TransitionOutcome};

/// A committed bet and the account state right after it
#[derive(Debug, Clone)]
pub struct BetPlaced {
    pub bet: BetRecord,
    pub account: Account,
}

pub struct BetExecutor {
    accounts: Arc<dyn AccountStore>,
    resolver: Arc<dyn GameResolver>,
}

impl BetExecutor {
    pub fn new(accounts: Arc<dyn AccountStore>, resolver: Arc<dyn GameResolver>) -> Self {
        Self { accounts, resolver }
    }

    pub async fn place_bet(
        &self,
        account: &Account,
        game: &GameConfig,
        request: &PlaceBetRequest,
    ) -> Result<BetPlaced> {
        self.place_bet_as(account, game, request, Uuid::new_v4())
            .await
    }

    /// Place a bet under a caller-chosen id. A second bet with the same id is
    /// refused by the store, so replays of one request debit at most once.
    pub async fn place_bet_as(
        &self,
        account: &Account,
        game: &GameConfig,
        request: &PlaceBetRequest,
        bet_id: Uuid,
    ) -> Result<BetPlaced> {
        if request.amount != game.bet_amount {
            return Err(Rejection::InvalidBetAmount.into());
        }
        let choice = lucky_number(request.choice)?;

        let now = Utc::now();
        if request.use_free_bet {
            if account.available_free_bets(now) == 0 {
                return Err(Rejection::NoFreeBet.into());
            }
        } else if account.balance < request.amount {
            return Err(AppError::InsufficientBalance);
        }

        let resolution = self.resolver.resolve(game, choice, request.amount)?;

        let bet = BetRecord {
            bet_id,
            msisdn: account.msisdn.clone(),
            category: game.category,
            game_cat_id: game.game_cat_id.clone(),
            amount: request.amount,
            choice: Some(choice),
            channel: request.channel.clone(),
            outcome: resolution.outcome,
            payout: resolution.payout,
            drawn_number: Some(resolution.drawn_number),
            free_bet: request.use_free_bet,
            created_at: now,
            settled_at: Some(now),
        };

        self.commit(bet).await
    }

    /// Debit and record a pending spin; the outcome arrives by callback
    pub async fn place_spin(
        &self,
        account: &Account,
        game: &GameConfig,
        request: &SpinRequest,
    ) -> Result<BetPlaced> {
        if request.amount != game.bet_amount {
            return Err(Rejection::InvalidBetAmount.into());
        }
        if account.balance < request.amount {
            return Err(AppError::InsufficientBalance);
        }

        let bet = BetRecord {
            bet_id: Uuid::new_v4(),
            msisdn: account.msisdn.clone(),
            category: game.category,
            game_cat_id: game.game_cat_id.clone(),
            amount: request.amount,
            choice: None,
            channel: request.channel.clone(),
            outcome: BetOutcome::Pending,
            payout: shared::Money::ZERO,
            drawn_number: None,
            free_bet: false,
            created_at: Utc::now(),
            settled_at: None,
        };

        self.commit(bet).await
    }

    async fn commit(&self, bet: BetRecord) -> Result<BetPlaced> {
        match self
            .accounts
            .apply(Transition::PlaceBet { bet: bet.clone() })
            .await?
        {
            TransitionOutcome::Applied(account) => Ok(BetPlaced { bet, account }),
            TransitionOutcome::InsufficientBalance { available } => {
                tracing::debug!(
                    msisdn = %bet.msisdn,
                    available = %available,
                    stake = %bet.amount,
                    "Bet lost the race for funds"
                );
                Err(AppError::InsufficientBalance)
            }
            TransitionOutcome::NoFreeBet => Err(Rejection::NoFreeBet.into()),
            TransitionOutcome::AlreadyRecorded => Err(Rejection::BetAlreadyPlaced.into()),
            TransitionOutcome::NotFound => Err(AppError::not_found("Account")),
        }
    }
}

fn lucky_number(choice: i64) -> Result<u8> {
    u8::try_from(choice)
        .ok()
        .filter(|n| (MIN_LUCKY_NUMBER..=MAX_LUCKY_NUMBER).contains(n))
        .ok_or(AppError::Rejected(Rejection::InvalidLuckyNumber))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::GameCategory;
    use crate::repository::{LedgerWriter, MemoryStore};
    use crate::services::resolver::FixedDrawResolver;
    use shared::{Money, Msisdn};

    fn game() -> GameConfig {
        GameConfig {
            category: GameCategory::LuckyNumber,
            game_cat_id: "1".to_string(),
            name: "Lucky 7".to_string(),
            bet_amount: Money::from_major(50).unwrap(),
            payout_multiplier: 5,
            rtp_limit: 90,
            active: true,
        }
    }

    fn request(amount: u64, choice: i64) -> PlaceBetRequest {
        PlaceBetRequest {
            amount: Money::from_major(amount).unwrap(),
            choice,
            game_cat_id: "1".to_string(),
            channel: "ussd".to_string(),
            ussd: true,
            use_free_bet: false,
        }
    }

    async fn setup(balance: u64, draw: u8) -> (Arc<MemoryStore>, BetExecutor, Account) {
        let store = Arc::new(MemoryStore::new());
        let msisdn = Msisdn::parse("254700000001").unwrap();
        store.get_or_create_account(&msisdn).await.unwrap();

        if balance > 0 {
            let deposit = crate::domain::DepositRequest {
                reference: "DP_seed".to_string(),
                msisdn: msisdn.clone(),
                amount: Money::from_major(balance).unwrap(),
                channel: "test".to_string(),
                status: crate::domain::RequestStatus::Pending,
                bet_intent: None,
                transaction_id: None,
                description: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            store.record_deposit(&deposit).await.unwrap();
            store
                .apply(Transition::CreditDeposit {
                    reference: "DP_seed".to_string(),
                    transaction_id: None,
                    at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let account = store.find_account(&msisdn).await.unwrap().unwrap();
        let executor = BetExecutor::new(store.clone(), Arc::new(FixedDrawResolver(draw)));
        (store, executor, account)
    }

    #[tokio::test]
    async fn test_losing_bet_debits_stake() {
        let (store, executor, account) = setup(100, 2).await;

        let placed = executor.place_bet(&account, &game(), &request(50, 4)).await.unwrap();

        assert_eq!(placed.bet.outcome, BetOutcome::Lost);
        assert_eq!(placed.account.balance, Money::from_major(50).unwrap());
        assert_eq!(store.bets_for(&account.msisdn, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_winning_bet_credits_payout() {
        let (_, executor, account) = setup(100, 4).await;

        let placed = executor.place_bet(&account, &game(), &request(50, 4)).await.unwrap();

        assert_eq!(placed.bet.outcome, BetOutcome::Won);
        assert_eq!(placed.account.balance, Money::from_major(300).unwrap());
    }

    #[tokio::test]
    async fn test_wrong_amount_checked_first() {
        let (store, executor, account) = setup(0, 4).await;

        // Bad amount, bad choice and no funds: amount wins
        let err = executor
            .place_bet(&account, &game(), &request(20, 9))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Rejected(Rejection::InvalidBetAmount)));
        assert!(store.bets_for(&account.msisdn, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_choice_out_of_range() {
        let (_, executor, account) = setup(100, 4).await;

        for choice in [0, 8, -1, 300] {
            let err = executor
                .place_bet(&account, &game(), &request(50, choice))
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::Rejected(Rejection::InvalidLuckyNumber)));
        }
    }

    #[tokio::test]
    async fn test_insufficient_balance_leaves_state_alone() {
        let (store, executor, account) = setup(40, 4).await;

        let err = executor
            .place_bet(&account, &game(), &request(50, 4))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::InsufficientBalance));
        let after = store.find_account(&account.msisdn).await.unwrap().unwrap();
        assert_eq!(after.balance, Money::from_major(40).unwrap());
        assert!(store.bets_for(&account.msisdn, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_snapshot_still_refused_by_store() {
        let (_, executor, account) = setup(50, 2).await;

        executor.place_bet(&account, &game(), &request(50, 4)).await.unwrap();
        // Same pre-bet snapshot, funds already spent
        let err = executor
            .place_bet(&account, &game(), &request(50, 4))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::InsufficientBalance));
    }

    #[tokio::test]
    async fn test_replayed_bet_id_debits_once() {
        let (store, executor, account) = setup(150, 2).await;
        let bet_id = Uuid::new_v4();

        executor
            .place_bet_as(&account, &game(), &request(50, 4), bet_id)
            .await
            .unwrap();
        let err = executor
            .place_bet_as(&account, &game(), &request(50, 4), bet_id)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Rejected(Rejection::BetAlreadyPlaced)));
        let after = store.find_account(&account.msisdn).await.unwrap().unwrap();
        assert_eq!(after.balance, Money::from_major(100).unwrap());
        assert_eq!(store.bets_for(&account.msisdn, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_spin_is_pending_until_callback() {
        let (store, executor, account) = setup(100, 4).await;
        let mut spin_game = game();
        spin_game.category = GameCategory::Spin;

        let placed = executor
            .place_spin(
                &account,
                &spin_game,
                &SpinRequest {
                    amount: Money::from_major(50).unwrap(),
                    game_cat_id: "1".to_string(),
                    channel: "app".to_string(),
                    mode: "classic".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(placed.bet.outcome, BetOutcome::Pending);
        assert!(placed.bet.choice.is_none());
        assert_eq!(placed.account.balance, Money::from_major(50).unwrap());
        let stored = store.find_bet(placed.bet.bet_id).await.unwrap().unwrap();
        assert!(stored.settled_at.is_none());
    }
}
