//! Bet entry point used by the HTTP handlers and the deposit-intent job

use chrono::Utc;
use shared::Msisdn;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::executor::{BetExecutor, BetPlaced};
use super::validator::{ConcurrentValidator, Validated};
use crate::domain::{AccountStatus, GameCategory, GameKey, PlaceBetRequest, SpinRequest};
use crate::errors::{Rejection, Result};

#[derive(Clone)]
pub struct BetService {
    validator: ConcurrentValidator,
    executor: Arc<BetExecutor>,
    deadline: Duration,
}

impl BetService {
    pub fn new(validator: ConcurrentValidator, executor: Arc<BetExecutor>, deadline: Duration) -> Self {
        Self {
            validator,
            executor,
            deadline,
        }
    }

    pub async fn place_bet(&self, msisdn: &Msisdn, request: &PlaceBetRequest) -> Result<BetPlaced> {
        self.place_bet_as(msisdn, request, Uuid::new_v4()).await
    }

    /// Same as [`Self::place_bet`] with a fixed bet id, for callers that may
    /// run the same request more than once
    pub async fn place_bet_as(
        &self,
        msisdn: &Msisdn,
        request: &PlaceBetRequest,
        bet_id: Uuid,
    ) -> Result<BetPlaced> {
        let key = GameKey::new(GameCategory::LuckyNumber, request.game_cat_id.clone());
        let validated = self.admit(&key, msisdn).await?;

        let placed = self
            .executor
            .place_bet_as(&validated.account, &validated.game, request, bet_id)
            .await?;

        tracing::info!(
            msisdn = %msisdn,
            bet_id = %placed.bet.bet_id,
            game = %key,
            outcome = ?placed.bet.outcome,
            free_bet = placed.bet.free_bet,
            "Bet placed"
        );
        metrics::counter!("bets_placed_total", "category" => key.category.as_str()).increment(1);

        Ok(placed)
    }

    pub async fn place_spin(&self, msisdn: &Msisdn, request: &SpinRequest) -> Result<BetPlaced> {
        let key = GameKey::new(GameCategory::Spin, request.game_cat_id.clone());
        let validated = self.admit(&key, msisdn).await?;

        let placed = self
            .executor
            .place_spin(&validated.account, &validated.game, request)
            .await?;

        tracing::info!(msisdn = %msisdn, bet_id = %placed.bet.bet_id, game = %key, "Spin accepted");
        metrics::counter!("bets_placed_total", "category" => key.category.as_str()).increment(1);

        Ok(placed)
    }

    /// Validation under the deadline, then the account gate
    async fn admit(&self, key: &GameKey, msisdn: &Msisdn) -> Result<Validated> {
        let validated = self
            .validator
            .validate_within(key, msisdn, self.deadline)
            .await?;

        let account = &validated.account;
        if account.status == AccountStatus::Inactive {
            return Err(Rejection::AccountInactive.into());
        }
        if let Some(until) = account
            .self_exclusion_until
            .filter(|_| account.is_self_excluded(Utc::now()))
        {
            return Err(Rejection::SelfExcluded(until).into());
        }

        Ok(validated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BetOutcome, GameConfig};
    use crate::errors::AppError;
    use crate::repository::Stores;
    use crate::services::resolver::FixedDrawResolver;
    use shared::Money;

    fn msisdn() -> Msisdn {
        Msisdn::parse("254700000001").unwrap()
    }

    async fn service(stores: &Stores) -> BetService {
        stores
            .games
            .upsert_game(&GameConfig {
                category: GameCategory::LuckyNumber,
                game_cat_id: "1".to_string(),
                name: "Lucky 7".to_string(),
                bet_amount: Money::from_major(50).unwrap(),
                payout_multiplier: 5,
                rtp_limit: 90,
                active: true,
            })
            .await
            .unwrap();

        BetService::new(
            ConcurrentValidator::new(stores),
            Arc::new(BetExecutor::new(stores.accounts.clone(), Arc::new(FixedDrawResolver(3)))),
            Duration::from_secs(1),
        )
    }

    fn free_bet_request() -> PlaceBetRequest {
        PlaceBetRequest {
            amount: Money::from_major(50).unwrap(),
            choice: 4,
            game_cat_id: "1".to_string(),
            channel: "ussd".to_string(),
            ussd: true,
            use_free_bet: true,
        }
    }

    #[tokio::test]
    async fn test_self_excluded_account_is_refused() {
        let stores = Stores::in_memory();
        let bets = service(&stores).await;
        stores.accounts.get_or_create_account(&msisdn()).await.unwrap();
        stores
            .accounts
            .extend_self_exclusion(&msisdn(), Utc::now() + chrono::Duration::days(30))
            .await
            .unwrap();

        let err = bets.place_bet(&msisdn(), &free_bet_request()).await.unwrap_err();

        assert!(matches!(err, AppError::Rejected(Rejection::SelfExcluded(_))));
    }

    #[tokio::test]
    async fn test_free_bet_placed_through_service() {
        let stores = Stores::in_memory();
        let bets = service(&stores).await;
        stores.accounts.get_or_create_account(&msisdn()).await.unwrap();
        stores
            .accounts
            .grant_free_bets(&msisdn(), 1, Utc::now() + chrono::Duration::days(1))
            .await
            .unwrap();

        let placed = bets.place_bet(&msisdn(), &free_bet_request()).await.unwrap();
        assert_eq!(placed.bet.outcome, BetOutcome::Lost);
        assert!(placed.bet.free_bet);
        assert_eq!(placed.account.free_bet_count, 0);

        let err = bets.place_bet(&msisdn(), &free_bet_request()).await.unwrap_err();
        assert!(matches!(err, AppError::Rejected(Rejection::NoFreeBet)));
    }

    #[tokio::test]
    async fn test_unknown_game_is_not_found() {
        let stores = Stores::in_memory();
        let bets = service(&stores).await;
        let mut request = free_bet_request();
        request.game_cat_id = "99".to_string();

        let err = bets.place_bet(&msisdn(), &request).await.unwrap_err();

        assert!(matches!(err, AppError::NotFound(_)));
    }
}
