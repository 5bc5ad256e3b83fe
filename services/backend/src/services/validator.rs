//! Concurrent pre-bet reads
//!
//! The store warm-up, the game lookup and the account get-or-create are
//! independent, so each runs as its own task. The first failure is returned
//! immediately; the remaining tasks are detached and allowed to finish, since
//! dropping a `JoinHandle` does not cancel the task.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::domain::{Account, AccountSummary, BetRecord, GameConfig, GameKey};
use crate::errors::{AppError, Result};
use crate::repository::{AccountStore, GameCatalog, HealthProbe, LedgerWriter, Stores};
use shared::Msisdn;

#[derive(Debug, Clone)]
pub struct Validated {
    pub game: GameConfig,
    pub account: Account,
}

/// How much of a fan-out read came back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartialRead {
    Complete,
    Partial { failed: Vec<&'static str> },
    Failed,
}

impl PartialRead {
    /// Classify named read results
    pub fn classify(results: &[(&'static str, bool)]) -> Self {
        let failed: Vec<&'static str> = results
            .iter()
            .filter(|(_, ok)| !ok)
            .map(|(name, _)| *name)
            .collect();

        if failed.is_empty() {
            PartialRead::Complete
        } else if failed.len() == results.len() {
            PartialRead::Failed
        } else {
            PartialRead::Partial { failed }
        }
    }
}

#[derive(Clone)]
pub struct ConcurrentValidator {
    accounts: Arc<dyn AccountStore>,
    games: Arc<dyn GameCatalog>,
    ledger: Arc<dyn LedgerWriter>,
    health: Arc<dyn HealthProbe>,
}

impl ConcurrentValidator {
    pub fn new(stores: &Stores) -> Self {
        Self {
            accounts: stores.accounts.clone(),
            games: stores.games.clone(),
            ledger: stores.ledger.clone(),
            health: stores.health.clone(),
        }
    }

    pub async fn validate(&self, key: &GameKey, msisdn: &Msisdn) -> Result<Validated> {
        let health = self.health.clone();
        let warm_up = tokio::spawn(async move { health.ping().await });

        let games = self.games.clone();
        let game_key = key.clone();
        let game_lookup = tokio::spawn(async move { games.find_game(&game_key).await });

        let accounts = self.accounts.clone();
        let owner = msisdn.clone();
        let account_lookup =
            tokio::spawn(async move { accounts.get_or_create_account(&owner).await });

        let ((), game, account) =
            tokio::try_join!(joined(warm_up), joined(game_lookup), joined(account_lookup))?;

        let game = game
            .filter(|game| game.active)
            .ok_or_else(|| AppError::not_found(format!("Game {}", key)))?;

        Ok(Validated { game, account })
    }

    /// [`validate`](Self::validate) bounded by a caller deadline
    pub async fn validate_within(
        &self,
        key: &GameKey,
        msisdn: &Msisdn,
        deadline: Duration,
    ) -> Result<Validated> {
        tokio::time::timeout(deadline, self.validate(key, msisdn))
            .await
            .map_err(|_| AppError::Timeout(deadline))?
    }

    /// Account plus recent bets; a failed history read degrades to an empty list
    pub async fn account_summary(&self, msisdn: &Msisdn, limit: usize) -> Result<AccountSummary> {
        let accounts = self.accounts.clone();
        let owner = msisdn.clone();
        let account_read = tokio::spawn(async move { accounts.find_account(&owner).await });

        let ledger = self.ledger.clone();
        let owner = msisdn.clone();
        let bets_read = tokio::spawn(async move { ledger.bets_for(&owner, limit).await });

        let (account, bets) = tokio::join!(joined(account_read), joined(bets_read));

        let coverage = PartialRead::classify(&[("account", account.is_ok()), ("bets", bets.is_ok())]);
        let degraded = match &coverage {
            PartialRead::Complete => Vec::new(),
            PartialRead::Partial { failed } => {
                tracing::warn!(msisdn = %msisdn, failed = ?failed, "Account summary served partially");
                metrics::counter!("partial_reads_total", "view" => "account_summary").increment(1);
                failed.iter().map(|name| name.to_string()).collect()
            }
            PartialRead::Failed => {
                tracing::error!(msisdn = %msisdn, "Every account summary read failed");
                Vec::new()
            }
        };

        // The account is the one read the summary cannot do without
        let account = account?.ok_or_else(|| AppError::not_found("Account"))?;
        let recent_bets: Vec<BetRecord> = bets.unwrap_or_default();

        Ok(AccountSummary {
            free_bets_available: account.available_free_bets(chrono::Utc::now()),
            account,
            recent_bets,
            degraded,
        })
    }
}

async fn joined<T>(handle: JoinHandle<Result<T>>) -> Result<T> {
    handle
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Read task failed: {}", e)))?
}
