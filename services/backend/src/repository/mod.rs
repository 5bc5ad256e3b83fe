//! Storage seams
//!
//! Every piece of persistent state sits behind one of the traits below so the
//! services never see a concrete backend. Two implementations exist: the
//! Redis store used in production and an in-process store used for local
//! runs and tests.
//!
//! Balance changes go through exactly one entry point, [`AccountStore::apply`],
//! which takes a [`Transition`] and performs its check-and-write atomically.

pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{Money, Msisdn};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{
    Account, BetOutcome, BetRecord, DepositRequest, FailedDepositNotice, GameConfig, GameKey,
    SettlementEvent, SettlementKind, VerificationCode, WithdrawalKind, WithdrawalRequest,
};
use crate::errors::Result;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// A conditional balance mutation
///
/// Each variant carries its own precondition; the store checks it and writes
/// in one step, so two racing transitions can never both observe the same
/// starting state.
#[derive(Debug, Clone)]
pub enum Transition {
    /// Debit the stake (or consume a free bet), credit the payout and append
    /// the bet record. Refused when the balance or free-bet count is short,
    /// or when a bet with the same id already exists.
    PlaceBet { bet: BetRecord },

    /// Finalize a pending bet and credit its payout
    SettleBet {
        bet_id: Uuid,
        outcome: BetOutcome,
        payout: Money,
        drawn_number: Option<u8>,
        settled_at: DateTime<Utc>,
    },

    /// Credit a pending deposit's stored amount and mark it succeeded
    CreditDeposit {
        reference: String,
        transaction_id: Option<String>,
        at: DateTime<Utc>,
    },

    /// Mark a pending deposit failed; no balance change
    FailDeposit {
        reference: String,
        description: Option<String>,
        at: DateTime<Utc>,
    },

    /// Debit the amount and record the withdrawal as pending
    HoldWithdrawal { withdrawal: WithdrawalRequest },

    /// Finalize a pending withdrawal. A failure refunds the held amount.
    /// When both sides carry a transaction id they must match.
    ResolveWithdrawal {
        kind: WithdrawalKind,
        reference: String,
        transaction_id: Option<String>,
        succeeded: bool,
        description: Option<String>,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// Written; carries the owning account after the change
    Applied(Account),
    InsufficientBalance { available: Money },
    NoFreeBet,
    /// A record with the same identity was written earlier; nothing changed
    AlreadyRecorded,
    /// The target is missing or no longer in the state the transition expects
    NotFound,
}

/// Result of an account deletion attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountDeletion {
    /// Account, pending code and sessions removed
    Deleted,
    NotFound,
    /// Money is still on the account
    HasBalance,
    /// A disbursement is holding funds
    WithdrawalPending,
}

/// Result of claiming a settlement reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    Acquired,
    AlreadyProcessed,
    InFlight,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_account(&self, msisdn: &Msisdn) -> Result<Option<Account>>;
    async fn get_or_create_account(&self, msisdn: &Msisdn) -> Result<Account>;
    async fn apply(&self, transition: Transition) -> Result<TransitionOutcome>;
    /// Exclude the account until `until`. An exclusion already running
    /// longer is kept; the stored end date only ever moves later.
    async fn extend_self_exclusion(
        &self,
        msisdn: &Msisdn,
        until: DateTime<Utc>,
    ) -> Result<Option<Account>>;
    async fn grant_free_bets(
        &self,
        msisdn: &Msisdn,
        count: u32,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<Account>>;
    /// Remove an empty account and revoke its sessions
    async fn delete_account(&self, msisdn: &Msisdn) -> Result<AccountDeletion>;
}

#[async_trait]
pub trait GameCatalog: Send + Sync {
    async fn find_game(&self, key: &GameKey) -> Result<Option<GameConfig>>;
    async fn upsert_game(&self, game: &GameConfig) -> Result<()>;
}

/// Append-only records: deposits, withdrawals, settlement events, bets
///
/// Bet records and request status changes are written by
/// [`AccountStore::apply`] together with the balance change they belong to;
/// everything else lands here.
#[async_trait]
pub trait LedgerWriter: Send + Sync {
    async fn record_deposit(&self, deposit: &DepositRequest) -> Result<()>;
    async fn find_deposit(&self, reference: &str) -> Result<Option<DepositRequest>>;
    async fn find_withdrawal(
        &self,
        kind: WithdrawalKind,
        reference: &str,
    ) -> Result<Option<WithdrawalRequest>>;
    /// Store the provider's transaction id on a pending withdrawal
    async fn attach_withdrawal_transaction(
        &self,
        kind: WithdrawalKind,
        reference: &str,
        transaction_id: &str,
    ) -> Result<bool>;
    async fn record_settlement(&self, event: &SettlementEvent) -> Result<()>;
    async fn find_settlement(
        &self,
        kind: SettlementKind,
        reference: &str,
    ) -> Result<Option<SettlementEvent>>;
    async fn record_failed_deposit(&self, notice: &FailedDepositNotice) -> Result<()>;
    async fn find_failed_deposit(&self, reference: &str) -> Result<Option<FailedDepositNotice>>;
    async fn find_bet(&self, bet_id: Uuid) -> Result<Option<BetRecord>>;
    /// Most recent first
    async fn bets_for(&self, msisdn: &Msisdn, limit: usize) -> Result<Vec<BetRecord>>;
}

/// At-most-once claim on a settlement reference
#[async_trait]
pub trait IdempotencyGuard: Send + Sync {
    /// Claim `key` for `lease`. Expired leases can be claimed again.
    async fn try_acquire(&self, key: &str, lease: Duration) -> Result<Acquisition>;
    /// Promote the claim to permanent
    async fn mark_processed(&self, key: &str) -> Result<()>;
    /// Drop an unfinished claim so a redelivery can retry
    async fn release(&self, key: &str) -> Result<()>;
}

#[async_trait]
pub trait VerificationStore: Send + Sync {
    /// Replaces any code already issued for the number
    async fn store_code(&self, code: &VerificationCode) -> Result<()>;
    async fn find_code(&self, msisdn: &Msisdn) -> Result<Option<VerificationCode>>;
    /// Delete the stored code only if it still equals `code`
    async fn consume_code(&self, msisdn: &Msisdn, code: &str) -> Result<bool>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, msisdn: &Msisdn, ttl: Duration) -> Result<String>;
    async fn resolve_session(&self, token: &str) -> Result<Option<Msisdn>>;
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Round trip to the backing store
    async fn ping(&self) -> Result<()>;
}

/// The full set of store handles the services depend on
#[derive(Clone)]
pub struct Stores {
    pub accounts: Arc<dyn AccountStore>,
    pub games: Arc<dyn GameCatalog>,
    pub ledger: Arc<dyn LedgerWriter>,
    pub guard: Arc<dyn IdempotencyGuard>,
    pub codes: Arc<dyn VerificationStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub health: Arc<dyn HealthProbe>,
}

impl Stores {
    /// Wire every seam to one backend
    pub fn from_backend<S>(store: Arc<S>) -> Self
    where
        S: AccountStore
            + GameCatalog
            + LedgerWriter
            + IdempotencyGuard
            + VerificationStore
            + SessionStore
            + HealthProbe
            + 'static,
    {
        Self {
            accounts: store.clone(),
            games: store.clone(),
            ledger: store.clone(),
            guard: store.clone(),
            codes: store.clone(),
            sessions: store.clone(),
            health: store,
        }
    }

    pub fn in_memory() -> Self {
        Self::from_backend(Arc::new(MemoryStore::new()))
    }

    pub fn redis(redis: redis::aio::ConnectionManager) -> Self {
        Self::from_backend(Arc::new(RedisStore::new(redis)))
    }
}

/// Opaque session token
pub(crate) fn new_session_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}
