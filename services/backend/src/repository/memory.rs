//! In-process store
//!
//! All state sits behind a single mutex. Every trait method takes the lock,
//! does its work synchronously and releases it, so transitions are atomic
//! with respect to each other without any await inside the critical section.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::Msisdn;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::{
    new_session_token, AccountDeletion, AccountStore, Acquisition, GameCatalog, HealthProbe, IdempotencyGuard,
    LedgerWriter, SessionStore, Transition, TransitionOutcome, VerificationStore,
};
use crate::domain::{
    Account, BetOutcome, BetRecord, DepositRequest, FailedDepositNotice, GameConfig, GameKey,
    RequestStatus, SettlementEvent, SettlementKind, VerificationCode, WithdrawalKind,
    WithdrawalRequest,
};
use crate::errors::Result;

enum GuardEntry {
    Leased(Instant),
    Processed,
}

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<Msisdn, Account>,
    games: HashMap<GameKey, GameConfig>,
    bets: HashMap<Uuid, BetRecord>,
    bets_by_user: HashMap<Msisdn, Vec<Uuid>>,
    deposits: HashMap<String, DepositRequest>,
    withdrawals: HashMap<(WithdrawalKind, String), WithdrawalRequest>,
    settlements: HashMap<(SettlementKind, String), SettlementEvent>,
    failed_deposits: HashMap<String, FailedDepositNotice>,
    guards: HashMap<String, GuardEntry>,
    codes: HashMap<Msisdn, VerificationCode>,
    sessions: HashMap<String, (Msisdn, Instant)>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MemoryState {
    fn apply(&mut self, transition: Transition) -> Result<TransitionOutcome> {
        match transition {
            Transition::PlaceBet { bet } => {
                if self.bets.contains_key(&bet.bet_id) {
                    return Ok(TransitionOutcome::AlreadyRecorded);
                }
                let Some(account) = self.accounts.get_mut(&bet.msisdn) else {
                    return Ok(TransitionOutcome::NotFound);
                };

                let mut free_bet_count = account.free_bet_count;
                let mut balance = account.balance;
                if bet.free_bet {
                    if account.available_free_bets(bet.created_at) == 0 {
                        return Ok(TransitionOutcome::NoFreeBet);
                    }
                    free_bet_count -= 1;
                } else {
                    if balance < bet.amount {
                        return Ok(TransitionOutcome::InsufficientBalance { available: balance });
                    }
                    balance = balance.checked_sub(bet.amount)?;
                }
                balance = balance.checked_add(bet.payout)?;

                account.free_bet_count = free_bet_count;
                account.balance = balance;
                let account = account.clone();

                self.bets_by_user
                    .entry(bet.msisdn.clone())
                    .or_default()
                    .push(bet.bet_id);
                self.bets.insert(bet.bet_id, bet);

                Ok(TransitionOutcome::Applied(account))
            }

            Transition::SettleBet {
                bet_id,
                outcome,
                payout,
                drawn_number,
                settled_at,
            } => {
                let Some(bet) = self
                    .bets
                    .get_mut(&bet_id)
                    .filter(|bet| bet.outcome == BetOutcome::Pending)
                else {
                    return Ok(TransitionOutcome::NotFound);
                };
                let Some(account) = self.accounts.get_mut(&bet.msisdn) else {
                    return Ok(TransitionOutcome::NotFound);
                };

                account.balance = account.balance.checked_add(payout)?;
                bet.outcome = outcome;
                bet.payout = payout;
                bet.drawn_number = drawn_number;
                bet.settled_at = Some(settled_at);

                Ok(TransitionOutcome::Applied(account.clone()))
            }

            Transition::CreditDeposit {
                reference,
                transaction_id,
                at,
            } => {
                let Some(deposit) = self
                    .deposits
                    .get_mut(&reference)
                    .filter(|d| d.status == RequestStatus::Pending)
                else {
                    return Ok(TransitionOutcome::NotFound);
                };
                let Some(account) = self.accounts.get_mut(&deposit.msisdn) else {
                    return Ok(TransitionOutcome::NotFound);
                };

                account.balance = account.balance.checked_add(deposit.amount)?;
                deposit.status = RequestStatus::Succeeded;
                deposit.transaction_id = transaction_id.or(deposit.transaction_id.take());
                deposit.updated_at = at;

                Ok(TransitionOutcome::Applied(account.clone()))
            }

            Transition::FailDeposit {
                reference,
                description,
                at,
            } => {
                let Some(deposit) = self
                    .deposits
                    .get_mut(&reference)
                    .filter(|d| d.status == RequestStatus::Pending)
                else {
                    return Ok(TransitionOutcome::NotFound);
                };
                let Some(account) = self.accounts.get(&deposit.msisdn) else {
                    return Ok(TransitionOutcome::NotFound);
                };

                deposit.status = RequestStatus::Failed;
                deposit.description = description;
                deposit.updated_at = at;

                Ok(TransitionOutcome::Applied(account.clone()))
            }

            Transition::HoldWithdrawal { withdrawal } => {
                let Some(account) = self.accounts.get_mut(&withdrawal.msisdn) else {
                    return Ok(TransitionOutcome::NotFound);
                };
                if account.balance < withdrawal.amount {
                    return Ok(TransitionOutcome::InsufficientBalance {
                        available: account.balance,
                    });
                }

                account.balance = account.balance.checked_sub(withdrawal.amount)?;
                let account = account.clone();
                self.withdrawals
                    .insert((withdrawal.kind, withdrawal.reference.clone()), withdrawal);

                Ok(TransitionOutcome::Applied(account))
            }

            Transition::ResolveWithdrawal {
                kind,
                reference,
                transaction_id,
                succeeded,
                description,
                at,
            } => {
                let Some(withdrawal) = self
                    .withdrawals
                    .get_mut(&(kind, reference))
                    .filter(|w| w.status == RequestStatus::Pending)
                else {
                    return Ok(TransitionOutcome::NotFound);
                };
                if let (Some(stored), Some(given)) = (&withdrawal.transaction_id, &transaction_id) {
                    if stored != given {
                        return Ok(TransitionOutcome::NotFound);
                    }
                }
                let Some(account) = self.accounts.get_mut(&withdrawal.msisdn) else {
                    return Ok(TransitionOutcome::NotFound);
                };

                if succeeded {
                    withdrawal.status = RequestStatus::Succeeded;
                } else {
                    account.balance = account.balance.checked_add(withdrawal.amount)?;
                    withdrawal.status = RequestStatus::Failed;
                }
                if transaction_id.is_some() {
                    withdrawal.transaction_id = transaction_id;
                }
                withdrawal.description = description;
                withdrawal.updated_at = at;

                Ok(TransitionOutcome::Applied(account.clone()))
            }
        }
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn find_account(&self, msisdn: &Msisdn) -> Result<Option<Account>> {
        Ok(self.state().accounts.get(msisdn).cloned())
    }

    async fn get_or_create_account(&self, msisdn: &Msisdn) -> Result<Account> {
        let mut state = self.state();
        let account = state
            .accounts
            .entry(msisdn.clone())
            .or_insert_with(|| Account::new(msisdn.clone(), Utc::now()));
        Ok(account.clone())
    }

    async fn apply(&self, transition: Transition) -> Result<TransitionOutcome> {
        self.state().apply(transition)
    }

    async fn extend_self_exclusion(
        &self,
        msisdn: &Msisdn,
        until: DateTime<Utc>,
    ) -> Result<Option<Account>> {
        let mut state = self.state();
        Ok(state.accounts.get_mut(msisdn).map(|account| {
            let current = account.self_exclusion_until;
            account.self_exclusion_until = Some(current.map_or(until, |c| c.max(until)));
            account.clone()
        }))
    }

    async fn grant_free_bets(
        &self,
        msisdn: &Msisdn,
        count: u32,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<Account>> {
        let mut state = self.state();
        Ok(state.accounts.get_mut(msisdn).map(|account| {
            account.free_bet_count = account.free_bet_count.saturating_add(count);
            account.free_bet_expiry = Some(expires_at);
            account.clone()
        }))
    }

    async fn delete_account(&self, msisdn: &Msisdn) -> Result<AccountDeletion> {
        let mut state = self.state();
        let Some(account) = state.accounts.get(msisdn) else {
            return Ok(AccountDeletion::NotFound);
        };
        if !account.balance.is_zero() {
            return Ok(AccountDeletion::HasBalance);
        }
        if state
            .withdrawals
            .values()
            .any(|w| &w.msisdn == msisdn && w.status == RequestStatus::Pending)
        {
            return Ok(AccountDeletion::WithdrawalPending);
        }

        state.sessions.retain(|_, (owner, _)| owner != msisdn);
        state.codes.remove(msisdn);
        state.accounts.remove(msisdn);
        Ok(AccountDeletion::Deleted)
    }
}

#[async_trait]
impl GameCatalog for MemoryStore {
    async fn find_game(&self, key: &GameKey) -> Result<Option<GameConfig>> {
        Ok(self.state().games.get(key).cloned())
    }

    async fn upsert_game(&self, game: &GameConfig) -> Result<()> {
        self.state().games.insert(game.key(), game.clone());
        Ok(())
    }
}

#[async_trait]
impl LedgerWriter for MemoryStore {
    async fn record_deposit(&self, deposit: &DepositRequest) -> Result<()> {
        self.state()
            .deposits
            .insert(deposit.reference.clone(), deposit.clone());
        Ok(())
    }

    async fn find_deposit(&self, reference: &str) -> Result<Option<DepositRequest>> {
        Ok(self.state().deposits.get(reference).cloned())
    }

    async fn find_withdrawal(
        &self,
        kind: WithdrawalKind,
        reference: &str,
    ) -> Result<Option<WithdrawalRequest>> {
        Ok(self
            .state()
            .withdrawals
            .get(&(kind, reference.to_string()))
            .cloned())
    }

    async fn attach_withdrawal_transaction(
        &self,
        kind: WithdrawalKind,
        reference: &str,
        transaction_id: &str,
    ) -> Result<bool> {
        let mut state = self.state();
        match state
            .withdrawals
            .get_mut(&(kind, reference.to_string()))
            .filter(|w| w.status == RequestStatus::Pending && w.transaction_id.is_none())
        {
            Some(withdrawal) => {
                withdrawal.transaction_id = Some(transaction_id.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_settlement(&self, event: &SettlementEvent) -> Result<()> {
        self.state()
            .settlements
            .insert((event.kind, event.reference.clone()), event.clone());
        Ok(())
    }

    async fn find_settlement(
        &self,
        kind: SettlementKind,
        reference: &str,
    ) -> Result<Option<SettlementEvent>> {
        Ok(self
            .state()
            .settlements
            .get(&(kind, reference.to_string()))
            .cloned())
    }

    async fn record_failed_deposit(&self, notice: &FailedDepositNotice) -> Result<()> {
        self.state()
            .failed_deposits
            .entry(notice.reference.clone())
            .or_insert_with(|| notice.clone());
        Ok(())
    }

    async fn find_failed_deposit(&self, reference: &str) -> Result<Option<FailedDepositNotice>> {
        Ok(self.state().failed_deposits.get(reference).cloned())
    }

    async fn find_bet(&self, bet_id: Uuid) -> Result<Option<BetRecord>> {
        Ok(self.state().bets.get(&bet_id).cloned())
    }

    async fn bets_for(&self, msisdn: &Msisdn, limit: usize) -> Result<Vec<BetRecord>> {
        let state = self.state();
        let Some(ids) = state.bets_by_user.get(msisdn) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .rev()
            .filter_map(|id| state.bets.get(id).cloned())
            .take(limit)
            .collect())
    }
}

#[async_trait]
impl IdempotencyGuard for MemoryStore {
    async fn try_acquire(&self, key: &str, lease: Duration) -> Result<Acquisition> {
        let mut state = self.state();
        let now = Instant::now();

        match state.guards.get(key) {
            Some(GuardEntry::Processed) => Ok(Acquisition::AlreadyProcessed),
            Some(GuardEntry::Leased(expires_at)) if *expires_at > now => Ok(Acquisition::InFlight),
            _ => {
                state
                    .guards
                    .insert(key.to_string(), GuardEntry::Leased(now + lease));
                Ok(Acquisition::Acquired)
            }
        }
    }

    async fn mark_processed(&self, key: &str) -> Result<()> {
        self.state()
            .guards
            .insert(key.to_string(), GuardEntry::Processed);
        Ok(())
    }

    async fn release(&self, key: &str) -> Result<()> {
        let mut state = self.state();
        if matches!(state.guards.get(key), Some(GuardEntry::Leased(_))) {
            state.guards.remove(key);
        }
        Ok(())
    }
}

#[async_trait]
impl VerificationStore for MemoryStore {
    async fn store_code(&self, code: &VerificationCode) -> Result<()> {
        self.state().codes.insert(code.msisdn.clone(), code.clone());
        Ok(())
    }

    async fn find_code(&self, msisdn: &Msisdn) -> Result<Option<VerificationCode>> {
        Ok(self.state().codes.get(msisdn).cloned())
    }

    async fn consume_code(&self, msisdn: &Msisdn, code: &str) -> Result<bool> {
        let mut state = self.state();
        if state.codes.get(msisdn).is_some_and(|stored| stored.code == code) {
            state.codes.remove(msisdn);
            return Ok(true);
        }
        Ok(false)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, msisdn: &Msisdn, ttl: Duration) -> Result<String> {
        let token = new_session_token();
        self.state()
            .sessions
            .insert(token.clone(), (msisdn.clone(), Instant::now() + ttl));
        Ok(token)
    }

    async fn resolve_session(&self, token: &str) -> Result<Option<Msisdn>> {
        let mut state = self.state();
        match state.sessions.get(token) {
            Some((msisdn, expires_at)) if *expires_at > Instant::now() => Ok(Some(msisdn.clone())),
            Some(_) => {
                state.sessions.remove(token);
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl HealthProbe for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
