//! Redis-backed store
//!
//! Records live in hashes (one per account, bet, deposit, withdrawal and
//! settlement event) with a sorted set per user for bet history. Every
//! conditional write is a Lua script from [`scripts`], so the check and the
//! mutation run as one unit on the server.

mod codec;
mod keys;
mod scripts;
mod status;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use shared::{Money, Msisdn};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use super::{
    new_session_token, AccountDeletion, AccountStore, Acquisition, GameCatalog, HealthProbe, IdempotencyGuard,
    LedgerWriter, SessionStore, Transition, TransitionOutcome, VerificationStore,
};
use crate::domain::{
    Account, BetRecord, DepositRequest, FailedDepositNotice, GameConfig, GameKey, SettlementEvent,
    SettlementKind, VerificationCode, WithdrawalKind, WithdrawalRequest,
};
use crate::errors::{AppError, Result};

pub use codec::*;
pub use keys::*;
pub use scripts::*;
pub use status::*;

/// Extra time an expired verification code is kept so it reads as expired
/// rather than missing
const EXPIRED_CODE_RETENTION_MS: i64 = 60 * 60 * 1000;

pub struct RedisStore {
    redis: ConnectionManager,
}

impl RedisStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    async fn load_hash(&self, key: &str) -> Result<Option<HashMap<String, String>>> {
        let mut redis_conn = self.redis.clone();
        let map: HashMap<String, String> = redis_conn.hgetall(key).await?;
        Ok(if map.is_empty() { None } else { Some(map) })
    }

    async fn write_hash(&self, key: &str, fields: &Fields) -> Result<()> {
        let mut redis_conn = self.redis.clone();
        let _: () = redis_conn.hset_multiple(key, fields).await?;
        Ok(())
    }

    async fn invoke_transition(&self, transition: Transition) -> Result<TransitionOutcome> {
        let mut redis_conn = self.redis.clone();

        let reply: Vec<String> = match transition {
            Transition::PlaceBet { bet } => {
                Script::new(PLACE_BET_SCRIPT)
                    .key(account_key(&bet.msisdn))
                    .key(bet_key(bet.bet_id))
                    .key(user_index_key(&bet.msisdn))
                    .arg(bet.amount.minor_units())
                    .arg(bet.payout.minor_units())
                    .arg(if bet.free_bet { "1" } else { "0" })
                    .arg(Utc::now().timestamp_millis())
                    .arg(bet.bet_id.to_string())
                    .arg(bet.created_at.timestamp_millis())
                    .arg(flatten(&bet_fields(&bet)))
                    .invoke_async(&mut redis_conn)
                    .await?
            }
            Transition::SettleBet {
                bet_id,
                outcome,
                payout,
                drawn_number,
                settled_at,
            } => {
                Script::new(SETTLE_BET_SCRIPT)
                    .key(bet_key(bet_id))
                    .arg(payout.minor_units())
                    .arg(outcome_to_string(outcome))
                    .arg(drawn_number.map(|n| n.to_string()).unwrap_or_default())
                    .arg(settled_at.timestamp_millis())
                    .invoke_async(&mut redis_conn)
                    .await?
            }
            Transition::CreditDeposit {
                reference,
                transaction_id,
                at,
            } => {
                Script::new(CREDIT_DEPOSIT_SCRIPT)
                    .key(deposit_key(&reference))
                    .arg(transaction_id.unwrap_or_default())
                    .arg(at.timestamp_millis())
                    .invoke_async(&mut redis_conn)
                    .await?
            }
            Transition::FailDeposit {
                reference,
                description,
                at,
            } => {
                Script::new(FAIL_DEPOSIT_SCRIPT)
                    .key(deposit_key(&reference))
                    .arg(description.unwrap_or_default())
                    .arg(at.timestamp_millis())
                    .invoke_async(&mut redis_conn)
                    .await?
            }
            Transition::HoldWithdrawal { withdrawal } => {
                Script::new(HOLD_WITHDRAWAL_SCRIPT)
                    .key(account_key(&withdrawal.msisdn))
                    .key(withdrawal_key(withdrawal.kind, &withdrawal.reference))
                    .arg(withdrawal.amount.minor_units())
                    .arg(flatten(&withdrawal_fields(&withdrawal)))
                    .invoke_async(&mut redis_conn)
                    .await?
            }
            Transition::ResolveWithdrawal {
                kind,
                reference,
                transaction_id,
                succeeded,
                description,
                at,
            } => {
                Script::new(RESOLVE_WITHDRAWAL_SCRIPT)
                    .key(withdrawal_key(kind, &reference))
                    .arg(transaction_id.unwrap_or_default())
                    .arg(if succeeded { "1" } else { "0" })
                    .arg(description.unwrap_or_default())
                    .arg(at.timestamp_millis())
                    .invoke_async(&mut redis_conn)
                    .await?
            }
        };

        transition_outcome(&reply)
    }
}

/// Decode the shared transition reply shape
fn transition_outcome(reply: &[String]) -> Result<TransitionOutcome> {
    match reply.split_first() {
        Some((status, account)) if status == "applied" => Ok(TransitionOutcome::Applied(
            account_from_hash(&pairs_to_map(account))?,
        )),
        Some((status, rest)) if status == "insufficient" => {
            let available = rest
                .first()
                .and_then(|raw| raw.parse::<u64>().ok())
                .map(Money::from_minor)
                .unwrap_or(Money::ZERO);
            Ok(TransitionOutcome::InsufficientBalance { available })
        }
        Some((status, _)) if status == "no_free_bet" => Ok(TransitionOutcome::NoFreeBet),
        Some((status, _)) if status == "duplicate" => Ok(TransitionOutcome::AlreadyRecorded),
        Some((status, _)) if status == "not_found" => Ok(TransitionOutcome::NotFound),
        _ => Err(AppError::Internal(anyhow::anyhow!(
            "Unexpected transition reply: {:?}",
            reply.first()
        ))),
    }
}

fn account_deletion(reply: &str) -> Result<AccountDeletion> {
    match reply {
        "deleted" => Ok(AccountDeletion::Deleted),
        "not_found" => Ok(AccountDeletion::NotFound),
        "has_balance" => Ok(AccountDeletion::HasBalance),
        "withdrawal_pending" => Ok(AccountDeletion::WithdrawalPending),
        other => Err(AppError::Internal(anyhow::anyhow!(
            "Unexpected deletion reply '{}'",
            other
        ))),
    }
}

fn optional_account(reply: &[String]) -> Result<Option<Account>> {
    if reply.is_empty() {
        return Ok(None);
    }
    account_from_hash(&pairs_to_map(reply)).map(Some)
}

#[async_trait]
impl AccountStore for RedisStore {
    async fn find_account(&self, msisdn: &Msisdn) -> Result<Option<Account>> {
        self.load_hash(&account_key(msisdn))
            .await?
            .map(|map| account_from_hash(&map))
            .transpose()
    }

    async fn get_or_create_account(&self, msisdn: &Msisdn) -> Result<Account> {
        let mut redis_conn = self.redis.clone();
        let fresh = Account::new(msisdn.clone(), Utc::now());

        let reply: Vec<String> = Script::new(GET_OR_CREATE_ACCOUNT_SCRIPT)
            .key(account_key(msisdn))
            .arg(flatten(&account_fields(&fresh)))
            .invoke_async(&mut redis_conn)
            .await?;

        account_from_hash(&pairs_to_map(&reply))
    }

    async fn apply(&self, transition: Transition) -> Result<TransitionOutcome> {
        self.invoke_transition(transition).await
    }

    async fn extend_self_exclusion(
        &self,
        msisdn: &Msisdn,
        until: DateTime<Utc>,
    ) -> Result<Option<Account>> {
        let mut redis_conn = self.redis.clone();
        let reply: Vec<String> = Script::new(EXTEND_SELF_EXCLUSION_SCRIPT)
            .key(account_key(msisdn))
            .arg(until.timestamp_millis())
            .invoke_async(&mut redis_conn)
            .await?;

        optional_account(&reply)
    }

    async fn grant_free_bets(
        &self,
        msisdn: &Msisdn,
        count: u32,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<Account>> {
        let mut redis_conn = self.redis.clone();
        let reply: Vec<String> = Script::new(GRANT_FREE_BETS_SCRIPT)
            .key(account_key(msisdn))
            .arg(count)
            .arg(expires_at.timestamp_millis())
            .invoke_async(&mut redis_conn)
            .await?;

        optional_account(&reply)
    }

    async fn delete_account(&self, msisdn: &Msisdn) -> Result<AccountDeletion> {
        let mut redis_conn = self.redis.clone();
        let reply: String = Script::new(DELETE_ACCOUNT_SCRIPT)
            .key(account_key(msisdn))
            .key(otp_key(msisdn))
            .key(user_sessions_key(msisdn))
            .invoke_async(&mut redis_conn)
            .await?;

        account_deletion(&reply)
    }
}

#[async_trait]
impl GameCatalog for RedisStore {
    async fn find_game(&self, key: &GameKey) -> Result<Option<GameConfig>> {
        self.load_hash(&game_key(key))
            .await?
            .map(|map| game_from_hash(&map))
            .transpose()
    }

    async fn upsert_game(&self, game: &GameConfig) -> Result<()> {
        self.write_hash(&game_key(&game.key()), &game_fields(game))
            .await
    }
}

#[async_trait]
impl LedgerWriter for RedisStore {
    async fn record_deposit(&self, deposit: &DepositRequest) -> Result<()> {
        self.write_hash(&deposit_key(&deposit.reference), &deposit_fields(deposit))
            .await
    }

    async fn find_deposit(&self, reference: &str) -> Result<Option<DepositRequest>> {
        self.load_hash(&deposit_key(reference))
            .await?
            .map(|map| deposit_from_hash(&map))
            .transpose()
    }

    async fn find_withdrawal(
        &self,
        kind: WithdrawalKind,
        reference: &str,
    ) -> Result<Option<WithdrawalRequest>> {
        self.load_hash(&withdrawal_key(kind, reference))
            .await?
            .map(|map| withdrawal_from_hash(&map))
            .transpose()
    }

    async fn attach_withdrawal_transaction(
        &self,
        kind: WithdrawalKind,
        reference: &str,
        transaction_id: &str,
    ) -> Result<bool> {
        let mut redis_conn = self.redis.clone();
        let attached: i64 = Script::new(ATTACH_TRANSACTION_SCRIPT)
            .key(withdrawal_key(kind, reference))
            .arg(transaction_id)
            .invoke_async(&mut redis_conn)
            .await?;

        Ok(attached == 1)
    }

    async fn record_settlement(&self, event: &SettlementEvent) -> Result<()> {
        self.write_hash(
            &settlement_key(event.kind, &event.reference),
            &settlement_fields(event),
        )
        .await
    }

    async fn find_settlement(
        &self,
        kind: SettlementKind,
        reference: &str,
    ) -> Result<Option<SettlementEvent>> {
        self.load_hash(&settlement_key(kind, reference))
            .await?
            .map(|map| settlement_from_hash(&map))
            .transpose()
    }

    async fn record_failed_deposit(&self, notice: &FailedDepositNotice) -> Result<()> {
        let key = failed_deposit_key(&notice.reference);
        let mut pipe = redis::pipe();
        pipe.atomic();

        // First write wins; a retried job leaves the original record alone
        for (field, value) in failed_deposit_fields(notice) {
            pipe.hset_nx(&key, field, value).ignore();
        }

        let mut redis_conn = self.redis.clone();
        let _: () = pipe.query_async(&mut redis_conn).await?;
        Ok(())
    }

    async fn find_failed_deposit(&self, reference: &str) -> Result<Option<FailedDepositNotice>> {
        self.load_hash(&failed_deposit_key(reference))
            .await?
            .map(|map| failed_deposit_from_hash(&map))
            .transpose()
    }

    async fn find_bet(&self, bet_id: Uuid) -> Result<Option<BetRecord>> {
        self.load_hash(&bet_key(bet_id))
            .await?
            .map(|map| bet_from_hash(&map))
            .transpose()
    }

    async fn bets_for(&self, msisdn: &Msisdn, limit: usize) -> Result<Vec<BetRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut redis_conn = self.redis.clone();
        let bet_ids: Vec<String> = redis_conn
            .zrevrange(user_index_key(msisdn), 0, limit as isize - 1)
            .await?;

        let mut bets = Vec::with_capacity(bet_ids.len());
        for id_str in bet_ids {
            if let Ok(id) = Uuid::parse_str(&id_str) {
                if let Some(bet) = self.find_bet(id).await? {
                    bets.push(bet);
                }
            }
        }

        Ok(bets)
    }
}

#[async_trait]
impl IdempotencyGuard for RedisStore {
    async fn try_acquire(&self, key: &str, lease: Duration) -> Result<Acquisition> {
        let mut redis_conn = self.redis.clone();
        let lease_ms = (lease.as_millis() as u64).max(1);

        let state: String = Script::new(ACQUIRE_GUARD_SCRIPT)
            .key(guard_key(key))
            .arg(lease_ms)
            .invoke_async(&mut redis_conn)
            .await?;

        match state.as_str() {
            "acquired" => Ok(Acquisition::Acquired),
            "in_flight" => Ok(Acquisition::InFlight),
            "processed" => Ok(Acquisition::AlreadyProcessed),
            other => Err(AppError::Internal(anyhow::anyhow!(
                "Unexpected guard state '{}'",
                other
            ))),
        }
    }

    async fn mark_processed(&self, key: &str) -> Result<()> {
        let mut redis_conn = self.redis.clone();
        let _: () = redis_conn.set(guard_key(key), "processed").await?;
        Ok(())
    }

    async fn release(&self, key: &str) -> Result<()> {
        let mut redis_conn = self.redis.clone();
        let _: i64 = Script::new(RELEASE_GUARD_SCRIPT)
            .key(guard_key(key))
            .invoke_async(&mut redis_conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl VerificationStore for RedisStore {
    async fn store_code(&self, code: &VerificationCode) -> Result<()> {
        let key = otp_key(&code.msisdn);
        let retain_until = code.expires_at.timestamp_millis() + EXPIRED_CODE_RETENTION_MS;

        let mut redis_conn = self.redis.clone();
        let _: () = redis::pipe()
            .atomic()
            .del(&key)
            .ignore()
            .hset_multiple(&key, &code_fields(code))
            .ignore()
            .cmd("PEXPIREAT")
            .arg(&key)
            .arg(retain_until)
            .ignore()
            .query_async(&mut redis_conn)
            .await?;

        Ok(())
    }

    async fn find_code(&self, msisdn: &Msisdn) -> Result<Option<VerificationCode>> {
        self.load_hash(&otp_key(msisdn))
            .await?
            .map(|map| code_from_hash(&map))
            .transpose()
    }

    async fn consume_code(&self, msisdn: &Msisdn, code: &str) -> Result<bool> {
        let mut redis_conn = self.redis.clone();
        let deleted: i64 = Script::new(CONSUME_CODE_SCRIPT)
            .key(otp_key(msisdn))
            .arg(code)
            .invoke_async(&mut redis_conn)
            .await?;

        Ok(deleted == 1)
    }
}

#[async_trait]
impl SessionStore for RedisStore {
    async fn create_session(&self, msisdn: &Msisdn, ttl: Duration) -> Result<String> {
        let token = new_session_token();
        let mut redis_conn = self.redis.clone();

        let _: i64 = Script::new(CREATE_SESSION_SCRIPT)
            .key(session_key(&token))
            .key(user_sessions_key(msisdn))
            .arg(msisdn.as_str())
            .arg(&token)
            .arg(ttl.as_secs().max(1))
            .invoke_async(&mut redis_conn)
            .await?;

        Ok(token)
    }

    async fn resolve_session(&self, token: &str) -> Result<Option<Msisdn>> {
        let mut redis_conn = self.redis.clone();
        let stored: Option<String> = redis_conn.get(session_key(token)).await?;

        stored
            .map(|raw| {
                Msisdn::parse(&raw).map_err(|e| {
                    AppError::Internal(anyhow::anyhow!("Corrupt session for token: {}", e))
                })
            })
            .transpose()
    }
}

#[async_trait]
impl HealthProbe for RedisStore {
    async fn ping(&self) -> Result<()> {
        let mut redis_conn = self.redis.clone();
        let _: String = redis::cmd("PING").query_async(&mut redis_conn).await?;
        Ok(())
    }
}
