//! Conversion between domain records and Redis hashes
//!
//! Amounts are stored as integer minor units, timestamps as epoch
//! milliseconds and absent optionals as empty strings.

use chrono::{DateTime, TimeZone, Utc};
use shared::{Money, Msisdn};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use super::status::*;
use crate::domain::{
    Account, BetIntent, BetRecord, DepositRequest, FailedDepositNotice, GameCategory, GameConfig,
    SettlementEvent, VerificationCode, WithdrawalRequest,
};
use crate::errors::{AppError, Result};

pub type Fields = Vec<(&'static str, String)>;

/// Flatten fields into script arguments: `field1, value1, field2, ...`
pub fn flatten(fields: &Fields) -> Vec<String> {
    fields
        .iter()
        .flat_map(|(name, value)| [name.to_string(), value.clone()])
        .collect()
}

/// Turn an HGETALL-style flat reply back into a map
pub fn pairs_to_map(pairs: &[String]) -> HashMap<String, String> {
    pairs
        .chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect()
}

fn ms(at: DateTime<Utc>) -> String {
    at.timestamp_millis().to_string()
}

fn optional_ms(at: Option<DateTime<Utc>>) -> String {
    at.map(ms).unwrap_or_default()
}

fn minor(amount: Money) -> String {
    amount.minor_units().to_string()
}

fn corrupt(field: &str, detail: impl std::fmt::Display) -> AppError {
    AppError::Internal(anyhow::anyhow!("Corrupt stored field '{}': {}", field, detail))
}

fn required<'a>(map: &'a HashMap<String, String>, field: &str) -> Result<&'a str> {
    map.get(field)
        .map(String::as_str)
        .ok_or_else(|| corrupt(field, "missing"))
}

fn optional<'a>(map: &'a HashMap<String, String>, field: &str) -> Option<&'a str> {
    map.get(field).map(String::as_str).filter(|v| !v.is_empty())
}

fn parse<T>(map: &HashMap<String, String>, field: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = required(map, field)?;
    raw.parse().map_err(|e| corrupt(field, e))
}

fn parse_optional<T>(map: &HashMap<String, String>, field: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional(map, field)
        .map(|raw| raw.parse().map_err(|e| corrupt(field, e)))
        .transpose()
}

fn money(map: &HashMap<String, String>, field: &str) -> Result<Money> {
    parse::<u64>(map, field).map(Money::from_minor)
}

fn timestamp(map: &HashMap<String, String>, field: &str) -> Result<DateTime<Utc>> {
    let millis: i64 = parse(map, field)?;
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| corrupt(field, millis))
}

fn optional_timestamp(map: &HashMap<String, String>, field: &str) -> Result<Option<DateTime<Utc>>> {
    match parse_optional::<i64>(map, field)? {
        Some(millis) => Utc
            .timestamp_millis_opt(millis)
            .single()
            .map(Some)
            .ok_or_else(|| corrupt(field, millis)),
        None => Ok(None),
    }
}

fn msisdn(map: &HashMap<String, String>, field: &str) -> Result<Msisdn> {
    Msisdn::parse(required(map, field)?).map_err(|e| corrupt(field, e))
}

fn mapped<T>(map: &HashMap<String, String>, field: &str, f: fn(&str) -> Option<T>) -> Result<T> {
    let raw = required(map, field)?;
    f(raw).ok_or_else(|| corrupt(field, raw))
}

// ---------------------------------------------------------------------------

pub fn account_fields(account: &Account) -> Fields {
    vec![
        ("msisdn", account.msisdn.to_string()),
        ("balance", minor(account.balance)),
        ("free_bet_count", account.free_bet_count.to_string()),
        ("free_bet_expiry_ms", optional_ms(account.free_bet_expiry)),
        ("status", account_status_to_string(account.status).to_string()),
        ("self_exclusion_until_ms", optional_ms(account.self_exclusion_until)),
        ("created_at_ms", ms(account.created_at)),
    ]
}

pub fn account_from_hash(map: &HashMap<String, String>) -> Result<Account> {
    Ok(Account {
        msisdn: msisdn(map, "msisdn")?,
        balance: money(map, "balance")?,
        free_bet_count: parse_optional(map, "free_bet_count")?.unwrap_or(0),
        free_bet_expiry: optional_timestamp(map, "free_bet_expiry_ms")?,
        status: mapped(map, "status", account_status_from_string)?,
        self_exclusion_until: optional_timestamp(map, "self_exclusion_until_ms")?,
        created_at: timestamp(map, "created_at_ms")?,
    })
}

pub fn game_fields(game: &GameConfig) -> Fields {
    vec![
        ("category", game.category.as_str().to_string()),
        ("game_cat_id", game.game_cat_id.clone()),
        ("name", game.name.clone()),
        ("bet_amount", minor(game.bet_amount)),
        ("payout_multiplier", game.payout_multiplier.to_string()),
        ("rtp_limit", game.rtp_limit.to_string()),
        ("active", if game.active { "1" } else { "0" }.to_string()),
    ]
}

pub fn game_from_hash(map: &HashMap<String, String>) -> Result<GameConfig> {
    Ok(GameConfig {
        category: mapped(map, "category", GameCategory::parse)?,
        game_cat_id: required(map, "game_cat_id")?.to_string(),
        name: map.get("name").cloned().unwrap_or_default(),
        bet_amount: money(map, "bet_amount")?,
        payout_multiplier: parse(map, "payout_multiplier")?,
        rtp_limit: parse_optional(map, "rtp_limit")?.unwrap_or(100),
        active: required(map, "active")? == "1",
    })
}

pub fn bet_fields(bet: &BetRecord) -> Fields {
    vec![
        ("bet_id", bet.bet_id.to_string()),
        ("msisdn", bet.msisdn.to_string()),
        ("category", bet.category.as_str().to_string()),
        ("game_cat_id", bet.game_cat_id.clone()),
        ("amount", minor(bet.amount)),
        ("choice", bet.choice.map(|c| c.to_string()).unwrap_or_default()),
        ("channel", bet.channel.clone()),
        ("outcome", outcome_to_string(bet.outcome).to_string()),
        ("payout", minor(bet.payout)),
        ("drawn_number", bet.drawn_number.map(|n| n.to_string()).unwrap_or_default()),
        ("free_bet", if bet.free_bet { "1" } else { "0" }.to_string()),
        ("created_at_ms", ms(bet.created_at)),
        ("settled_at_ms", optional_ms(bet.settled_at)),
    ]
}

pub fn bet_from_hash(map: &HashMap<String, String>) -> Result<BetRecord> {
    Ok(BetRecord {
        bet_id: parse::<Uuid>(map, "bet_id")?,
        msisdn: msisdn(map, "msisdn")?,
        category: mapped(map, "category", GameCategory::parse)?,
        game_cat_id: required(map, "game_cat_id")?.to_string(),
        amount: money(map, "amount")?,
        choice: parse_optional(map, "choice")?,
        channel: map.get("channel").cloned().unwrap_or_default(),
        outcome: mapped(map, "outcome", outcome_from_string)?,
        payout: money(map, "payout")?,
        drawn_number: parse_optional(map, "drawn_number")?,
        free_bet: optional(map, "free_bet") == Some("1"),
        created_at: timestamp(map, "created_at_ms")?,
        settled_at: optional_timestamp(map, "settled_at_ms")?,
    })
}

pub fn deposit_fields(deposit: &DepositRequest) -> Fields {
    let intent = deposit.bet_intent.as_ref();
    vec![
        ("reference", deposit.reference.clone()),
        ("msisdn", deposit.msisdn.to_string()),
        ("amount", minor(deposit.amount)),
        ("channel", deposit.channel.clone()),
        ("status", request_status_to_string(deposit.status).to_string()),
        ("intent_game_cat_id", intent.map(|i| i.game_cat_id.clone()).unwrap_or_default()),
        ("intent_choice", intent.map(|i| i.choice.to_string()).unwrap_or_default()),
        ("intent_channel", intent.map(|i| i.channel.clone()).unwrap_or_default()),
        ("transaction_id", deposit.transaction_id.clone().unwrap_or_default()),
        ("description", deposit.description.clone().unwrap_or_default()),
        ("created_at_ms", ms(deposit.created_at)),
        ("updated_at_ms", ms(deposit.updated_at)),
    ]
}

pub fn deposit_from_hash(map: &HashMap<String, String>) -> Result<DepositRequest> {
    let bet_intent = match optional(map, "intent_game_cat_id") {
        Some(game_cat_id) => Some(BetIntent {
            game_cat_id: game_cat_id.to_string(),
            choice: parse(map, "intent_choice")?,
            channel: map.get("intent_channel").cloned().unwrap_or_default(),
        }),
        None => None,
    };

    Ok(DepositRequest {
        reference: required(map, "reference")?.to_string(),
        msisdn: msisdn(map, "msisdn")?,
        amount: money(map, "amount")?,
        channel: map.get("channel").cloned().unwrap_or_default(),
        status: mapped(map, "status", request_status_from_string)?,
        bet_intent,
        transaction_id: optional(map, "transaction_id").map(str::to_string),
        description: optional(map, "description").map(str::to_string),
        created_at: timestamp(map, "created_at_ms")?,
        updated_at: timestamp(map, "updated_at_ms")?,
    })
}

pub fn withdrawal_fields(withdrawal: &WithdrawalRequest) -> Fields {
    vec![
        ("reference", withdrawal.reference.clone()),
        ("kind", withdrawal.kind.as_str().to_string()),
        ("msisdn", withdrawal.msisdn.to_string()),
        ("amount", minor(withdrawal.amount)),
        ("channel", withdrawal.channel.clone()),
        ("transaction_id", withdrawal.transaction_id.clone().unwrap_or_default()),
        ("status", request_status_to_string(withdrawal.status).to_string()),
        ("description", withdrawal.description.clone().unwrap_or_default()),
        ("created_at_ms", ms(withdrawal.created_at)),
        ("updated_at_ms", ms(withdrawal.updated_at)),
    ]
}

pub fn withdrawal_from_hash(map: &HashMap<String, String>) -> Result<WithdrawalRequest> {
    Ok(WithdrawalRequest {
        reference: required(map, "reference")?.to_string(),
        kind: mapped(map, "kind", withdrawal_kind_from_string)?,
        msisdn: msisdn(map, "msisdn")?,
        amount: money(map, "amount")?,
        channel: map.get("channel").cloned().unwrap_or_default(),
        transaction_id: optional(map, "transaction_id").map(str::to_string),
        status: mapped(map, "status", request_status_from_string)?,
        description: optional(map, "description").map(str::to_string),
        created_at: timestamp(map, "created_at_ms")?,
        updated_at: timestamp(map, "updated_at_ms")?,
    })
}

pub fn settlement_fields(event: &SettlementEvent) -> Fields {
    vec![
        ("reference", event.reference.clone()),
        ("kind", event.kind.as_str().to_string()),
        ("status", callback_status_to_string(event.status).to_string()),
        ("description", event.description.clone().unwrap_or_default()),
        ("transaction_id", event.transaction_id.clone().unwrap_or_default()),
        ("received_at_ms", ms(event.received_at)),
        ("processed", if event.processed { "1" } else { "0" }.to_string()),
    ]
}

pub fn settlement_from_hash(map: &HashMap<String, String>) -> Result<SettlementEvent> {
    Ok(SettlementEvent {
        reference: required(map, "reference")?.to_string(),
        kind: mapped(map, "kind", settlement_kind_from_string)?,
        status: mapped(map, "status", callback_status_from_string)?,
        description: optional(map, "description").map(str::to_string),
        transaction_id: optional(map, "transaction_id").map(str::to_string),
        received_at: timestamp(map, "received_at_ms")?,
        processed: optional(map, "processed") == Some("1"),
    })
}

pub fn failed_deposit_fields(notice: &FailedDepositNotice) -> Fields {
    vec![
        ("reference", notice.reference.clone()),
        ("msisdn", notice.msisdn.to_string()),
        ("amount", minor(notice.amount)),
        ("description", notice.description.clone()),
        ("recorded_at_ms", ms(notice.recorded_at)),
    ]
}

pub fn failed_deposit_from_hash(map: &HashMap<String, String>) -> Result<FailedDepositNotice> {
    Ok(FailedDepositNotice {
        reference: required(map, "reference")?.to_string(),
        msisdn: msisdn(map, "msisdn")?,
        amount: money(map, "amount")?,
        description: map.get("description").cloned().unwrap_or_default(),
        recorded_at: timestamp(map, "recorded_at_ms")?,
    })
}

pub fn code_fields(code: &VerificationCode) -> Fields {
    vec![
        ("msisdn", code.msisdn.to_string()),
        ("code", code.code.clone()),
        ("created_at_ms", ms(code.created_at)),
        ("expires_at_ms", ms(code.expires_at)),
    ]
}

pub fn code_from_hash(map: &HashMap<String, String>) -> Result<VerificationCode> {
    Ok(VerificationCode {
        msisdn: msisdn(map, "msisdn")?,
        code: required(map, "code")?.to_string(),
        created_at: timestamp(map, "created_at_ms")?,
        expires_at: timestamp(map, "expires_at_ms")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BetOutcome, RequestStatus};

    fn to_map(fields: &Fields) -> HashMap<String, String> {
        pairs_to_map(&flatten(fields))
    }

    #[test]
    fn test_account_hash_preserves_optionals() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let mut account = Account::new(Msisdn::parse("254700000001").unwrap(), now);
        account.balance = Money::from_minor(12_345);

        let decoded = account_from_hash(&to_map(&account_fields(&account))).unwrap();
        assert_eq!(decoded, account);
        assert!(decoded.self_exclusion_until.is_none());
    }

    #[test]
    fn test_pending_bet_has_empty_settlement_fields() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let bet = BetRecord {
            bet_id: Uuid::new_v4(),
            msisdn: Msisdn::parse("254700000001").unwrap(),
            category: GameCategory::Spin,
            game_cat_id: "spin-1".to_string(),
            amount: Money::from_minor(5_000),
            choice: None,
            channel: "app".to_string(),
            outcome: BetOutcome::Pending,
            payout: Money::ZERO,
            drawn_number: None,
            free_bet: false,
            created_at: now,
            settled_at: None,
        };

        let map = to_map(&bet_fields(&bet));
        assert_eq!(map["settled_at_ms"], "");
        assert_eq!(map["outcome"], "pending");
        assert_eq!(bet_from_hash(&map).unwrap(), bet);
    }

    #[test]
    fn test_deposit_without_intent() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let deposit = DepositRequest {
            reference: "DP_1".to_string(),
            msisdn: Msisdn::parse("254700000001").unwrap(),
            amount: Money::from_minor(10_000),
            channel: "ussd".to_string(),
            status: RequestStatus::Pending,
            bet_intent: None,
            transaction_id: None,
            description: None,
            created_at: now,
            updated_at: now,
        };

        assert_eq!(deposit_from_hash(&to_map(&deposit_fields(&deposit))).unwrap(), deposit);
    }

    #[test]
    fn test_corrupt_hash_is_internal_error() {
        let mut map = HashMap::new();
        map.insert("msisdn".to_string(), "254700000001".to_string());
        map.insert("balance".to_string(), "not-a-number".to_string());

        let err = account_from_hash(&map).unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
    }
}
