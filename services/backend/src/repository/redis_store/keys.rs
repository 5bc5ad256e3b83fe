//! Redis key generation functions
//!
//! Centralizes all Redis key patterns. The scripts that derive an account key
//! from a stored msisdn rely on the `account:` prefix staying as it is, and
//! account deletion rebuilds session keys from the `session:` prefix.

use shared::Msisdn;
use uuid::Uuid;

use crate::domain::{GameKey, SettlementKind, WithdrawalKind};

const ACCOUNT_KEY_PREFIX: &str = "account:";
const GAME_KEY_PREFIX: &str = "game:";
const BET_KEY_PREFIX: &str = "bet:";
const USER_INDEX_PREFIX: &str = "bets:user:";
const DEPOSIT_KEY_PREFIX: &str = "deposit:";
const FAILED_DEPOSIT_KEY_PREFIX: &str = "deposits:failed:";
const WITHDRAWAL_KEY_PREFIX: &str = "withdrawal:";
const SETTLEMENT_KEY_PREFIX: &str = "settlement:";
const GUARD_KEY_PREFIX: &str = "settlement:guard:";
const OTP_KEY_PREFIX: &str = "otp:";
const SESSION_KEY_PREFIX: &str = "session:";
const USER_SESSIONS_PREFIX: &str = "sessions:user:";

pub fn account_key(msisdn: &Msisdn) -> String {
    format!("{}{}", ACCOUNT_KEY_PREFIX, msisdn)
}

pub fn game_key(key: &GameKey) -> String {
    format!("{}{}:{}", GAME_KEY_PREFIX, key.category.as_str(), key.game_cat_id)
}

pub fn bet_key(bet_id: Uuid) -> String {
    format!("{}{}", BET_KEY_PREFIX, bet_id)
}

pub fn user_index_key(msisdn: &Msisdn) -> String {
    format!("{}{}", USER_INDEX_PREFIX, msisdn)
}

pub fn deposit_key(reference: &str) -> String {
    format!("{}{}", DEPOSIT_KEY_PREFIX, reference)
}

pub fn failed_deposit_key(reference: &str) -> String {
    format!("{}{}", FAILED_DEPOSIT_KEY_PREFIX, reference)
}

pub fn withdrawal_key(kind: WithdrawalKind, reference: &str) -> String {
    format!("{}{}:{}", WITHDRAWAL_KEY_PREFIX, kind.as_str(), reference)
}

pub fn settlement_key(kind: SettlementKind, reference: &str) -> String {
    format!("{}{}:{}", SETTLEMENT_KEY_PREFIX, kind.as_str(), reference)
}

pub fn guard_key(key: &str) -> String {
    format!("{}{}", GUARD_KEY_PREFIX, key)
}

pub fn otp_key(msisdn: &Msisdn) -> String {
    format!("{}{}", OTP_KEY_PREFIX, msisdn)
}

pub fn session_key(token: &str) -> String {
    format!("{}{}", SESSION_KEY_PREFIX, token)
}

pub fn user_sessions_key(msisdn: &Msisdn) -> String {
    format!("{}{}", USER_SESSIONS_PREFIX, msisdn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::GameCategory;

    #[test]
    fn test_account_key_format() {
        let msisdn = Msisdn::parse("+254700000001").unwrap();
        assert_eq!(account_key(&msisdn), "account:254700000001");
        assert_eq!(user_index_key(&msisdn), "bets:user:254700000001");
        assert_eq!(user_sessions_key(&msisdn), "sessions:user:254700000001");
        assert_eq!(session_key("abc"), "session:abc");
    }

    #[test]
    fn test_bet_key_format() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(bet_key(id), "bet:550e8400-e29b-41d4-a716-446655440000");
    }

    #[test]
    fn test_namespaced_keys() {
        assert_eq!(
            game_key(&GameKey::new(GameCategory::LuckyNumber, "7")),
            "game:lucky_number:7"
        );
        assert_eq!(withdrawal_key(WithdrawalKind::B2b, "B2B_1"), "withdrawal:b2b:B2B_1");
        assert_eq!(
            settlement_key(SettlementKind::Deposit, "DP_1"),
            "settlement:deposit:DP_1"
        );
        assert_eq!(guard_key("deposit:DP_1"), "settlement:guard:deposit:DP_1");
    }
}
