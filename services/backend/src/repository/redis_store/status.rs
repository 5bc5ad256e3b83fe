//! Enum serialization for Redis hash fields
//!
//! The Lua scripts compare against these strings directly (`'pending'`,
//! `'succeeded'`, `'failed'`), so they must not drift.

use crate::domain::{
    AccountStatus, BetOutcome, CallbackStatus, RequestStatus, SettlementKind, WithdrawalKind,
};

pub fn outcome_to_string(outcome: BetOutcome) -> &'static str {
    match outcome {
        BetOutcome::Won => "won",
        BetOutcome::Lost => "lost",
        BetOutcome::Pending => "pending",
    }
}

pub fn outcome_from_string(s: &str) -> Option<BetOutcome> {
    match s {
        "won" => Some(BetOutcome::Won),
        "lost" => Some(BetOutcome::Lost),
        "pending" => Some(BetOutcome::Pending),
        _ => None,
    }
}

pub fn request_status_to_string(status: RequestStatus) -> &'static str {
    match status {
        RequestStatus::Pending => "pending",
        RequestStatus::Succeeded => "succeeded",
        RequestStatus::Failed => "failed",
    }
}

pub fn request_status_from_string(s: &str) -> Option<RequestStatus> {
    match s {
        "pending" => Some(RequestStatus::Pending),
        "succeeded" => Some(RequestStatus::Succeeded),
        "failed" => Some(RequestStatus::Failed),
        _ => None,
    }
}

pub fn account_status_to_string(status: AccountStatus) -> &'static str {
    match status {
        AccountStatus::Active => "active",
        AccountStatus::Inactive => "inactive",
    }
}

pub fn account_status_from_string(s: &str) -> Option<AccountStatus> {
    match s {
        "active" => Some(AccountStatus::Active),
        "inactive" => Some(AccountStatus::Inactive),
        _ => None,
    }
}

pub fn callback_status_to_string(status: CallbackStatus) -> &'static str {
    match status {
        CallbackStatus::Success => "success",
        CallbackStatus::Failure => "failure",
        CallbackStatus::Pending => "pending",
    }
}

pub fn callback_status_from_string(s: &str) -> Option<CallbackStatus> {
    match s {
        "success" => Some(CallbackStatus::Success),
        "failure" => Some(CallbackStatus::Failure),
        "pending" => Some(CallbackStatus::Pending),
        _ => None,
    }
}

pub fn withdrawal_kind_from_string(s: &str) -> Option<WithdrawalKind> {
    match s {
        "mobile" => Some(WithdrawalKind::Mobile),
        "b2b" => Some(WithdrawalKind::B2b),
        _ => None,
    }
}

pub fn settlement_kind_from_string(s: &str) -> Option<SettlementKind> {
    match s {
        "deposit" => Some(SettlementKind::Deposit),
        "withdrawal" => Some(SettlementKind::Withdrawal),
        "b2b_withdrawal" => Some(SettlementKind::B2bWithdrawal),
        "game_callback" => Some(SettlementKind::GameCallback),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_strings() {
        for outcome in [BetOutcome::Won, BetOutcome::Lost, BetOutcome::Pending] {
            assert_eq!(outcome_from_string(outcome_to_string(outcome)), Some(outcome));
        }
        assert_eq!(outcome_from_string("settled"), None);
    }

    #[test]
    fn test_request_status_matches_script_literals() {
        assert_eq!(request_status_to_string(RequestStatus::Pending), "pending");
        assert_eq!(request_status_to_string(RequestStatus::Succeeded), "succeeded");
        assert_eq!(request_status_to_string(RequestStatus::Failed), "failed");
    }

    #[test]
    fn test_kinds_parse_from_domain_strings() {
        assert_eq!(
            settlement_kind_from_string(SettlementKind::B2bWithdrawal.as_str()),
            Some(SettlementKind::B2bWithdrawal)
        );
        assert_eq!(
            withdrawal_kind_from_string(WithdrawalKind::B2b.as_str()),
            Some(WithdrawalKind::B2b)
        );
        assert_eq!(callback_status_from_string(""), None);
    }
}
