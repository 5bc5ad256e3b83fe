use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use shared::{Envelope, Money, Msisdn};
use std::fmt;
use uuid::Uuid;
use validator::Validate;

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub msisdn: Msisdn,
    pub balance: Money,
    pub free_bet_count: u32,
    pub free_bet_expiry: Option<DateTime<Utc>>,
    pub status: AccountStatus,
    pub self_exclusion_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Fresh account created on first contact
    pub fn new(msisdn: Msisdn, now: DateTime<Utc>) -> Self {
        Self {
            msisdn,
            balance: Money::ZERO,
            free_bet_count: 0,
            free_bet_expiry: None,
            status: AccountStatus::Active,
            self_exclusion_until: None,
            created_at: now,
        }
    }

    pub fn is_self_excluded(&self, now: DateTime<Utc>) -> bool {
        self.self_exclusion_until.is_some_and(|until| until > now)
    }

    /// Free bets usable right now; an expired grant counts as zero
    pub fn available_free_bets(&self, now: DateTime<Utc>) -> u32 {
        match self.free_bet_expiry {
            Some(expiry) if expiry < now => 0,
            _ => self.free_bet_count,
        }
    }
}

// ---------------------------------------------------------------------------
// Games
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GameCategory {
    LuckyNumber,
    Spin,
}

impl GameCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameCategory::LuckyNumber => "lucky_number",
            GameCategory::Spin => "spin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lucky_number" => Some(GameCategory::LuckyNumber),
            "spin" => Some(GameCategory::Spin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct GameKey {
    pub category: GameCategory,
    pub game_cat_id: String,
}

impl GameKey {
    pub fn new(category: GameCategory, game_cat_id: impl Into<String>) -> Self {
        Self {
            category,
            game_cat_id: game_cat_id.into(),
        }
    }
}

impl fmt::Display for GameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category.as_str(), self.game_cat_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameConfig {
    pub category: GameCategory,
    pub game_cat_id: String,
    pub name: String,
    /// Stake a bet must match exactly
    pub bet_amount: Money,
    /// Winning bets are paid `bet_amount * payout_multiplier`
    pub payout_multiplier: u64,
    /// Return-to-player ceiling in percent, enforced by the game provider
    pub rtp_limit: u8,
    pub active: bool,
}

impl GameConfig {
    pub fn key(&self) -> GameKey {
        GameKey::new(self.category, self.game_cat_id.clone())
    }
}

// ---------------------------------------------------------------------------
// Bets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BetOutcome {
    Won,
    Lost,
    Pending,
}

impl BetOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BetOutcome::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BetRecord {
    pub bet_id: Uuid,
    pub msisdn: Msisdn,
    pub category: GameCategory,
    pub game_cat_id: String,
    pub amount: Money,
    pub choice: Option<u8>,
    pub channel: String,
    pub outcome: BetOutcome,
    pub payout: Money,
    pub drawn_number: Option<u8>,
    pub free_bet: bool,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PlaceBetRequest {
    pub amount: Money,
    /// Kept wide so an out-of-range pick is a game rejection, not a parse error
    pub choice: i64,
    #[validate(length(min = 1, max = 32))]
    pub game_cat_id: String,
    #[validate(length(min = 1, max = 32))]
    pub channel: String,
    #[serde(default)]
    pub ussd: bool,
    #[serde(default)]
    pub use_free_bet: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SpinRequest {
    pub amount: Money,
    #[validate(length(min = 1, max = 32))]
    pub game_cat_id: String,
    #[validate(length(min = 1, max = 32))]
    pub channel: String,
    #[validate(length(min = 1, max = 32))]
    pub mode: String,
}

// ---------------------------------------------------------------------------
// Deposits and withdrawals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Succeeded,
    Failed,
}

/// Bet to play once a deposit lands
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BetIntent {
    pub game_cat_id: String,
    pub choice: i64,
    pub channel: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DepositRequest {
    pub reference: String,
    pub msisdn: Msisdn,
    pub amount: Money,
    pub channel: String,
    pub status: RequestStatus,
    pub bet_intent: Option<BetIntent>,
    pub transaction_id: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct InitiateDepositRequest {
    pub amount: Money,
    #[validate(length(min = 1, max = 32))]
    pub channel: String,
    pub game_cat_id: Option<String>,
    pub choice: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalKind {
    Mobile,
    B2b,
}

impl WithdrawalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalKind::Mobile => "mobile",
            WithdrawalKind::B2b => "b2b",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WithdrawalRequest {
    pub reference: String,
    pub kind: WithdrawalKind,
    pub msisdn: Msisdn,
    pub amount: Money,
    pub channel: String,
    pub transaction_id: Option<String>,
    pub status: RequestStatus,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct InitiateWithdrawalRequest {
    pub amount: Money,
    #[validate(length(min = 1, max = 32))]
    pub channel: String,
    #[serde(default)]
    pub b2b: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailedDepositNotice {
    pub reference: String,
    pub msisdn: Msisdn,
    pub amount: Money,
    pub description: String,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Settlement callbacks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SettlementKind {
    Deposit,
    Withdrawal,
    B2bWithdrawal,
    GameCallback,
}

impl SettlementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementKind::Deposit => "deposit",
            SettlementKind::Withdrawal => "withdrawal",
            SettlementKind::B2bWithdrawal => "b2b_withdrawal",
            SettlementKind::GameCallback => "game_callback",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallbackStatus {
    Success,
    Failure,
    Pending,
}

impl CallbackStatus {
    /// Provider status text: `"0"` or any casing of `"success"` means success
    pub fn classify(raw: &str) -> Self {
        let raw = raw.trim();
        if raw == "0" || raw.eq_ignore_ascii_case("success") {
            CallbackStatus::Success
        } else if raw.eq_ignore_ascii_case("pending") {
            CallbackStatus::Pending
        } else {
            CallbackStatus::Failure
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SettlementEvent {
    pub reference: String,
    pub kind: SettlementKind,
    pub status: CallbackStatus,
    pub description: Option<String>,
    pub transaction_id: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed: bool,
}

/// Provider status fields arrive as strings or bare numbers
fn deserialize_status_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!("invalid status: {}", other))),
    }
}

/// Same as status text, but optional and tolerant of numeric ids
fn deserialize_optional_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) if s.is_empty() => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(de::Error::custom(format!("invalid text field: {}", other))),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DepositCallback {
    #[serde(deserialize_with = "deserialize_status_text")]
    pub status: String,
    #[serde(default)]
    pub description: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub reference: String,
    #[serde(default, deserialize_with = "deserialize_optional_text")]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub amount: Option<Money>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WithdrawalCallback {
    #[validate(length(min = 1, max = 64))]
    pub reference: String,
    #[serde(default, deserialize_with = "deserialize_optional_text")]
    pub transaction_id: Option<String>,
    #[serde(deserialize_with = "deserialize_status_text")]
    pub status: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GameCallbackOutcome {
    #[serde(alias = "win", alias = "WIN", alias = "Won", alias = "Win")]
    Won,
    #[serde(alias = "loss", alias = "LOSS", alias = "Lost", alias = "Loss")]
    Lost,
}

impl From<GameCallbackOutcome> for BetOutcome {
    fn from(outcome: GameCallbackOutcome) -> Self {
        match outcome {
            GameCallbackOutcome::Won => BetOutcome::Won,
            GameCallbackOutcome::Lost => BetOutcome::Lost,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GameCallback {
    /// Bet id of the pending spin
    pub reference: Uuid,
    pub outcome: GameCallbackOutcome,
    #[serde(default)]
    pub payout: Money,
    #[serde(default)]
    #[validate(range(min = 1, max = 7))]
    pub drawn_number: Option<u8>,
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationCode {
    pub msisdn: Msisdn,
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OtpRequest {
    #[validate(length(min = 9, max = 15))]
    pub msisdn: String,
}

/// `msisdn` is required before login; the deletion confirmation sends only `otp`
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct VerifyOtpRequest {
    #[serde(default)]
    pub msisdn: Option<String>,
    #[validate(length(min = 1, max = 8))]
    pub otp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SelfExclusionRequest {
    #[validate(range(min = 1, max = 3650))]
    pub days: u32,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameResults {
    #[serde(rename = "BetId")]
    pub bet_id: Uuid,
    #[serde(rename = "Outcome")]
    pub outcome: BetOutcome,
    #[serde(rename = "DrawnNumber")]
    pub drawn_number: Option<u8>,
    #[serde(rename = "Payout")]
    pub payout: Money,
    #[serde(rename = "Balance")]
    pub balance: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceBetResponse {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(rename = "FreeBet")]
    pub free_bet: u32,
    #[serde(rename = "GameResults")]
    pub game_results: GameResults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositResponse {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(rename = "FreeBet")]
    pub free_bet: u32,
    #[serde(rename = "Reference")]
    pub reference: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpinResponse {
    #[serde(flatten)]
    pub envelope: Envelope,
    /// Bet id the game callback will settle
    #[serde(rename = "Reference")]
    pub reference: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalResponse {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(rename = "Reference")]
    pub reference: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(rename = "Token")]
    pub token: String,
    #[serde(rename = "ExpireIn")]
    pub expire_in: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetHistoryResponse {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(rename = "Bets")]
    pub bets: Vec<BetRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSummary {
    pub account: Account,
    pub free_bets_available: u32,
    pub recent_bets: Vec<BetRecord>,
    /// Names of the reads that failed; the summary is served without them
    pub degraded: Vec<String>,
}
