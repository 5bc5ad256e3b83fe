/// Shared constants for the lucky-number betting backend
///
/// Centralizes the game rules and protocol literals that the backend and its
/// tests must agree on.

/// Lowest lucky number a player may pick
pub const MIN_LUCKY_NUMBER: u8 = 1;

/// Highest lucky number a player may pick
pub const MAX_LUCKY_NUMBER: u8 = 7;

/// Minor currency units per major unit (cents per shilling)
pub const MINOR_UNITS_PER_MAJOR: u64 = 100;

/// Number of digits in a verification code
pub const OTP_DIGITS: u32 = 4;

/// Default lifetime of a verification code in seconds
pub const OTP_TTL_SECS: i64 = 120;

/// Default deadline around the validation fan-out
pub const DEFAULT_VALIDATION_TIMEOUT_MS: u64 = 5_000;

/// Reference prefix used by the payment aggregator for disbursements
pub const AGGREGATOR_REFERENCE_PREFIX: &str = "AV_";

/// Reference prefix for deposits initiated by this service
pub const DEPOSIT_REFERENCE_PREFIX: &str = "DP_";

/// Deposit failure descriptions that mean the customer abandoned the prompt.
/// These get a failed-deposit notice in addition to the status update.
pub const CUSTOMER_CANCELLED_DESCRIPTIONS: [&str; 2] =
    ["CUSTOMER_CANCELED_PIN", "CUSTOMER_CONF_FAILED"];

/// Default number of bets returned by history queries
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Maximum number of bets returned by history queries
pub const MAX_HISTORY_LIMIT: usize = 100;
