//! Redis Lua scripts for atomic operations
//!
//! Every balance mutation is one script so the precondition check and the
//! write happen without interleaving. Balances are integer minor units and
//! only ever changed with HINCRBY.
//!
//! Transition scripts share one reply shape, a flat array:
//! - `{'applied', field1, value1, ...}` with the account hash after the write
//! - `{'insufficient', balance}`
//! - `{'no_free_bet'}`
//! - `{'duplicate'}`
//! - `{'not_found'}`
//!
//! Accounts carry a `pending_withdrawals` counter next to the balance so
//! deletion can refuse while a disbursement is outstanding.

/// Create the account hash if it does not exist yet
///
/// Keys: [account_key]
/// Args: [field1, value1, ...]
///
/// Returns: account hash as a flat field/value array
pub const GET_OR_CREATE_ACCOUNT_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    redis.call('HSET', KEYS[1], unpack(ARGV))
end
return redis.call('HGETALL', KEYS[1])
"#;

/// Move the self-exclusion end date later, never earlier
///
/// Keys: [account_key]
/// Args: [until_ms]
///
/// Returns: account hash after the update, or an empty array when missing
pub const EXTEND_SELF_EXCLUSION_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return {}
end
local current = redis.call('HGET', KEYS[1], 'self_exclusion_until_ms')
if not current or current == '' or tonumber(current) < tonumber(ARGV[1]) then
    redis.call('HSET', KEYS[1], 'self_exclusion_until_ms', ARGV[1])
end
return redis.call('HGETALL', KEYS[1])
"#;

/// Keys: [account_key]
/// Args: [count, expires_at_ms]
///
/// Returns: account hash after the grant, or an empty array when missing
pub const GRANT_FREE_BETS_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return {}
end
redis.call('HINCRBY', KEYS[1], 'free_bet_count', ARGV[1])
redis.call('HSET', KEYS[1], 'free_bet_expiry_ms', ARGV[2])
return redis.call('HGETALL', KEYS[1])
"#;

/// Debit the stake or consume a free bet, credit the payout, store the bet
///
/// Keys: [account_key, bet_key, user_index_key]
/// Args: [stake, payout, free_bet, now_ms, bet_id, created_at_ms, field1, value1, ...]
pub const PLACE_BET_SCRIPT: &str = r#"
local account = KEYS[1]
if redis.call('EXISTS', account) == 0 then
    return {'not_found'}
end
if redis.call('EXISTS', KEYS[2]) == 1 then
    return {'duplicate'}
end

local stake = tonumber(ARGV[1])
local payout = tonumber(ARGV[2])
local now_ms = tonumber(ARGV[4])

if ARGV[3] == '1' then
    local count = tonumber(redis.call('HGET', account, 'free_bet_count') or '0')
    local expiry = redis.call('HGET', account, 'free_bet_expiry_ms')
    if count <= 0 or (expiry and expiry ~= '' and tonumber(expiry) < now_ms) then
        return {'no_free_bet'}
    end
    redis.call('HINCRBY', account, 'free_bet_count', -1)
else
    local balance = redis.call('HGET', account, 'balance') or '0'
    if tonumber(balance) < stake then
        return {'insufficient', balance}
    end
    if stake > 0 then
        redis.call('HINCRBY', account, 'balance', '-' .. ARGV[1])
    end
end

if payout > 0 then
    redis.call('HINCRBY', account, 'balance', ARGV[2])
end

redis.call('HSET', KEYS[2], unpack(ARGV, 7))
redis.call('ZADD', KEYS[3], ARGV[6], ARGV[5])

local reply = redis.call('HGETALL', account)
table.insert(reply, 1, 'applied')
return reply
"#;

/// Finalize a pending bet and credit its payout
///
/// Keys: [bet_key]
/// Args: [payout, outcome, drawn_number, settled_at_ms]
pub const SETTLE_BET_SCRIPT: &str = r#"
local bet = KEYS[1]
if redis.call('HGET', bet, 'outcome') ~= 'pending' then
    return {'not_found'}
end

local account = 'account:' .. redis.call('HGET', bet, 'msisdn')
if redis.call('EXISTS', account) == 0 then
    return {'not_found'}
end

redis.call('HSET', bet,
    'outcome', ARGV[2],
    'payout', ARGV[1],
    'drawn_number', ARGV[3],
    'settled_at_ms', ARGV[4]
)
if tonumber(ARGV[1]) > 0 then
    redis.call('HINCRBY', account, 'balance', ARGV[1])
end

local reply = redis.call('HGETALL', account)
table.insert(reply, 1, 'applied')
return reply
"#;

/// Credit the stored amount of a pending deposit
///
/// Keys: [deposit_key]
/// Args: [transaction_id, now_ms]
pub const CREDIT_DEPOSIT_SCRIPT: &str = r#"
local deposit = KEYS[1]
if redis.call('HGET', deposit, 'status') ~= 'pending' then
    return {'not_found'}
end

local account = 'account:' .. redis.call('HGET', deposit, 'msisdn')
if redis.call('EXISTS', account) == 0 then
    return {'not_found'}
end

local amount = redis.call('HGET', deposit, 'amount')
if tonumber(amount) > 0 then
    redis.call('HINCRBY', account, 'balance', amount)
end
redis.call('HSET', deposit, 'status', 'succeeded', 'updated_at_ms', ARGV[2])
if ARGV[1] ~= '' then
    redis.call('HSET', deposit, 'transaction_id', ARGV[1])
end

local reply = redis.call('HGETALL', account)
table.insert(reply, 1, 'applied')
return reply
"#;

/// Mark a pending deposit failed
///
/// Keys: [deposit_key]
/// Args: [description, now_ms]
pub const FAIL_DEPOSIT_SCRIPT: &str = r#"
local deposit = KEYS[1]
if redis.call('HGET', deposit, 'status') ~= 'pending' then
    return {'not_found'}
end

local account = 'account:' .. redis.call('HGET', deposit, 'msisdn')
if redis.call('EXISTS', account) == 0 then
    return {'not_found'}
end

redis.call('HSET', deposit,
    'status', 'failed',
    'description', ARGV[1],
    'updated_at_ms', ARGV[2]
)

local reply = redis.call('HGETALL', account)
table.insert(reply, 1, 'applied')
return reply
"#;

/// Debit the withdrawal amount and store the pending request
///
/// Keys: [account_key, withdrawal_key]
/// Args: [amount, field1, value1, ...]
pub const HOLD_WITHDRAWAL_SCRIPT: &str = r#"
local account = KEYS[1]
if redis.call('EXISTS', account) == 0 then
    return {'not_found'}
end

local balance = redis.call('HGET', account, 'balance') or '0'
if tonumber(balance) < tonumber(ARGV[1]) then
    return {'insufficient', balance}
end

if tonumber(ARGV[1]) > 0 then
    redis.call('HINCRBY', account, 'balance', '-' .. ARGV[1])
end
redis.call('HSET', KEYS[2], unpack(ARGV, 2))
redis.call('HINCRBY', account, 'pending_withdrawals', 1)

local reply = redis.call('HGETALL', account)
table.insert(reply, 1, 'applied')
return reply
"#;

/// Finalize a pending withdrawal; failure refunds the held amount
///
/// Keys: [withdrawal_key]
/// Args: [transaction_id, succeeded, description, now_ms]
pub const RESOLVE_WITHDRAWAL_SCRIPT: &str = r#"
local withdrawal = KEYS[1]
if redis.call('HGET', withdrawal, 'status') ~= 'pending' then
    return {'not_found'}
end

local stored = redis.call('HGET', withdrawal, 'transaction_id')
if stored and stored ~= '' and ARGV[1] ~= '' and stored ~= ARGV[1] then
    return {'not_found'}
end

local account = 'account:' .. redis.call('HGET', withdrawal, 'msisdn')
if redis.call('EXISTS', account) == 0 then
    return {'not_found'}
end

if ARGV[2] == '1' then
    redis.call('HSET', withdrawal, 'status', 'succeeded')
else
    local amount = redis.call('HGET', withdrawal, 'amount')
    if tonumber(amount) > 0 then
        redis.call('HINCRBY', account, 'balance', amount)
    end
    redis.call('HSET', withdrawal, 'status', 'failed')
end
if ARGV[1] ~= '' then
    redis.call('HSET', withdrawal, 'transaction_id', ARGV[1])
end
redis.call('HSET', withdrawal, 'description', ARGV[3], 'updated_at_ms', ARGV[4])
if tonumber(redis.call('HGET', account, 'pending_withdrawals') or '0') > 0 then
    redis.call('HINCRBY', account, 'pending_withdrawals', -1)
end

local reply = redis.call('HGETALL', account)
table.insert(reply, 1, 'applied')
return reply
"#;

/// Store the provider transaction id on a pending withdrawal that has none
///
/// Keys: [withdrawal_key]
/// Args: [transaction_id]
///
/// Returns: 1 if attached, 0 otherwise
pub const ATTACH_TRANSACTION_SCRIPT: &str = r#"
local withdrawal = KEYS[1]
if redis.call('HGET', withdrawal, 'status') ~= 'pending' then
    return 0
end
local stored = redis.call('HGET', withdrawal, 'transaction_id')
if stored and stored ~= '' then
    return 0
end
redis.call('HSET', withdrawal, 'transaction_id', ARGV[1])
return 1
"#;

/// Claim a settlement reference
///
/// Keys: [guard_key]
/// Args: [lease_ms]
///
/// Returns: 'acquired', 'in_flight' or 'processed'
pub const ACQUIRE_GUARD_SCRIPT: &str = r#"
local state = redis.call('GET', KEYS[1])
if state == 'processed' then
    return 'processed'
end
if state then
    return 'in_flight'
end
redis.call('SET', KEYS[1], 'processing', 'PX', ARGV[1])
return 'acquired'
"#;

/// Drop an unfinished claim; a processed marker is never removed
///
/// Keys: [guard_key]
pub const RELEASE_GUARD_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == 'processing' then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Remove an empty account with its pending code and every live session
///
/// Keys: [account_key, otp_key, user_sessions_key]
///
/// Returns: 'deleted', 'not_found', 'has_balance' or 'withdrawal_pending'
pub const DELETE_ACCOUNT_SCRIPT: &str = r#"
local account = KEYS[1]
if redis.call('EXISTS', account) == 0 then
    return 'not_found'
end
if tonumber(redis.call('HGET', account, 'balance') or '0') > 0 then
    return 'has_balance'
end
if tonumber(redis.call('HGET', account, 'pending_withdrawals') or '0') > 0 then
    return 'withdrawal_pending'
end

local tokens = redis.call('SMEMBERS', KEYS[3])
for _, token in ipairs(tokens) do
    redis.call('DEL', 'session:' .. token)
end
redis.call('DEL', account, KEYS[2], KEYS[3])
return 'deleted'
"#;

/// Store a session token and index it under its owner
///
/// Keys: [session_key, user_sessions_key]
/// Args: [msisdn, token, ttl_secs]
pub const CREATE_SESSION_SCRIPT: &str = r#"
redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[3])
redis.call('SADD', KEYS[2], ARGV[2])
if redis.call('TTL', KEYS[2]) < tonumber(ARGV[3]) then
    redis.call('EXPIRE', KEYS[2], ARGV[3])
end
return 1
"#;

/// Compare-and-delete of a verification code
///
/// Keys: [otp_key]
/// Args: [code]
///
/// Returns: 1 if the code matched and was deleted, 0 otherwise
pub const CONSUME_CODE_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'code') == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;
