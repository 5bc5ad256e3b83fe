use anyhow::Context;
use serde::Deserialize;
use shared::{Msisdn, DEFAULT_VALIDATION_TIMEOUT_MS, OTP_DIGITS, OTP_TTL_SECS};
use std::collections::HashMap;
use std::env;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api_port: u16,
    pub metrics_port: u16,
    pub store: StoreConfig,
    pub betting: BettingConfig,
    pub settlement: SettlementConfig,
    pub otp: OtpConfig,
    pub jobs: JobConfig,
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            other => anyhow::bail!("unknown STORE_BACKEND '{}'", other),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub redis_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BettingConfig {
    /// Deadline for the concurrent validation reads
    pub validation_timeout: Duration,
    /// Load the default game catalog at startup
    pub seed_games: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettlementConfig {
    /// Callers allowed to reach the callback endpoints; empty rejects everyone
    pub allowed_callers: Vec<IpAddr>,
    /// How long a claimed settlement reference stays locked if the holder dies
    pub guard_lease: Duration,
    pub withdrawal_reference_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtpConfig {
    pub ttl_secs: i64,
    /// Pinned codes for test numbers
    pub fixed_codes: HashMap<Msisdn, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub max_retries: u32,
    pub retry_initial_interval: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Unset means requests are logged and not sent anywhere
    pub base_url: Option<String>,
    pub api_key: String,
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_port: 3001,
            metrics_port: 9090,
            store: StoreConfig {
                backend: StoreBackend::Redis,
                redis_url: "redis://localhost:6379".to_string(),
            },
            betting: BettingConfig {
                validation_timeout: Duration::from_millis(DEFAULT_VALIDATION_TIMEOUT_MS),
                seed_games: true,
            },
            settlement: SettlementConfig {
                allowed_callers: Vec::new(),
                guard_lease: Duration::from_secs(30),
                withdrawal_reference_prefix: shared::AGGREGATOR_REFERENCE_PREFIX.to_string(),
            },
            otp: OtpConfig {
                ttl_secs: OTP_TTL_SECS,
                fixed_codes: HashMap::new(),
            },
            jobs: JobConfig {
                workers: 4,
                queue_capacity: 1024,
                max_retries: 3,
                retry_initial_interval: Duration::from_millis(200),
            },
            gateway: GatewayConfig {
                base_url: None,
                api_key: String::new(),
                request_timeout: Duration::from_secs(10),
            },
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        Ok(Config {
            api_port: env_or("API_PORT", defaults.api_port)?,
            metrics_port: env_or("METRICS_PORT", defaults.metrics_port)?,
            store: StoreConfig {
                backend: env_or("STORE_BACKEND", defaults.store.backend)?,
                redis_url: env::var("REDIS_URL").unwrap_or(defaults.store.redis_url),
            },
            betting: BettingConfig {
                validation_timeout: Duration::from_millis(env_or(
                    "VALIDATION_TIMEOUT_MS",
                    DEFAULT_VALIDATION_TIMEOUT_MS,
                )?),
                seed_games: env_or("SEED_GAMES", defaults.betting.seed_games)?,
            },
            settlement: SettlementConfig {
                allowed_callers: match env::var("WEBHOOK_ALLOWED_IPS") {
                    Ok(raw) => parse_allowed_callers(&raw)?,
                    Err(_) => defaults.settlement.allowed_callers,
                },
                guard_lease: Duration::from_secs(env_or("GUARD_LEASE_SECONDS", 30u64)?),
                withdrawal_reference_prefix: env::var("WITHDRAWAL_REFERENCE_PREFIX")
                    .unwrap_or(defaults.settlement.withdrawal_reference_prefix),
            },
            otp: OtpConfig {
                ttl_secs: env_or("OTP_TTL_SECONDS", defaults.otp.ttl_secs)?,
                fixed_codes: match env::var("OTP_FIXED_CODES") {
                    Ok(raw) => parse_fixed_codes(&raw)?,
                    Err(_) => defaults.otp.fixed_codes,
                },
            },
            jobs: JobConfig {
                workers: env_or("JOB_WORKERS", defaults.jobs.workers)?,
                queue_capacity: env_or("JOB_QUEUE_CAPACITY", defaults.jobs.queue_capacity)?,
                max_retries: env_or("JOB_MAX_RETRIES", defaults.jobs.max_retries)?,
                retry_initial_interval: Duration::from_millis(env_or(
                    "JOB_RETRY_INITIAL_MS",
                    200u64,
                )?),
            },
            gateway: GatewayConfig {
                base_url: env::var("GATEWAY_BASE_URL").ok().filter(|url| !url.is_empty()),
                api_key: env::var("GATEWAY_API_KEY").unwrap_or_default(),
                request_timeout: Duration::from_secs(env_or("GATEWAY_TIMEOUT_SECONDS", 10u64)?),
            },
        })
    }
}

fn env_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {}: {}", name, e)),
        Err(_) => Ok(default),
    }
}

/// Comma-separated IP list, e.g. `196.201.214.200, 196.201.214.206`
pub fn parse_allowed_callers(raw: &str) -> anyhow::Result<Vec<IpAddr>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse()
                .with_context(|| format!("invalid address in WEBHOOK_ALLOWED_IPS: {}", entry))
        })
        .collect()
}

/// Comma-separated `msisdn=code` pairs
pub fn parse_fixed_codes(raw: &str) -> anyhow::Result<HashMap<Msisdn, String>> {
    let mut codes = HashMap::new();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (msisdn, code) = entry
            .split_once('=')
            .with_context(|| format!("expected msisdn=code, got '{}'", entry))?;
        let msisdn = Msisdn::parse(msisdn)?;
        let code = code.trim();

        if code.len() != OTP_DIGITS as usize || !code.chars().all(|c| c.is_ascii_digit()) {
            anyhow::bail!("fixed OTP for {} must be {} digits", msisdn, OTP_DIGITS);
        }
        codes.insert(msisdn, code.to_string());
    }

    Ok(codes)
}
