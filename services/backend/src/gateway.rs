//! Outbound collaborators: payment gateway, SMS and the spin game provider
//!
//! All three sit behind traits. `HttpGateway` talks to the provider over
//! JSON; `LoggingGateway` only records what would have been sent and is used
//! when no gateway URL is configured.
//!
//! Payment calls report a [`GatewayError`] that tells a definite refusal from
//! a call whose outcome is unknown (timeout, dropped connection, 5xx). Only
//! the first may be rolled back locally; the second waits for the callback.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use shared::Msisdn;
use std::time::Duration;

use crate::domain::{BetRecord, DepositRequest, WithdrawalKind, WithdrawalRequest};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The provider answered and refused; nothing was started
    #[error("request declined: {0}")]
    Declined(String),

    /// The request may or may not have reached the provider
    #[error("outcome unknown: {0}")]
    Unknown(anyhow::Error),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if status.is_client_error() && status != StatusCode::REQUEST_TIMEOUT => {
                GatewayError::Declined(status.to_string())
            }
            _ => GatewayError::Unknown(err.into()),
        }
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Ask the provider to collect a deposit; settlement arrives by callback
    async fn request_deposit(&self, deposit: &DepositRequest) -> std::result::Result<(), GatewayError>;

    /// Ask the provider to disburse; returns the provider transaction id if
    /// one is issued synchronously
    async fn request_withdrawal(
        &self,
        withdrawal: &WithdrawalRequest,
    ) -> std::result::Result<Option<String>, GatewayError>;
}

#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send_sms(&self, msisdn: &Msisdn, message: &str) -> Result<()>;
}

#[async_trait]
pub trait GameProvider: Send + Sync {
    /// Start a spin round; the result comes back through the game callback
    async fn start_spin(&self, bet: &BetRecord, mode: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct CollectRequest<'a> {
    reference: &'a str,
    msisdn: &'a str,
    amount: shared::Money,
    channel: &'a str,
}

#[derive(Debug, Serialize)]
struct DisburseRequest<'a> {
    reference: &'a str,
    msisdn: &'a str,
    amount: shared::Money,
    channel: &'a str,
    b2b: bool,
}

#[derive(Debug, Deserialize)]
struct DisburseResponse {
    #[serde(default)]
    transaction_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct SmsRequest<'a> {
    msisdn: &'a str,
    message: &'a str,
}

#[derive(Debug, Serialize)]
struct SpinStartRequest<'a> {
    reference: String,
    msisdn: &'a str,
    game_cat_id: &'a str,
    amount: shared::Money,
    mode: &'a str,
}

/// JSON client for the payment, SMS and game provider endpoints
pub struct HttpGateway {
    http: Client,
    base_url: String,
    api_key: String,
}

impl HttpGateway {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> std::result::Result<reqwest::Response, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(url = %url, "Calling gateway");

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?
            .error_for_status()?;

        Ok(response)
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn request_deposit(&self, deposit: &DepositRequest) -> std::result::Result<(), GatewayError> {
        self.post(
            "/payments/collect",
            &CollectRequest {
                reference: &deposit.reference,
                msisdn: deposit.msisdn.as_str(),
                amount: deposit.amount,
                channel: &deposit.channel,
            },
        )
        .await?;
        Ok(())
    }

    async fn request_withdrawal(
        &self,
        withdrawal: &WithdrawalRequest,
    ) -> std::result::Result<Option<String>, GatewayError> {
        let response: DisburseResponse = self
            .post(
                "/payments/disburse",
                &DisburseRequest {
                    reference: &withdrawal.reference,
                    msisdn: withdrawal.msisdn.as_str(),
                    amount: withdrawal.amount,
                    channel: &withdrawal.channel,
                    b2b: withdrawal.kind == WithdrawalKind::B2b,
                },
            )
            .await?
            .json()
            .await?;

        Ok(response.transaction_id.filter(|id| !id.is_empty()))
    }
}

#[async_trait]
impl SmsSender for HttpGateway {
    async fn send_sms(&self, msisdn: &Msisdn, message: &str) -> Result<()> {
        self.post(
            "/sms/send",
            &SmsRequest {
                msisdn: msisdn.as_str(),
                message,
            },
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl GameProvider for HttpGateway {
    async fn start_spin(&self, bet: &BetRecord, mode: &str) -> Result<()> {
        self.post(
            "/games/spin",
            &SpinStartRequest {
                reference: bet.bet_id.to_string(),
                msisdn: bet.msisdn.as_str(),
                game_cat_id: &bet.game_cat_id,
                amount: bet.amount,
                mode,
            },
        )
        .await?;
        Ok(())
    }
}

/// Logs outbound calls instead of sending them
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingGateway;

#[async_trait]
impl PaymentGateway for LoggingGateway {
    async fn request_deposit(&self, deposit: &DepositRequest) -> std::result::Result<(), GatewayError> {
        tracing::info!(
            reference = %deposit.reference,
            msisdn = %deposit.msisdn,
            amount = %deposit.amount,
            "Deposit collection requested (not sent)"
        );
        Ok(())
    }

    async fn request_withdrawal(
        &self,
        withdrawal: &WithdrawalRequest,
    ) -> std::result::Result<Option<String>, GatewayError> {
        tracing::info!(
            reference = %withdrawal.reference,
            msisdn = %withdrawal.msisdn,
            amount = %withdrawal.amount,
            kind = withdrawal.kind.as_str(),
            "Withdrawal disbursement requested (not sent)"
        );
        Ok(None)
    }
}

#[async_trait]
impl SmsSender for LoggingGateway {
    async fn send_sms(&self, msisdn: &Msisdn, message: &str) -> Result<()> {
        tracing::info!(msisdn = %msisdn, message, "SMS (not sent)");
        Ok(())
    }
}

#[async_trait]
impl GameProvider for LoggingGateway {
    async fn start_spin(&self, bet: &BetRecord, mode: &str) -> Result<()> {
        tracing::info!(bet_id = %bet.bet_id, mode, "Spin start requested (not sent)");
        Ok(())
    }
}
