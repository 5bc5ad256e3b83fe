//! One-time verification codes
//!
//! One live code per number; issuing again replaces it. A code can be tried
//! any number of times until it expires, and is consumed by the first
//! successful verification.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use shared::{Msisdn, OTP_DIGITS};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::OtpConfig;
use crate::domain::VerificationCode;
use crate::errors::{AppError, OtpError, Result};
use crate::gateway::SmsSender;
use crate::repository::VerificationStore;

#[derive(Clone)]
pub struct OtpGate {
    codes: Arc<dyn VerificationStore>,
    sms: Arc<dyn SmsSender>,
    ttl: Duration,
    fixed_codes: Arc<HashMap<Msisdn, String>>,
}

impl OtpGate {
    pub fn new(codes: Arc<dyn VerificationStore>, sms: Arc<dyn SmsSender>, config: &OtpConfig) -> Self {
        Self {
            codes,
            sms,
            ttl: Duration::seconds(config.ttl_secs.max(1)),
            fixed_codes: Arc::new(config.fixed_codes.clone()),
        }
    }

    /// Issue a fresh code and text it to the number
    pub async fn issue(&self, msisdn: &Msisdn) -> Result<VerificationCode> {
        let now = Utc::now();
        let code = VerificationCode {
            msisdn: msisdn.clone(),
            code: self.next_code(msisdn),
            created_at: now,
            expires_at: now + self.ttl,
        };
        self.codes.store_code(&code).await?;

        let message = format!(
            "Your verification code is {}. It expires in {} minutes.",
            code.code,
            (self.ttl.num_seconds() + 59) / 60
        );
        self.sms
            .send_sms(msisdn, &message)
            .await
            .map_err(|e| AppError::Internal(e.context("sending verification code")))?;

        tracing::info!(msisdn = %msisdn, expires_at = %code.expires_at, "Verification code issued");
        metrics::counter!("otp_issued_total").increment(1);
        Ok(code)
    }

    /// Check and consume a code; returns the seconds it had left
    pub async fn verify(&self, msisdn: &Msisdn, code: &str) -> Result<i64> {
        self.verify_at(msisdn, code, Utc::now()).await
    }

    pub async fn verify_at(&self, msisdn: &Msisdn, code: &str, now: DateTime<Utc>) -> Result<i64> {
        let stored = self.codes.find_code(msisdn).await?.ok_or(OtpError::Missing)?;

        if now > stored.expires_at {
            metrics::counter!("otp_rejected_total", "reason" => "expired").increment(1);
            return Err(OtpError::Expired.into());
        }
        if stored.code != code.trim() {
            metrics::counter!("otp_rejected_total", "reason" => "invalid").increment(1);
            return Err(OtpError::Invalid.into());
        }

        // Two racing verifications: only one deletes the code
        if !self.codes.consume_code(msisdn, &stored.code).await? {
            return Err(OtpError::Missing.into());
        }

        tracing::info!(msisdn = %msisdn, "Verification code accepted");
        Ok((stored.expires_at - now).num_seconds().max(1))
    }

    fn next_code(&self, msisdn: &Msisdn) -> String {
        if let Some(code) = self.fixed_codes.get(msisdn) {
            return code.clone();
        }
        let upper = 10u32.pow(OTP_DIGITS);
        format!("{:0width$}", rand::thread_rng().gen_range(0..upper), width = OTP_DIGITS as usize)
    }
}
