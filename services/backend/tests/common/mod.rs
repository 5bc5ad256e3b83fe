//! Common test utilities and fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue};
use axum_test::TestServer;
use serde_json::{json, Value};
use shared::{Money, Msisdn};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use backend::config::Config;
use backend::domain::{BetRecord, DepositRequest, GameCategory, GameConfig, WithdrawalRequest};
use backend::gateway::{GameProvider, GatewayError, PaymentGateway, SmsSender};
use backend::jobs::JobSupervisor;
use backend::repository::Stores;
use backend::services::FixedDrawResolver;
use backend::state::{AppState, Collaborators};

pub const ALLOWED_CALLER: &str = "196.201.214.200";
pub const PLAYER: &str = "254700000001";

/// How the payment gateway answers
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum GatewayMode {
    #[default]
    Accept,
    /// Provider refuses the request
    Decline,
    /// Call times out; the provider may still act on it
    TimeOut,
}

impl GatewayMode {
    fn answer(self) -> Result<(), GatewayError> {
        match self {
            GatewayMode::Accept => Ok(()),
            GatewayMode::Decline => Err(GatewayError::Declined("400 Bad Request".to_string())),
            GatewayMode::TimeOut => Err(GatewayError::Unknown(anyhow::anyhow!("operation timed out"))),
        }
    }
}

/// Records every outbound call instead of sending it
#[derive(Default)]
pub struct RecordingGateway {
    pub mode: Mutex<GatewayMode>,
    pub deposits: Mutex<Vec<DepositRequest>>,
    pub withdrawals: Mutex<Vec<WithdrawalRequest>>,
    pub spins: Mutex<Vec<BetRecord>>,
    pub sms: Mutex<Vec<(Msisdn, String)>>,
    /// Transaction id handed back for disbursements
    pub disbursement_id: Mutex<Option<String>>,
}

#[async_trait]
impl PaymentGateway for RecordingGateway {
    async fn request_deposit(&self, deposit: &DepositRequest) -> Result<(), GatewayError> {
        self.deposits.lock().unwrap().push(deposit.clone());
        let mode = *self.mode.lock().unwrap();
        mode.answer()
    }

    async fn request_withdrawal(
        &self,
        withdrawal: &WithdrawalRequest,
    ) -> Result<Option<String>, GatewayError> {
        self.withdrawals.lock().unwrap().push(withdrawal.clone());
        let mode = *self.mode.lock().unwrap();
        mode.answer()?;
        Ok(self.disbursement_id.lock().unwrap().clone())
    }
}

#[async_trait]
impl SmsSender for RecordingGateway {
    async fn send_sms(&self, msisdn: &Msisdn, message: &str) -> anyhow::Result<()> {
        self.sms.lock().unwrap().push((msisdn.clone(), message.to_string()));
        Ok(())
    }
}

#[async_trait]
impl GameProvider for RecordingGateway {
    async fn start_spin(&self, bet: &BetRecord, _mode: &str) -> anyhow::Result<()> {
        self.spins.lock().unwrap().push(bet.clone());
        Ok(())
    }
}

/// Router over the in-memory store with a fixed lucky-number draw
pub struct TestContext {
    pub server: TestServer,
    pub state: AppState,
    pub gateway: Arc<RecordingGateway>,
    pub supervisor: JobSupervisor,
}

impl TestContext {
    pub async fn new(draw: u8) -> Self {
        let mut config = Config::default();
        config.settlement.allowed_callers = vec![ALLOWED_CALLER.parse().unwrap()];
        config.jobs.workers = 2;
        config.jobs.retry_initial_interval = Duration::from_millis(1);

        let stores = Stores::in_memory();
        stores.games.upsert_game(&lucky_game()).await.unwrap();
        stores.games.upsert_game(&spin_game()).await.unwrap();

        let gateway = Arc::new(RecordingGateway::default());
        let collaborators = Collaborators {
            payments: gateway.clone(),
            sms: gateway.clone(),
            games: gateway.clone(),
            resolver: Arc::new(FixedDrawResolver(draw)),
        };

        let (state, supervisor) = AppState::build(config, stores, collaborators);
        let server = TestServer::new(backend::build_router(state.clone()))
            .expect("Failed to start test server");

        Self {
            server,
            state,
            gateway,
            supervisor,
        }
    }

    /// Log in through the OTP flow, reading the issued code from the store
    pub async fn login(&self, msisdn: &str) -> String {
        self.server
            .post("/api/auth/otp")
            .json(&json!({ "msisdn": msisdn }))
            .await
            .assert_status_ok();

        let code = self.issued_code(msisdn).await;
        let response = self
            .server
            .post("/api/auth/verify")
            .json(&json!({ "msisdn": msisdn, "otp": code }))
            .await;
        response.assert_status_ok();

        let body: Value = response.json();
        body["Token"].as_str().expect("token in response").to_string()
    }

    pub async fn issued_code(&self, msisdn: &str) -> String {
        self.state
            .stores
            .codes
            .find_code(&msisdn_of(msisdn))
            .await
            .unwrap()
            .expect("a code was issued")
            .code
    }

    /// Deposit through the API and settle it with a success callback
    pub async fn fund(&self, token: &str, major: u64) -> String {
        let response = self
            .server
            .post("/api/deposits")
            .add_header(bearer(token).0, bearer(token).1)
            .json(&json!({ "amount": major, "channel": "ussd" }))
            .await;
        response.assert_status_ok();
        let reference = response.json::<Value>()["Reference"]
            .as_str()
            .unwrap()
            .to_string();

        self.deposit_callback(&reference, json!({ "status": "0", "transaction_id": "TXSEED" }))
            .await
            .assert_status_ok();
        reference
    }

    pub fn set_gateway_mode(&self, mode: GatewayMode) {
        *self.gateway.mode.lock().unwrap() = mode;
    }

    pub async fn deposit_callback(&self, reference: &str, mut body: Value) -> axum_test::TestResponse {
        body["reference"] = json!(reference);
        self.server
            .post("/api/callbacks/deposit")
            .add_header(forwarded_for(ALLOWED_CALLER).0, forwarded_for(ALLOWED_CALLER).1)
            .json(&body)
            .await
    }

    pub async fn balance(&self, msisdn: &str) -> Money {
        self.state
            .stores
            .accounts
            .find_account(&msisdn_of(msisdn))
            .await
            .unwrap()
            .expect("account exists")
            .balance
    }

    pub async fn bet_count(&self, msisdn: &str) -> usize {
        self.state
            .stores
            .ledger
            .bets_for(&msisdn_of(msisdn), 100)
            .await
            .unwrap()
            .len()
    }
}

pub fn lucky_game() -> GameConfig {
    GameConfig {
        category: GameCategory::LuckyNumber,
        game_cat_id: "1".to_string(),
        name: "Lucky 7".to_string(),
        bet_amount: Money::from_major(50).unwrap(),
        payout_multiplier: 5,
        rtp_limit: 90,
        active: true,
    }
}

pub fn spin_game() -> GameConfig {
    GameConfig {
        category: GameCategory::Spin,
        game_cat_id: "1".to_string(),
        name: "Spin & Win".to_string(),
        bet_amount: Money::from_major(20).unwrap(),
        payout_multiplier: 10,
        rtp_limit: 92,
        active: true,
    }
}

pub fn msisdn_of(raw: &str) -> Msisdn {
    Msisdn::parse(raw).unwrap()
}

pub fn money(major: u64) -> Money {
    Money::from_major(major).unwrap()
}

pub fn bearer(token: &str) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("authorization"),
        HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
    )
}

pub fn forwarded_for(ip: &str) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("x-forwarded-for"),
        HeaderValue::from_str(ip).unwrap(),
    )
}

pub fn bet_body(amount: u64, choice: i64) -> Value {
    json!({
        "amount": amount,
        "choice": choice,
        "game_cat_id": "1",
        "channel": "ussd",
        "ussd": true
    })
}

/// Poll until `check` holds; background jobs finish on their own schedule
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
