use axum::extract::FromRef;
use std::sync::Arc;

use crate::config::Config;
use crate::extractors::Sessions;
use crate::gateway::{GameProvider, LoggingGateway, PaymentGateway, SmsSender};
use crate::jobs::{EngineJobs, JobQueue, JobSupervisor};
use crate::repository::Stores;
use crate::services::{
    BetExecutor, BetService, ConcurrentValidator, GameResolver, OtpGate, PaymentService,
    RandomResolver, SettlementGuard, SettlementReconciler,
};

/// Outbound dependencies, swappable for tests
#[derive(Clone)]
pub struct Collaborators {
    pub payments: Arc<dyn PaymentGateway>,
    pub sms: Arc<dyn SmsSender>,
    pub games: Arc<dyn GameProvider>,
    pub resolver: Arc<dyn GameResolver>,
}

impl Collaborators {
    /// Log-only gateways and a random draw
    pub fn logging() -> Self {
        Self {
            payments: Arc::new(LoggingGateway),
            sms: Arc::new(LoggingGateway),
            games: Arc::new(LoggingGateway),
            resolver: Arc::new(RandomResolver),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub stores: Stores,
    pub validator: ConcurrentValidator,
    pub bets: BetService,
    pub payments: PaymentService,
    pub reconciler: SettlementReconciler,
    pub otp: OtpGate,
    pub jobs: JobQueue,
}

impl AppState {
    /// Wire the services and start the job workers
    ///
    /// The returned supervisor owns the workers; shut it down after the
    /// server stops so queued jobs are drained.
    pub fn build(config: Config, stores: Stores, collaborators: Collaborators) -> (Self, JobSupervisor) {
        let validator = ConcurrentValidator::new(&stores);
        let executor = Arc::new(BetExecutor::new(
            stores.accounts.clone(),
            collaborators.resolver.clone(),
        ));
        let bets = BetService::new(
            validator.clone(),
            executor,
            config.betting.validation_timeout,
        );

        let handler = Arc::new(EngineJobs::new(
            bets.clone(),
            stores.ledger.clone(),
            collaborators.sms.clone(),
            collaborators.games.clone(),
        ));
        let (jobs, supervisor) = JobQueue::start(&config.jobs, handler);

        let reconciler = SettlementReconciler::new(
            stores.accounts.clone(),
            stores.ledger.clone(),
            SettlementGuard::new(stores.guard.clone(), config.settlement.guard_lease),
            jobs.clone(),
        );
        let payments = PaymentService::new(
            stores.accounts.clone(),
            stores.games.clone(),
            stores.ledger.clone(),
            collaborators.payments.clone(),
            config.settlement.withdrawal_reference_prefix.clone(),
        );
        let otp = OtpGate::new(stores.codes.clone(), collaborators.sms.clone(), &config.otp);

        let state = Self {
            config: Arc::new(config),
            stores,
            validator,
            bets,
            payments,
            reconciler,
            otp,
            jobs,
        };
        (state, supervisor)
    }
}

impl FromRef<AppState> for Sessions {
    fn from_ref(state: &AppState) -> Self {
        Sessions(state.stores.sessions.clone())
    }
}
