//! Background work
//!
//! Settlement side effects (playing a deposit's bet intent, failed-deposit
//! notices, spin dispatch) run on a bounded pool of workers instead of
//! detached tasks. Each worker owns a bounded channel; the queue hands jobs
//! out round-robin and reports a full queue to the caller.

mod handler;
mod queue;
mod retry;
mod worker;

use async_trait::async_trait;

use crate::domain::{BetRecord, DepositRequest, FailedDepositNotice};
use crate::errors::Result;

pub use handler::EngineJobs;
pub use queue::{EnqueueError, JobQueue, JobSupervisor};
pub use retry::RetryStrategy;

#[derive(Debug, Clone)]
pub enum Job {
    /// Place the bet attached to a deposit that just landed
    PlayDepositIntent { deposit: DepositRequest },
    /// Record a customer-cancelled deposit and tell the customer
    NotifyFailedDeposit { notice: FailedDepositNotice },
    /// Hand a pending spin to the game provider
    DispatchSpin { bet: BetRecord, mode: String },
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Job::PlayDepositIntent { .. } => "play_deposit_intent",
            Job::NotifyFailedDeposit { .. } => "notify_failed_deposit",
            Job::DispatchSpin { .. } => "dispatch_spin",
        }
    }

    pub fn reference(&self) -> String {
        match self {
            Job::PlayDepositIntent { deposit } => deposit.reference.clone(),
            Job::NotifyFailedDeposit { notice } => notice.reference.clone(),
            Job::DispatchSpin { bet, .. } => bet.bet_id.to_string(),
        }
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<()>;
}
