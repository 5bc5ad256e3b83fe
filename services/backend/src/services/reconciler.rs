//! Settlement callbacks
//!
//! Every callback is normalized into a [`Callback`], claimed through the
//! settlement guard under `{kind}:{reference}`, and then applied as a single
//! store transition. Transitions only match records that are still pending,
//! so a replay that slips past an expired lease still changes nothing.

use chrono::Utc;
use shared::CUSTOMER_CANCELLED_DESCRIPTIONS;
use std::sync::Arc;
use tracing::Instrument;

use super::idempotency::{Guarded, SettlementGuard, Step};
use crate::domain::{
    BetOutcome, CallbackStatus, DepositCallback, FailedDepositNotice, GameCallback,
    GameCallbackOutcome, RequestStatus, SettlementEvent, SettlementKind, WithdrawalCallback,
    WithdrawalKind,
};
use crate::errors::Result;
use crate::jobs::{Job, JobQueue};
use crate::repository::{AccountStore, LedgerWriter, Transition, TransitionOutcome};

/// Wire format of a disbursement callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFormat {
    /// Routed through the payment aggregator; references carry its prefix
    Aggregator,
    /// Sent by the mobile-money provider itself
    Direct,
    /// Business-to-business disbursement, its own reference namespace
    B2b,
}

impl ProviderFormat {
    /// Pick the format for a mobile withdrawal callback by its reference
    pub fn for_mobile(reference: &str, aggregator_prefix: &str) -> Self {
        if !aggregator_prefix.is_empty() && reference.starts_with(aggregator_prefix) {
            ProviderFormat::Aggregator
        } else {
            ProviderFormat::Direct
        }
    }

    pub fn withdrawal_kind(&self) -> WithdrawalKind {
        match self {
            ProviderFormat::Aggregator | ProviderFormat::Direct => WithdrawalKind::Mobile,
            ProviderFormat::B2b => WithdrawalKind::B2b,
        }
    }

    pub fn settlement_kind(&self) -> SettlementKind {
        match self {
            ProviderFormat::Aggregator | ProviderFormat::Direct => SettlementKind::Withdrawal,
            ProviderFormat::B2b => SettlementKind::B2bWithdrawal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderFormat::Aggregator => "aggregator",
            ProviderFormat::Direct => "direct",
            ProviderFormat::B2b => "b2b",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Callback {
    Deposit(DepositCallback),
    Withdrawal {
        format: ProviderFormat,
        callback: WithdrawalCallback,
    },
    Game(GameCallback),
}

impl Callback {
    pub fn kind(&self) -> SettlementKind {
        match self {
            Callback::Deposit(_) => SettlementKind::Deposit,
            Callback::Withdrawal { format, .. } => format.settlement_kind(),
            Callback::Game(_) => SettlementKind::GameCallback,
        }
    }

    pub fn reference(&self) -> String {
        match self {
            Callback::Deposit(callback) => callback.reference.clone(),
            Callback::Withdrawal { callback, .. } => callback.reference.clone(),
            Callback::Game(callback) => callback.reference.to_string(),
        }
    }

    pub fn status(&self) -> CallbackStatus {
        match self {
            Callback::Deposit(callback) => CallbackStatus::classify(&callback.status),
            Callback::Withdrawal { callback, .. } => CallbackStatus::classify(&callback.status),
            // A game result is final by construction
            Callback::Game(_) => CallbackStatus::Success,
        }
    }

    fn description(&self) -> Option<String> {
        match self {
            Callback::Deposit(callback) => callback.description.clone(),
            Callback::Withdrawal { callback, .. } => callback.description.clone(),
            Callback::Game(_) => None,
        }
    }

    fn transaction_id(&self) -> Option<String> {
        match self {
            Callback::Deposit(callback) => callback.transaction_id.clone(),
            Callback::Withdrawal { callback, .. } => callback.transaction_id.clone(),
            Callback::Game(_) => None,
        }
    }

    /// Guard key; namespaced so equal references of different kinds never collide
    pub fn guard_key(&self) -> String {
        format!("{}:{}", self.kind().as_str(), self.reference())
    }
}

/// What a callback did
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// A transition was applied by this delivery
    pub applied: bool,
    pub status: CallbackStatus,
    pub description: Option<String>,
}

#[derive(Clone)]
pub struct SettlementReconciler {
    accounts: Arc<dyn AccountStore>,
    ledger: Arc<dyn LedgerWriter>,
    guard: SettlementGuard,
    jobs: JobQueue,
}

impl SettlementReconciler {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        ledger: Arc<dyn LedgerWriter>,
        guard: SettlementGuard,
        jobs: JobQueue,
    ) -> Self {
        Self {
            accounts,
            ledger,
            guard,
            jobs,
        }
    }

    pub async fn apply(&self, callback: Callback) -> Result<Reconciliation> {
        let span = tracing::info_span!(
            "settlement",
            kind = callback.kind().as_str(),
            reference = %callback.reference(),
            status = ?callback.status()
        );
        self.reconcile(callback).instrument(span).await
    }

    async fn reconcile(&self, callback: Callback) -> Result<Reconciliation> {
        let kind = callback.kind();
        let status = callback.status();
        let description = callback.description();

        if status == CallbackStatus::Pending {
            tracing::info!("Interim callback, nothing to settle");
            return Ok(Reconciliation {
                applied: false,
                status,
                description,
            });
        }

        let key = callback.guard_key();
        let outcome = self
            .guard
            .run(&key, || self.settle(&callback, status))
            .await?;

        let applied = outcome.applied();
        match outcome {
            Guarded::Applied(()) => {
                tracing::info!("Settlement applied");
                metrics::counter!("settlements_applied_total", "kind" => kind.as_str()).increment(1);
            }
            Guarded::NoMatch => tracing::info!("No pending record matched the callback"),
            Guarded::Duplicate => tracing::info!("Callback replay ignored"),
            Guarded::InFlight => tracing::info!("Callback already being settled"),
        }

        Ok(Reconciliation {
            applied,
            status,
            description,
        })
    }

    /// Apply the callback; the settlement event is written only for a
    /// callback that changed a pending record
    async fn settle(&self, callback: &Callback, status: CallbackStatus) -> Result<Step<()>> {
        let received_at = Utc::now();

        let step = match callback {
            Callback::Deposit(deposit) => self.settle_deposit(deposit, status).await?,
            Callback::Withdrawal { format, callback } => {
                self.settle_withdrawal(*format, callback, status).await?
            }
            Callback::Game(game) => self.settle_game(game).await?,
        };

        if let Step::Commit(()) = step {
            self.ledger
                .record_settlement(&SettlementEvent {
                    reference: callback.reference(),
                    kind: callback.kind(),
                    status,
                    description: callback.description(),
                    transaction_id: callback.transaction_id(),
                    received_at,
                    processed: true,
                })
                .await?;
        }
        Ok(step)
    }

    async fn settle_deposit(
        &self,
        callback: &DepositCallback,
        status: CallbackStatus,
    ) -> Result<Step<()>> {
        let Some(mut deposit) = self
            .ledger
            .find_deposit(&callback.reference)
            .await?
            .filter(|deposit| deposit.status == RequestStatus::Pending)
        else {
            return Ok(Step::Skip);
        };
        let now = Utc::now();

        if status == CallbackStatus::Success {
            if let Some(reported) = callback.amount.filter(|amount| *amount != deposit.amount) {
                tracing::warn!(
                    msisdn = %deposit.msisdn,
                    stored = %deposit.amount,
                    reported = %reported,
                    "Callback amount differs from the request; crediting the stored amount"
                );
            }

            let outcome = self
                .accounts
                .apply(Transition::CreditDeposit {
                    reference: deposit.reference.clone(),
                    transaction_id: callback.transaction_id.clone(),
                    at: now,
                })
                .await?;
            let TransitionOutcome::Applied(account) = outcome else {
                return Ok(Step::Skip);
            };

            tracing::info!(msisdn = %account.msisdn, amount = %deposit.amount, balance = %account.balance, "Deposit credited");

            if deposit.bet_intent.is_some() {
                deposit.status = RequestStatus::Succeeded;
                deposit.transaction_id = callback.transaction_id.clone();
                deposit.updated_at = now;
                // Enqueue errors are logged and counted by the queue
                let _ = self.jobs.enqueue(Job::PlayDepositIntent { deposit });
            }
            return Ok(Step::Commit(()));
        }

        let outcome = self
            .accounts
            .apply(Transition::FailDeposit {
                reference: deposit.reference.clone(),
                description: callback.description.clone(),
                at: now,
            })
            .await?;
        if !matches!(outcome, TransitionOutcome::Applied(_)) {
            return Ok(Step::Skip);
        }

        let description = callback.description.clone().unwrap_or_default();
        tracing::info!(msisdn = %deposit.msisdn, description = %description, "Deposit failed");

        if CUSTOMER_CANCELLED_DESCRIPTIONS.contains(&description.as_str()) {
            let notice = FailedDepositNotice {
                reference: deposit.reference.clone(),
                msisdn: deposit.msisdn.clone(),
                amount: deposit.amount,
                description,
                recorded_at: now,
            };
            let _ = self.jobs.enqueue(Job::NotifyFailedDeposit { notice });
        }
        Ok(Step::Commit(()))
    }

    async fn settle_withdrawal(
        &self,
        format: ProviderFormat,
        callback: &WithdrawalCallback,
        status: CallbackStatus,
    ) -> Result<Step<()>> {
        let outcome = self
            .accounts
            .apply(Transition::ResolveWithdrawal {
                kind: format.withdrawal_kind(),
                reference: callback.reference.clone(),
                transaction_id: callback.transaction_id.clone(),
                succeeded: status == CallbackStatus::Success,
                description: callback.description.clone(),
                at: Utc::now(),
            })
            .await?;

        match outcome {
            TransitionOutcome::Applied(account) => {
                tracing::info!(
                    msisdn = %account.msisdn,
                    format = format.as_str(),
                    succeeded = status == CallbackStatus::Success,
                    balance = %account.balance,
                    "Withdrawal resolved"
                );
                Ok(Step::Commit(()))
            }
            _ => Ok(Step::Skip),
        }
    }

    async fn settle_game(&self, callback: &GameCallback) -> Result<Step<()>> {
        let payout = match callback.outcome {
            GameCallbackOutcome::Won => callback.payout,
            GameCallbackOutcome::Lost => {
                if !callback.payout.is_zero() {
                    tracing::warn!(payout = %callback.payout, "Payout reported on a lost round; ignored");
                }
                shared::Money::ZERO
            }
        };

        let outcome = self
            .accounts
            .apply(Transition::SettleBet {
                bet_id: callback.reference,
                outcome: BetOutcome::from(callback.outcome),
                payout,
                drawn_number: callback.drawn_number,
                settled_at: Utc::now(),
            })
            .await?;

        match outcome {
            TransitionOutcome::Applied(account) => {
                tracing::info!(msisdn = %account.msisdn, payout = %payout, "Spin settled");
                Ok(Step::Commit(()))
            }
            _ => Ok(Step::Skip),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobConfig;
    use crate::domain::{
        BetIntent, BetRecord, DepositRequest, GameCategory, WithdrawalRequest,
    };
    use crate::jobs::{JobHandler, JobSupervisor};
    use crate::repository::Stores;
    use async_trait::async_trait;
    use shared::{Money, Msisdn};
    use std::sync::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    #[derive(Default)]
    struct Recorder {
        jobs: Mutex<Vec<Job>>,
    }

    #[async_trait]
    impl JobHandler for Recorder {
        async fn handle(&self, job: &Job) -> Result<()> {
            self.jobs.lock().unwrap().push(job.clone());
            Ok(())
        }
    }

    fn msisdn() -> Msisdn {
        Msisdn::parse("254700000001").unwrap()
    }

    fn money(major: u64) -> Money {
        Money::from_major(major).unwrap()
    }

    fn setup() -> (Stores, SettlementReconciler, Arc<Recorder>, JobSupervisor) {
        let stores = Stores::in_memory();
        let recorder = Arc::new(Recorder::default());
        let (jobs, supervisor) = JobQueue::start(
            &JobConfig {
                workers: 1,
                queue_capacity: 16,
                max_retries: 0,
                retry_initial_interval: Duration::from_millis(1),
            },
            recorder.clone(),
        );
        let reconciler = SettlementReconciler::new(
            stores.accounts.clone(),
            stores.ledger.clone(),
            SettlementGuard::new(stores.guard.clone(), Duration::from_secs(30)),
            jobs,
        );
        (stores, reconciler, recorder, supervisor)
    }

    async fn pending_deposit(stores: &Stores, reference: &str, amount: u64, intent: bool) {
        stores.accounts.get_or_create_account(&msisdn()).await.unwrap();
        stores
            .ledger
            .record_deposit(&DepositRequest {
                reference: reference.to_string(),
                msisdn: msisdn(),
                amount: money(amount),
                channel: "ussd".to_string(),
                status: RequestStatus::Pending,
                bet_intent: intent.then(|| BetIntent {
                    game_cat_id: "1".to_string(),
                    choice: 4,
                    channel: "ussd".to_string(),
                }),
                transaction_id: None,
                description: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    fn deposit_callback(reference: &str, status: &str, description: Option<&str>) -> Callback {
        Callback::Deposit(DepositCallback {
            status: status.to_string(),
            description: description.map(str::to_string),
            reference: reference.to_string(),
            transaction_id: Some("TX1".to_string()),
            amount: None,
        })
    }

    async fn balance(stores: &Stores) -> Money {
        stores
            .accounts
            .find_account(&msisdn())
            .await
            .unwrap()
            .unwrap()
            .balance
    }

    #[test]
    fn test_provider_format_by_prefix() {
        assert_eq!(ProviderFormat::for_mobile("AV_123", "AV_"), ProviderFormat::Aggregator);
        assert_eq!(ProviderFormat::for_mobile("WD_123", "AV_"), ProviderFormat::Direct);
        assert_eq!(ProviderFormat::for_mobile("AV_123", ""), ProviderFormat::Direct);
        assert_eq!(ProviderFormat::B2b.withdrawal_kind(), WithdrawalKind::B2b);
    }

    #[tokio::test]
    async fn test_deposit_success_credits_once() {
        let (stores, reconciler, _, supervisor) = setup();
        pending_deposit(&stores, "DP_1", 100, false).await;

        let first = reconciler.apply(deposit_callback("DP_1", "0", None)).await.unwrap();
        let second = reconciler.apply(deposit_callback("DP_1", "Success", None)).await.unwrap();

        assert!(first.applied);
        assert!(!second.applied);
        assert_eq!(balance(&stores).await, money(100));

        let event = stores
            .ledger
            .find_settlement(SettlementKind::Deposit, "DP_1")
            .await
            .unwrap()
            .unwrap();
        assert!(event.processed);
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_deposit_credits_stored_amount() {
        let (stores, reconciler, _, supervisor) = setup();
        pending_deposit(&stores, "DP_1", 100, false).await;

        let callback = Callback::Deposit(DepositCallback {
            status: "0".to_string(),
            description: None,
            reference: "DP_1".to_string(),
            transaction_id: None,
            amount: Some(money(5000)),
        });
        reconciler.apply(callback).await.unwrap();

        assert_eq!(balance(&stores).await, money(100));
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_deposit_with_intent_schedules_bet() {
        let (stores, reconciler, recorder, supervisor) = setup();
        pending_deposit(&stores, "DP_1", 50, true).await;

        reconciler.apply(deposit_callback("DP_1", "0", None)).await.unwrap();
        supervisor.shutdown().await;

        let jobs = recorder.jobs.lock().unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(matches!(&jobs[0], Job::PlayDepositIntent { deposit } if deposit.reference == "DP_1"));
    }

    #[tokio::test]
    async fn test_cancelled_deposit_schedules_notice() {
        let (stores, reconciler, recorder, supervisor) = setup();
        pending_deposit(&stores, "DP_1", 50, false).await;

        let result = reconciler
            .apply(deposit_callback("DP_1", "1032", Some("CUSTOMER_CANCELED_PIN")))
            .await
            .unwrap();
        supervisor.shutdown().await;

        assert!(result.applied);
        assert_eq!(result.status, CallbackStatus::Failure);
        assert!(balance(&stores).await.is_zero());
        let deposit = stores.ledger.find_deposit("DP_1").await.unwrap().unwrap();
        assert_eq!(deposit.status, RequestStatus::Failed);
        assert!(matches!(
            recorder.jobs.lock().unwrap().as_slice(),
            [Job::NotifyFailedDeposit { .. }]
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_redelivery_credits_once() {
        let (stores, reconciler, _, supervisor) = setup();
        pending_deposit(&stores, "DP_1", 100, false).await;

        let deliveries: Vec<_> = (0..16)
            .map(|_| {
                let reconciler = reconciler.clone();
                tokio::spawn(async move { reconciler.apply(deposit_callback("DP_1", "0", None)).await })
            })
            .collect();

        let mut applied = 0;
        for delivery in deliveries {
            if delivery.await.unwrap().unwrap().applied {
                applied += 1;
            }
        }

        assert_eq!(applied, 1);
        assert_eq!(balance(&stores).await, money(100));
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_reference_stays_claimable() {
        let (stores, reconciler, _, supervisor) = setup();

        let result = reconciler.apply(deposit_callback("DP_404", "0", None)).await.unwrap();
        assert!(!result.applied);
        // Nothing matched, so nothing is logged as settled
        assert!(stores
            .ledger
            .find_settlement(SettlementKind::Deposit, "DP_404")
            .await
            .unwrap()
            .is_none());

        // The deposit shows up later; the redelivery is applied
        pending_deposit(&stores, "DP_404", 20, false).await;
        let result = reconciler.apply(deposit_callback("DP_404", "0", None)).await.unwrap();
        assert!(result.applied);
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_pending_status_is_not_settled() {
        let (stores, reconciler, _, supervisor) = setup();
        pending_deposit(&stores, "DP_1", 20, false).await;

        let result = reconciler.apply(deposit_callback("DP_1", "pending", None)).await.unwrap();

        assert!(!result.applied);
        assert!(stores
            .ledger
            .find_settlement(SettlementKind::Deposit, "DP_1")
            .await
            .unwrap()
            .is_none());
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_withdrawal_failure_refunds_and_replay_is_noop() {
        let (stores, reconciler, _, supervisor) = setup();
        pending_deposit(&stores, "DP_1", 100, false).await;
        reconciler.apply(deposit_callback("DP_1", "0", None)).await.unwrap();

        let withdrawal = WithdrawalRequest {
            reference: "AV_9".to_string(),
            kind: WithdrawalKind::Mobile,
            msisdn: msisdn(),
            amount: money(60),
            channel: "app".to_string(),
            transaction_id: Some("TX9".to_string()),
            status: RequestStatus::Pending,
            description: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        stores
            .accounts
            .apply(Transition::HoldWithdrawal { withdrawal })
            .await
            .unwrap();
        assert_eq!(balance(&stores).await, money(40));

        let callback = |status: &str| Callback::Withdrawal {
            format: ProviderFormat::for_mobile("AV_9", "AV_"),
            callback: WithdrawalCallback {
                reference: "AV_9".to_string(),
                transaction_id: Some("TX9".to_string()),
                status: status.to_string(),
                description: Some("Insufficient float".to_string()),
            },
        };

        assert!(reconciler.apply(callback("FAILED")).await.unwrap().applied);
        assert!(!reconciler.apply(callback("FAILED")).await.unwrap().applied);
        assert_eq!(balance(&stores).await, money(100));
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_withdrawal_transaction_mismatch_is_no_match() {
        let (stores, reconciler, _, supervisor) = setup();
        stores.accounts.get_or_create_account(&msisdn()).await.unwrap();
        stores
            .accounts
            .apply(Transition::HoldWithdrawal {
                withdrawal: WithdrawalRequest {
                    reference: "B2B_1".to_string(),
                    kind: WithdrawalKind::B2b,
                    msisdn: msisdn(),
                    amount: Money::ZERO,
                    channel: "app".to_string(),
                    transaction_id: Some("TX1".to_string()),
                    status: RequestStatus::Pending,
                    description: None,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                },
            })
            .await
            .unwrap();

        let result = reconciler
            .apply(Callback::Withdrawal {
                format: ProviderFormat::B2b,
                callback: WithdrawalCallback {
                    reference: "B2B_1".to_string(),
                    transaction_id: Some("TX2".to_string()),
                    status: "0".to_string(),
                    description: None,
                },
            })
            .await
            .unwrap();

        assert!(!result.applied);
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_game_callback_settles_pending_spin_once() {
        let (stores, reconciler, _, supervisor) = setup();
        pending_deposit(&stores, "DP_1", 50, false).await;
        reconciler.apply(deposit_callback("DP_1", "0", None)).await.unwrap();

        let bet_id = Uuid::new_v4();
        stores
            .accounts
            .apply(Transition::PlaceBet {
                bet: BetRecord {
                    bet_id,
                    msisdn: msisdn(),
                    category: GameCategory::Spin,
                    game_cat_id: "1".to_string(),
                    amount: money(50),
                    choice: None,
                    channel: "app".to_string(),
                    outcome: BetOutcome::Pending,
                    payout: Money::ZERO,
                    drawn_number: None,
                    free_bet: false,
                    created_at: Utc::now(),
                    settled_at: None,
                },
            })
            .await
            .unwrap();

        let callback = Callback::Game(GameCallback {
            reference: bet_id,
            outcome: GameCallbackOutcome::Won,
            payout: money(150),
            drawn_number: None,
        });
        assert!(reconciler.apply(callback.clone()).await.unwrap().applied);
        assert!(!reconciler.apply(callback).await.unwrap().applied);

        assert_eq!(balance(&stores).await, money(150));
        let bet = stores.ledger.find_bet(bet_id).await.unwrap().unwrap();
        assert_eq!(bet.outcome, BetOutcome::Won);
        supervisor.shutdown().await;
    }
}
