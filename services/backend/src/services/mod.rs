pub mod betting;
pub mod executor;
pub mod idempotency;
pub mod otp;
pub mod payments;
pub mod reconciler;
pub mod resolver;
pub mod validator;

pub use betting::BetService;
pub use executor::{BetExecutor, BetPlaced};
pub use idempotency::{Guarded, SettlementGuard, Step};
pub use otp::OtpGate;
pub use payments::{DepositStarted, PaymentService, WithdrawalStarted};
pub use reconciler::{Callback, ProviderFormat, Reconciliation, SettlementReconciler};
pub use resolver::{FixedDrawResolver, GameResolver, RandomResolver, Resolution};
pub use validator::{ConcurrentValidator, PartialRead, Validated};
