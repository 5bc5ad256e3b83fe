//! Run a settlement at most once per reference
//!
//! The claim is taken before any write. Work that applies its transition
//! promotes the claim to permanent; work that finds nothing to apply, or
//! fails, releases it so a redelivery can try again.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::Result;
use crate::repository::{Acquisition, IdempotencyGuard};

/// What the guarded work decided
pub enum Step<T> {
    /// A transition was applied; the reference is now spent
    Commit(T),
    /// Nothing matched; leave the reference claimable
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guarded<T> {
    Applied(T),
    NoMatch,
    Duplicate,
    InFlight,
}

impl<T> Guarded<T> {
    pub fn applied(&self) -> bool {
        matches!(self, Guarded::Applied(_))
    }
}

#[derive(Clone)]
pub struct SettlementGuard {
    guard: Arc<dyn IdempotencyGuard>,
    lease: Duration,
}

impl SettlementGuard {
    pub fn new(guard: Arc<dyn IdempotencyGuard>, lease: Duration) -> Self {
        Self { guard, lease }
    }

    pub async fn run<T, F, Fut>(&self, key: &str, work: F) -> Result<Guarded<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Step<T>>>,
    {
        match self.guard.try_acquire(key, self.lease).await? {
            Acquisition::AlreadyProcessed => {
                tracing::debug!(key, "Settlement already processed");
                metrics::counter!("settlements_duplicate_total").increment(1);
                return Ok(Guarded::Duplicate);
            }
            Acquisition::InFlight => {
                tracing::debug!(key, "Settlement in flight elsewhere");
                metrics::counter!("settlements_in_flight_total").increment(1);
                return Ok(Guarded::InFlight);
            }
            Acquisition::Acquired => {}
        }

        match work().await {
            Ok(Step::Commit(value)) => {
                self.guard.mark_processed(key).await?;
                Ok(Guarded::Applied(value))
            }
            Ok(Step::Skip) => {
                self.guard.release(key).await?;
                Ok(Guarded::NoMatch)
            }
            Err(err) => {
                if let Err(release_err) = self.guard.release(key).await {
                    tracing::error!(key, error = %release_err, "Failed to release settlement claim");
                }
                Err(err)
            }
        }
    }
}
