use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::retry::RetryStrategy;
use super::worker::Worker;
use super::{Job, JobHandler};
use crate::config::JobConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    #[error("job queue is full")]
    Full,

    #[error("job queue is shut down")]
    Closed,
}

/// Cloneable handle for submitting jobs
#[derive(Clone)]
pub struct JobQueue {
    senders: Arc<Vec<mpsc::Sender<Job>>>,
    next_worker_index: Arc<AtomicUsize>,
    // Keeps workers alive while any handle exists, even without a supervisor
    _shutdown: Arc<watch::Sender<bool>>,
}

/// Owns the worker tasks; shutting it down drains and joins them
pub struct JobSupervisor {
    shutdown: Arc<watch::Sender<bool>>,
    handles: Vec<JoinHandle<()>>,
}

impl JobQueue {
    pub fn start(config: &JobConfig, handler: Arc<dyn JobHandler>) -> (JobQueue, JobSupervisor) {
        let worker_count = config.workers.max(1);
        let per_worker_capacity = (config.queue_capacity / worker_count).max(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);

        let mut senders = Vec::with_capacity(worker_count);
        let mut handles = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let (tx, rx) = mpsc::channel(per_worker_capacity);
            senders.push(tx);

            let worker = Worker::new(
                worker_id,
                handler.clone(),
                RetryStrategy::new(config.max_retries, config.retry_initial_interval),
            );
            handles.push(tokio::spawn(worker.run(rx, shutdown_rx.clone())));
        }

        tracing::info!(
            workers = worker_count,
            per_worker_capacity,
            max_retries = config.max_retries,
            "Job queue started"
        );

        (
            JobQueue {
                senders: Arc::new(senders),
                next_worker_index: Arc::new(AtomicUsize::new(0)),
                _shutdown: shutdown_tx.clone(),
            },
            JobSupervisor {
                shutdown: shutdown_tx,
                handles,
            },
        )
    }

    /// Hand a job to the next worker without waiting
    ///
    /// Tries every worker once, starting round-robin, before giving up.
    pub fn enqueue(&self, job: Job) -> Result<(), EnqueueError> {
        let worker_count = self.senders.len();
        let start = self.next_worker_index.fetch_add(1, Ordering::Relaxed);
        let kind = job.kind();
        let reference = job.reference();

        let mut job = job;
        let mut closed = 0;
        for offset in 0..worker_count {
            let sender = &self.senders[(start + offset) % worker_count];
            match sender.try_send(job) {
                Ok(()) => {
                    metrics::counter!("jobs_enqueued_total", "kind" => kind).increment(1);
                    return Ok(());
                }
                Err(mpsc::error::TrySendError::Full(returned)) => job = returned,
                Err(mpsc::error::TrySendError::Closed(returned)) => {
                    closed += 1;
                    job = returned;
                }
            }
        }

        let err = if closed == worker_count {
            EnqueueError::Closed
        } else {
            EnqueueError::Full
        };
        tracing::error!(kind, reference = %reference, error = %err, "Job rejected");
        metrics::counter!("jobs_rejected_total", "kind" => kind).increment(1);
        Err(err)
    }
}

impl JobSupervisor {
    /// Signal workers to stop, let them drain what is queued, and join them
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);

        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Job worker panicked");
            }
        }
        tracing::info!("Job queue stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FailedDepositNotice;
    use crate::errors::{AppError, Result};
    use async_trait::async_trait;
    use shared::{Money, Msisdn};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn config(workers: usize, capacity: usize, max_retries: u32) -> JobConfig {
        JobConfig {
            workers,
            queue_capacity: capacity,
            max_retries,
            retry_initial_interval: Duration::from_millis(1),
        }
    }

    fn job(reference: &str) -> Job {
        Job::NotifyFailedDeposit {
            notice: FailedDepositNotice {
                reference: reference.to_string(),
                msisdn: Msisdn::parse("254700000001").unwrap(),
                amount: Money::from_major(10).unwrap(),
                description: "CUSTOMER_CANCELED_PIN".to_string(),
                recorded_at: chrono::Utc::now(),
            },
        }
    }

    /// Counts calls; fails the first `failures` of them with a retryable error
    struct Flaky {
        calls: AtomicUsize,
        failures: usize,
    }

    #[async_trait]
    impl JobHandler for Flaky {
        async fn handle(&self, _job: &Job) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(AppError::Internal(anyhow::anyhow!("gateway unreachable")));
            }
            Ok(())
        }
    }

    /// Blocks every job until released
    struct Gate {
        release: Notify,
    }

    #[async_trait]
    impl JobHandler for Gate {
        async fn handle(&self, _job: &Job) -> Result<()> {
            self.release.notified().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_retryable_failures_are_retried() {
        let handler = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            failures: 2,
        });
        let (queue, supervisor) = JobQueue::start(&config(1, 8, 3), handler.clone());

        queue.enqueue(job("DP_1")).unwrap();
        supervisor.shutdown().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_stop_at_budget() {
        let handler = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            failures: usize::MAX,
        });
        let (queue, supervisor) = JobQueue::start(&config(1, 8, 2), handler.clone());

        queue.enqueue(job("DP_1")).unwrap();
        supervisor.shutdown().await;

        // One attempt plus two retries
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_full_queue_is_reported() {
        let handler = Arc::new(Gate {
            release: Notify::new(),
        });
        let (queue, supervisor) = JobQueue::start(&config(1, 1, 0), handler.clone());

        // First job is picked up and blocks, second fills the channel
        queue.enqueue(job("DP_1")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(job("DP_2")).unwrap();

        assert_eq!(queue.enqueue(job("DP_3")), Err(EnqueueError::Full));

        handler.release.notify_one();
        handler.release.notify_one();
        supervisor.shutdown().await;
    }
}
