use backoff::backoff::Backoff;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::retry::RetryStrategy;
use super::{Job, JobHandler};

pub struct Worker {
    worker_id: usize,
    handler: Arc<dyn JobHandler>,
    retry: RetryStrategy,
}

impl Worker {
    pub fn new(worker_id: usize, handler: Arc<dyn JobHandler>, retry: RetryStrategy) -> Self {
        Self {
            worker_id,
            handler,
            retry,
        }
    }

    pub async fn run(self, mut receiver: mpsc::Receiver<Job>, mut shutdown: watch::Receiver<bool>) {
        debug!(worker_id = self.worker_id, "Job worker starting");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                job = receiver.recv() => match job {
                    Some(job) => self.process(job).await,
                    None => break,
                },
            }
        }

        // Finish what was accepted before the stop signal
        receiver.close();
        let mut drained = 0;
        while let Ok(job) = receiver.try_recv() {
            self.process(job).await;
            drained += 1;
        }

        info!(worker_id = self.worker_id, drained, "Job worker stopped");
    }

    async fn process(&self, job: Job) {
        let kind = job.kind();
        let reference = job.reference();
        let mut backoff = self.retry.create_backoff();
        let mut attempt = 0;

        loop {
            match self.handler.handle(&job).await {
                Ok(()) => {
                    debug!(worker_id = self.worker_id, kind, reference = %reference, attempt, "Job completed");
                    metrics::counter!("jobs_completed_total", "kind" => kind).increment(1);
                    return;
                }
                Err(err) if err.is_retryable() && self.retry.should_retry(attempt) => {
                    let Some(delay) = backoff.next_backoff() else {
                        error!(kind, reference = %reference, error = %err, "Job retry window exhausted");
                        metrics::counter!("jobs_failed_total", "kind" => kind).increment(1);
                        return;
                    };
                    attempt += 1;
                    warn!(
                        worker_id = self.worker_id,
                        kind,
                        reference = %reference,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Job failed, retrying"
                    );
                    metrics::counter!("jobs_retried_total", "kind" => kind).increment(1);
                    sleep(delay).await;
                }
                Err(err) => {
                    error!(
                        worker_id = self.worker_id,
                        kind,
                        reference = %reference,
                        attempt,
                        error = %err,
                        "Job failed"
                    );
                    metrics::counter!("jobs_failed_total", "kind" => kind).increment(1);
                    return;
                }
            }
        }
    }
}
