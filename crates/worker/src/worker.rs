//! Queue polling loop
//!
//! Receives harvest jobs, runs each through the [`JobRunner`] and
//! acknowledges it. A message is acknowledged once the runner returns, since
//! every run ends in a structured outcome. Messages that do not parse or
//! carry an invalid request are acknowledged and dropped.

use crate::runner::JobRunner;
use harvest_common::config::WorkerConfig;
use harvest_common::harvest::HarvestStatus;
use harvest_common::metrics::record_queue_message;
use harvest_common::{AppError, JobQueue, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use validator::Validate;

/// Pause between polls that returned nothing
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// What one poll did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub received: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Messages that could not be parsed or failed validation
    pub rejected: usize,
}

pub struct QueueWorker {
    queue: Arc<dyn JobQueue>,
    runner: JobRunner,
    config: WorkerConfig,
}

impl QueueWorker {
    pub fn new(queue: Arc<dyn JobQueue>, runner: JobRunner, config: WorkerConfig) -> Self {
        Self {
            queue,
            runner,
            config,
        }
    }

    /// Receive one batch and run every job in it
    pub async fn process_batch(&self) -> Result<BatchReport> {
        let messages = self.queue.receive().await?;
        let mut report = BatchReport {
            received: messages.len(),
            ..Default::default()
        };

        for message in messages {
            let job = match message.parse() {
                Ok(job) => job,
                Err(e) => {
                    report.rejected += 1;
                    error!(error = %e, "Dropping malformed harvest message");
                    record_queue_message("rejected");
                    self.acknowledge(&message.receipt).await;
                    continue;
                }
            };

            if let Err(e) = job.request.validate() {
                let e = AppError::from(e);
                report.rejected += 1;
                error!(job_token = %job.job_token, error = %e, "Dropping invalid harvest request");
                record_queue_message("rejected");
                self.acknowledge(&message.receipt).await;
                continue;
            }

            info!(job_token = %job.job_token, query = %job.request.query, "Received harvest job");

            let outcome = self.runner.run(&job).await;
            if outcome.status == HarvestStatus::Failure {
                report.failed += 1;
                record_queue_message("failure");
            } else {
                report.succeeded += 1;
                record_queue_message("success");
            }

            self.acknowledge(&message.receipt).await;
        }

        Ok(report)
    }

    async fn acknowledge(&self, receipt: &str) {
        if let Err(e) = self.queue.acknowledge(receipt).await {
            // Redelivery is harmless: upserts are idempotent and settled sessions are skipped
            error!(error = %e, "Failed to acknowledge message");
        }
    }

    async fn poll(&self) -> Result<BatchReport> {
        let report = self.process_batch().await?;
        if report.received == 0 {
            tokio::time::sleep(IDLE_POLL_INTERVAL).await;
        }
        Ok(report)
    }

    /// Poll until `shutdown` resolves
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let circuit_break = Duration::from_secs(self.config.circuit_break_secs);
        let receive_backoff = Duration::from_secs(self.config.receive_error_backoff_secs);
        let mut consecutive_failures: u32 = 0;

        info!("Harvest worker ready, polling queue");

        loop {
            if consecutive_failures >= self.config.max_consecutive_failures {
                warn!(failures = consecutive_failures, "Circuit breaker open, pausing...");
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = tokio::time::sleep(circuit_break) => {}
                }
                consecutive_failures = 0;
                info!("Circuit breaker reset, resuming...");
            }

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
                result = self.poll() => match result {
                    Ok(report) if report.rejected > 0 => {
                        consecutive_failures += report.rejected as u32;
                    }
                    Ok(report) => {
                        if report.received > 0 {
                            consecutive_failures = 0;
                        }
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        error!(error = %e, failures = consecutive_failures, "Failed to receive messages from queue");
                        tokio::time::sleep(receive_backoff).await;
                    }
                }
            }
        }

        info!("Harvest worker stopped");
    }
}
