//! Job queue for async harvest dispatch
//!
//! Provides:
//! - The `JobQueue` contract used by submission and the worker
//! - An SQS implementation with retrying sends
//! - An in-process implementation over a tokio channel

use crate::config::QueueConfig;
use crate::errors::{AppError, Result};
use crate::harvest::{HarvestContext, HarvestRequest};
use async_trait::async_trait;
use aws_sdk_sqs::types::Message;
use aws_sdk_sqs::Client as SqsClient;
use backoff::{future::retry, ExponentialBackoff};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

/// Harvest job message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestJobMessage {
    /// Tracking token handed back to the submitter
    pub job_token: String,
    /// Session to keep up to date, if any
    pub session_id: Option<Uuid>,
    pub request: HarvestRequest,
}

impl HarvestJobMessage {
    /// Ownership to stamp on every record the job persists
    pub fn context(&self) -> HarvestContext {
        HarvestContext {
            profile_id: self.request.profile_id,
            session_id: self.session_id,
        }
    }
}

/// A message taken off the queue, with what is needed to acknowledge it
#[derive(Debug, Clone)]
pub struct ReceivedJob {
    pub receipt: String,
    /// Raw body; parsed separately so a bad message can be acknowledged and dropped
    pub body: String,
}

impl ReceivedJob {
    pub fn parse(&self) -> Result<HarvestJobMessage> {
        serde_json::from_str(&self.body).map_err(|e| AppError::QueueError {
            message: format!("Failed to parse message: {}", e),
        })
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Publish a job, returning the queue's message id
    async fn enqueue(&self, message: &HarvestJobMessage) -> Result<String>;

    /// Wait for the next batch of jobs (may be empty)
    async fn receive(&self) -> Result<Vec<ReceivedJob>>;

    /// Remove a processed job from the queue
    async fn acknowledge(&self, receipt: &str) -> Result<()>;
}

fn to_body(message: &HarvestJobMessage) -> Result<String> {
    serde_json::to_string(message).map_err(|e| AppError::QueueError {
        message: format!("Failed to serialize message: {}", e),
    })
}

/// SQS queue client wrapper
pub struct SqsQueue {
    client: SqsClient,
    url: String,
    config: QueueConfig,
}

impl SqsQueue {
    /// Create a new queue client from the ambient AWS configuration
    pub async fn new(config: QueueConfig) -> Result<Self> {
        let url = config.harvest_queue_url.clone().ok_or_else(|| AppError::Configuration {
            message: "queue.harvest_queue_url is not set".to_string(),
        })?;

        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = SqsClient::new(&aws_config);

        Ok(Self { client, url, config })
    }

    /// Create with an existing client
    pub fn with_client(client: SqsClient, url: String, config: QueueConfig) -> Self {
        Self { client, url, config }
    }

    fn to_received(message: Message) -> Option<ReceivedJob> {
        match (message.receipt_handle, message.body) {
            (Some(receipt), Some(body)) => Some(ReceivedJob { receipt, body }),
            (Some(receipt), None) => Some(ReceivedJob {
                receipt,
                body: String::new(),
            }),
            _ => {
                warn!("Dropping SQS message without receipt handle");
                None
            }
        }
    }
}

#[async_trait]
impl JobQueue for SqsQueue {
    async fn enqueue(&self, message: &HarvestJobMessage) -> Result<String> {
        let body = to_body(message)?;

        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(200),
            max_elapsed_time: Some(Duration::from_secs(10)),
            ..Default::default()
        };

        let result = retry(policy, || async {
            self.client
                .send_message()
                .queue_url(&self.url)
                .message_body(&body)
                .send()
                .await
                .map_err(|e| {
                    warn!(error = %e, "SQS send failed, retrying");
                    backoff::Error::transient(e)
                })
        })
        .await
        .map_err(|e| AppError::QueueError {
            message: format!("Failed to send message: {}", e),
        })?;

        let message_id = result.message_id.unwrap_or_default();
        debug!(message_id = %message_id, job_token = %message.job_token, "Harvest job sent to queue");

        Ok(message_id)
    }

    async fn receive(&self) -> Result<Vec<ReceivedJob>> {
        let result = self
            .client
            .receive_message()
            .queue_url(&self.url)
            .max_number_of_messages(self.config.max_messages)
            .visibility_timeout(self.config.visibility_timeout_secs)
            .wait_time_seconds(self.config.wait_time_secs)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to receive messages: {}", e),
            })?;

        let messages: Vec<ReceivedJob> = result
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(Self::to_received)
            .collect();
        debug!(count = messages.len(), "Received messages from queue");

        Ok(messages)
    }

    async fn acknowledge(&self, receipt: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.url)
            .receipt_handle(receipt)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to delete message: {}", e),
            })?;

        debug!("Message deleted from queue");
        Ok(())
    }
}

/// In-process queue over an unbounded tokio channel
pub struct LocalQueue {
    sender: mpsc::UnboundedSender<String>,
    receiver: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl LocalQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }
}

impl Default for LocalQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for LocalQueue {
    async fn enqueue(&self, message: &HarvestJobMessage) -> Result<String> {
        let body = to_body(message)?;
        self.sender.send(body).map_err(|_| AppError::QueueError {
            message: "local queue is closed".to_string(),
        })?;
        Ok(message.job_token.clone())
    }

    /// Drains everything currently queued without waiting
    async fn receive(&self) -> Result<Vec<ReceivedJob>> {
        let mut receiver = self.receiver.lock().await;
        let mut jobs = Vec::new();
        while let Ok(body) = receiver.try_recv() {
            jobs.push(ReceivedJob {
                receipt: Uuid::new_v4().to_string(),
                body,
            });
        }
        Ok(jobs)
    }

    async fn acknowledge(&self, _receipt: &str) -> Result<()> {
        Ok(())
    }
}
