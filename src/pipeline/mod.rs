//! Per-message processing pipeline.
//!
//! For each received message the pipeline runs one retried operation
//! (store the body durably, then delete the message from the source queue)
//! and routes the terminal outcome: archived on success, diverted to the
//! dead-letter queue on exhausted retries, left for redelivery when
//! shutdown interrupts a backoff wait. `process` never propagates an error
//! to the poller; every failure path is handled here.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn, Instrument};

use crate::queue::{QueueClient, QueueError, QueueMessage};
use crate::retry::{execute_with_retry, BackoffPolicy, RetryError};
use crate::shutdown::ShutdownListener;
use crate::storage::{ObjectStore, StorageError};

/// Content type for archived message bodies.
const CONTENT_TYPE: &str = "application/json";

/// Error from a single store-then-delete attempt.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Store(#[from] StorageError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Composes the retry executor with the queue and object store
/// collaborators to take one message to a terminal outcome.
pub struct MessagePipeline {
    store: Arc<dyn ObjectStore>,
    queue: Arc<dyn QueueClient>,
    bucket: String,
    dead_letter_queue_url: String,
    max_attempts: u32,
    backoff: BackoffPolicy,
}

impl MessagePipeline {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        queue: Arc<dyn QueueClient>,
        bucket: impl Into<String>,
        dead_letter_queue_url: impl Into<String>,
        max_attempts: u32,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            store,
            queue,
            bucket: bucket.into(),
            dead_letter_queue_url: dead_letter_queue_url.into(),
            max_attempts,
            backoff,
        }
    }

    /// Storage key for a message id.
    pub fn object_key(message_id: &str) -> String {
        format!("messages/{message_id}.json")
    }

    /// Processes one message to a terminal outcome.
    ///
    /// A message is deleted from the source queue only after a confirmed
    /// store or a confirmed dead-letter send; it is never acknowledged
    /// without one of the two. Duplicate deliveries are processed
    /// independently; the store is an idempotent overwrite.
    pub async fn process(&self, message: &QueueMessage, shutdown: &ShutdownListener) {
        let span = tracing::info_span!(
            "process_message",
            message_id = %message.id,
            outcome = tracing::field::Empty,
        );

        let outcome = async {
            let key = Self::object_key(&message.id);
            let result = execute_with_retry(
                || self.store_then_delete(message, &key),
                self.max_attempts,
                &self.backoff,
                shutdown,
            )
            .await;

            match result {
                Ok(()) => {
                    info!(message_id = %message.id, key = %key, "message archived");
                    "archived"
                }
                Err(RetryError::Cancelled { attempts }) => {
                    warn!(
                        message_id = %message.id,
                        attempts,
                        "shutdown interrupted processing; message left for redelivery"
                    );
                    "cancelled"
                }
                Err(RetryError::Exhausted { error, attempts }) => {
                    error!(
                        message_id = %message.id,
                        attempts,
                        error = %error,
                        "retries exhausted; diverting to dead-letter queue"
                    );
                    self.divert(message, &error).await;
                    "diverted"
                }
            }
        }
        .instrument(span.clone())
        .await;

        span.record("outcome", outcome);
    }

    /// One retryable attempt: durable store, then delete from the source
    /// queue. Both must succeed for the attempt to count; a failed delete
    /// leaves the attempt failed and the store is retried with the same key
    /// and content.
    async fn store_then_delete(
        &self,
        message: &QueueMessage,
        key: &str,
    ) -> Result<(), ProcessError> {
        self.store
            .put(&self.bucket, key, CONTENT_TYPE, message.body.as_bytes())
            .await?;
        self.queue.delete_message(&message.receipt_handle).await?;
        Ok(())
    }

    /// Sends the original body and attributes to the dead-letter queue,
    /// then deletes the original message.
    ///
    /// Failures here are logged and swallowed: the message stays on the
    /// source queue and its visibility timeout hands it back for
    /// redelivery. There is no internal retry of the divert.
    async fn divert(&self, message: &QueueMessage, cause: &ProcessError) {
        let span = tracing::info_span!(
            "divert_to_dead_letter",
            message_id = %message.id,
            dead_letter_queue = %self.dead_letter_queue_url,
            error = %cause,
        );

        async {
            let sent = self
                .queue
                .send_message(
                    &self.dead_letter_queue_url,
                    &message.body,
                    &message.attributes,
                )
                .await;

            if let Err(e) = sent {
                error!(
                    message_id = %message.id,
                    error = %e,
                    "dead-letter send failed; message left for redelivery"
                );
                return;
            }

            match self.queue.delete_message(&message.receipt_handle).await {
                Ok(()) => {
                    warn!(message_id = %message.id, "message diverted to dead-letter queue");
                }
                Err(e) => {
                    // Redelivery will re-divert, which can duplicate the
                    // message in the dead-letter queue; at-least-once holds.
                    error!(
                        message_id = %message.id,
                        error = %e,
                        "failed to delete message after dead-letter send"
                    );
                }
            }
        }
        .instrument(span)
        .await;
    }
}
