//! Queue collaborator interface and the SQS implementation.
//!
//! The pipeline and poller talk to the queue through the [`QueueClient`]
//! trait: receive a batch from the source queue, delete one message by
//! receipt handle, send one message to an arbitrary queue (used for the
//! dead-letter divert). [`SqsQueue`] is the production implementation;
//! tests substitute in-memory fakes.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::MessageAttributeValue;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The receive call itself failed (poll-level infrastructure error).
    #[error("failed to receive messages: {0}")]
    Receive(String),

    /// Deleting a message by receipt handle failed.
    #[error("failed to delete message: {0}")]
    Delete(String),

    /// Sending a message to `queue` failed.
    #[error("failed to send message to {queue}: {message}")]
    Send { queue: String, message: String },

    /// A message attribute could not be encoded for sending.
    #[error("invalid message attribute '{name}': {message}")]
    Attribute { name: String, message: String },
}

/// A message received from the source queue.
///
/// The pipeline treats the body as opaque and stores it verbatim. The
/// receipt handle is only valid until the queue's visibility timeout
/// expires; attributes ride along unchanged when the message is diverted.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    /// Queue-assigned message identifier; unique per receive.
    pub id: String,
    /// Opaque payload.
    pub body: String,
    /// Handle required to delete this delivery of the message.
    pub receipt_handle: String,
    /// String message attributes, preserved verbatim on divert.
    pub attributes: HashMap<String, String>,
}

/// Queue operations the core needs from its messaging collaborator.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Receives up to `max_messages`, long-polling for at most `wait_time`.
    async fn receive_batch(
        &self,
        max_messages: u32,
        wait_time: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    /// Deletes one message from the source queue.
    async fn delete_message(&self, receipt_handle: &str) -> Result<(), QueueError>;

    /// Sends a message with attributes to `target_queue_url`.
    async fn send_message(
        &self,
        target_queue_url: &str,
        body: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<(), QueueError>;
}

/// SQS-backed [`QueueClient`] bound to one source queue.
#[derive(Debug, Clone)]
pub struct SqsQueue {
    client: aws_sdk_sqs::Client,
    queue_url: String,
}

impl SqsQueue {
    /// Creates a client bound to the given source queue URL.
    pub fn new(client: aws_sdk_sqs::Client, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
        }
    }

    /// URL of the source queue this client receives from and deletes on.
    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

#[async_trait]
impl QueueClient for SqsQueue {
    async fn receive_batch(
        &self,
        max_messages: u32,
        wait_time: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages as i32)
            .wait_time_seconds(wait_time.as_secs() as i32)
            .message_attribute_names("All")
            .send()
            .await
            .map_err(|e| QueueError::Receive(DisplayErrorContext(&e).to_string()))?;

        Ok(output
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(message_from_sqs)
            .collect())
    }

    async fn delete_message(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::Delete(DisplayErrorContext(&e).to_string()))?;

        debug!(queue = %self.queue_url, "deleted message");
        Ok(())
    }

    async fn send_message(
        &self,
        target_queue_url: &str,
        body: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<(), QueueError> {
        let mut request = self
            .client
            .send_message()
            .queue_url(target_queue_url)
            .message_body(body);

        for (name, value) in attributes {
            let attribute = MessageAttributeValue::builder()
                .data_type("String")
                .string_value(value)
                .build()
                .map_err(|e| QueueError::Attribute {
                    name: name.clone(),
                    message: e.to_string(),
                })?;
            request = request.message_attributes(name, attribute);
        }

        request.send().await.map_err(|e| QueueError::Send {
            queue: target_queue_url.to_string(),
            message: DisplayErrorContext(&e).to_string(),
        })?;

        Ok(())
    }
}

/// Converts a raw SQS message into the pipeline's [`QueueMessage`].
///
/// Non-string attributes (binary, number lists) have no string value and
/// are skipped; the original forwards only what it can re-send verbatim.
fn message_from_sqs(message: aws_sdk_sqs::types::Message) -> QueueMessage {
    let attributes = message
        .message_attributes
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(name, value)| match value.string_value {
            Some(v) => Some((name, v)),
            None => {
                debug!(attribute = %name, "skipping non-string message attribute");
                None
            }
        })
        .collect();

    QueueMessage {
        id: message.message_id.unwrap_or_default(),
        body: message.body.unwrap_or_default(),
        receipt_handle: message.receipt_handle.unwrap_or_default(),
        attributes,
    }
}
