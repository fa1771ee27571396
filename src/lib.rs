//! sluice: queue drain worker archiving SQS messages to S3.
//!
//! The worker continuously drains a source queue, stores each message body
//! at `messages/<message-id>.json` in the destination bucket, and deletes
//! the message on success. Messages that exhaust their retry budget are
//! diverted to a dead-letter queue instead of being lost or retried
//! forever.

// Core modules
pub mod aws;
pub mod cli;
pub mod config;
pub mod pipeline;
pub mod poller;
pub mod queue;
pub mod retry;
pub mod shutdown;
pub mod storage;

// Re-export the types most callers need
pub use config::AppConfig;
pub use pipeline::MessagePipeline;
pub use poller::{Poller, PollerConfig};
pub use queue::{QueueClient, QueueMessage};
pub use retry::{execute_with_retry, BackoffPolicy, RetryError};
pub use storage::ObjectStore;
