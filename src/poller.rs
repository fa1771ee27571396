//! Long-running poll loop over the source queue.
//!
//! The poller owns the run/stop lifecycle: receive a batch, hand each
//! message to the [`MessagePipeline`], sleep, repeat. Poll-level
//! infrastructure errors are logged and answered with a longer sleep;
//! they never terminate the loop. `stop` lets the iteration in progress
//! finish rather than abandoning it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, Instrument};

use crate::pipeline::MessagePipeline;
use crate::queue::{QueueClient, QueueError};
use crate::shutdown::{self, ShutdownListener, ShutdownSignal};

/// Errors that can occur when starting the poller.
#[derive(Debug, Error)]
pub enum PollerError {
    /// `run` was called while the loop is already running.
    #[error("poller is already running")]
    AlreadyRunning,
}

/// Configuration for the poll loop.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Maximum messages per receive call.
    pub batch_size: u32,
    /// Long-poll wait passed to the receive call.
    pub wait_time: Duration,
    /// Sleep between successful poll cycles.
    pub poll_interval: Duration,
    /// Sleep after a poll-level infrastructure error.
    pub error_backoff: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            wait_time: Duration::from_secs(20),
            poll_interval: Duration::from_secs(1),
            error_backoff: Duration::from_secs(5),
        }
    }
}

impl PollerConfig {
    /// Sets the maximum messages per receive call.
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the long-poll wait.
    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    /// Sets the sleep between successful cycles.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Sets the sleep after a failed cycle.
    pub fn with_error_backoff(mut self, error_backoff: Duration) -> Self {
        self.error_backoff = error_backoff;
        self
    }
}

/// Sequential receive-and-process loop with cooperative shutdown.
pub struct Poller {
    queue: Arc<dyn QueueClient>,
    pipeline: MessagePipeline,
    config: PollerConfig,
    signal: ShutdownSignal,
    listener: ShutdownListener,
    is_running: AtomicBool,
}

impl Poller {
    /// Creates a stopped poller. Call [`Poller::run`] to start it.
    pub fn new(queue: Arc<dyn QueueClient>, pipeline: MessagePipeline, config: PollerConfig) -> Self {
        let (signal, listener) = shutdown::channel();
        Self {
            queue,
            pipeline,
            config,
            signal,
            listener,
            is_running: AtomicBool::new(false),
        }
    }

    /// Runs the poll loop until [`Poller::stop`] is called.
    ///
    /// Processing errors are terminal per message inside the pipeline and
    /// poll-level errors only lengthen the next sleep, so this returns only
    /// after a stop signal (or immediately with
    /// [`PollerError::AlreadyRunning`]).
    pub async fn run(&self) -> Result<(), PollerError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(PollerError::AlreadyRunning);
        }

        info!(
            batch_size = self.config.batch_size,
            wait_time_secs = self.config.wait_time.as_secs(),
            "poller started"
        );

        while !self.listener.is_triggered() {
            match self.poll_cycle().await {
                Ok(_received) => {
                    self.listener.sleep(self.config.poll_interval).await;
                }
                Err(e) => {
                    error!(error = %e, "poll cycle failed");
                    self.listener.sleep(self.config.error_backoff).await;
                }
            }
        }

        self.is_running.store(false, Ordering::SeqCst);
        info!("poller stopped");
        Ok(())
    }

    /// Signals the loop to exit once the iteration in progress completes.
    /// Does not interrupt an in-flight message.
    pub fn stop(&self) {
        info!("stopping poller");
        self.signal.trigger();
    }

    /// Whether the loop is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// One receive-and-process cycle. Returns the number of messages
    /// received.
    ///
    /// Messages are processed sequentially in receipt order. The shutdown
    /// flag is re-checked between messages so a stop during a large batch
    /// does not start work that would immediately be cancelled; the
    /// message being processed is always allowed to finish.
    pub async fn poll_cycle(&self) -> Result<usize, QueueError> {
        let span = tracing::info_span!("poll_cycle", received = tracing::field::Empty);

        async {
            let messages = self
                .queue
                .receive_batch(self.config.batch_size, self.config.wait_time)
                .await?;

            tracing::Span::current().record("received", messages.len());
            if messages.is_empty() {
                debug!("no messages received");
            } else {
                info!(count = messages.len(), "received messages");
            }

            for message in &messages {
                if self.listener.is_triggered() {
                    debug!("shutdown requested; leaving rest of batch for redelivery");
                    break;
                }
                self.pipeline.process(message, &self.listener).await;
            }

            Ok(messages.len())
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::queue::QueueMessage;
    use crate::retry::BackoffPolicy;
    use crate::storage::{ObjectStore, PutReceipt, StorageError};

    #[derive(Default)]
    struct CountingStore {
        puts: AtomicU32,
    }

    #[async_trait]
    impl ObjectStore for CountingStore {
        async fn put(
            &self,
            _bucket: &str,
            _key: &str,
            _content_type: &str,
            _body: &[u8],
        ) -> Result<PutReceipt, StorageError> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            Ok(PutReceipt { etag: None })
        }
    }

    /// Queue serving a fixed sequence of batches, then empty batches.
    #[derive(Default)]
    struct ScriptedQueue {
        batches: Mutex<Vec<Vec<QueueMessage>>>,
        receive_calls: AtomicU32,
        fail_receives: AtomicBool,
        deletes: AtomicU32,
    }

    #[async_trait]
    impl QueueClient for ScriptedQueue {
        async fn receive_batch(
            &self,
            _max_messages: u32,
            _wait_time: Duration,
        ) -> Result<Vec<QueueMessage>, QueueError> {
            self.receive_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_receives.load(Ordering::SeqCst) {
                return Err(QueueError::Receive("injected receive failure".to_string()));
            }
            let mut batches = self.batches.lock().expect("batches lock");
            if batches.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(batches.remove(0))
            }
        }

        async fn delete_message(&self, _receipt_handle: &str) -> Result<(), QueueError> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn send_message(
            &self,
            _target_queue_url: &str,
            _body: &str,
            _attributes: &HashMap<String, String>,
        ) -> Result<(), QueueError> {
            Ok(())
        }
    }

    fn message(id: &str) -> QueueMessage {
        QueueMessage {
            id: id.to_string(),
            body: format!("body-{id}"),
            receipt_handle: format!("receipt-{id}"),
            attributes: HashMap::new(),
        }
    }

    fn poller(queue: Arc<ScriptedQueue>, store: Arc<CountingStore>) -> Poller {
        let backoff = BackoffPolicy::seeded(Duration::from_millis(1), Duration::from_millis(5), 1)
            .with_min_delay(Duration::from_millis(1));
        let pipeline = MessagePipeline::new(store, queue.clone(), "archive", "dlq-url", 3, backoff);
        let config = PollerConfig::default()
            .with_wait_time(Duration::from_millis(1))
            .with_poll_interval(Duration::from_millis(1))
            .with_error_backoff(Duration::from_millis(1));
        Poller::new(queue, pipeline, config)
    }

    #[test]
    fn config_defaults_match_the_recognized_options() {
        let config = PollerConfig::default();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.wait_time, Duration::from_secs(20));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.error_backoff, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn one_cycle_processes_each_received_message_once() {
        let queue = Arc::new(ScriptedQueue::default());
        queue
            .batches
            .lock()
            .expect("batches lock")
            .push(vec![message("m1"), message("m2")]);
        let store = Arc::new(CountingStore::default());

        let received = poller(queue.clone(), store.clone())
            .poll_cycle()
            .await
            .expect("cycle should succeed");

        assert_eq!(received, 2);
        assert_eq!(queue.receive_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.puts.load(Ordering::SeqCst), 2);
        assert_eq!(queue.deletes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_batch_never_touches_the_pipeline() {
        let queue = Arc::new(ScriptedQueue::default());
        let store = Arc::new(CountingStore::default());

        let received = poller(queue.clone(), store.clone())
            .poll_cycle()
            .await
            .expect("cycle should succeed");

        assert_eq!(received, 0);
        assert_eq!(store.puts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn receive_errors_propagate_from_a_single_cycle() {
        let queue = Arc::new(ScriptedQueue::default());
        queue.fail_receives.store(true, Ordering::SeqCst);
        let store = Arc::new(CountingStore::default());

        let result = poller(queue, store).poll_cycle().await;
        assert!(matches!(result, Err(QueueError::Receive(_))));
    }

    #[tokio::test]
    async fn run_survives_poll_level_errors() {
        let queue = Arc::new(ScriptedQueue::default());
        queue.fail_receives.store(true, Ordering::SeqCst);
        let store = Arc::new(CountingStore::default());
        let poller = Arc::new(poller(queue.clone(), store));

        let runner = {
            let poller = poller.clone();
            tokio::spawn(async move { poller.run().await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        poller.stop();
        tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .expect("run should stop promptly")
            .expect("run task should not panic")
            .expect("run should return Ok");

        // The loop kept polling after failures instead of exiting.
        assert!(queue.receive_calls.load(Ordering::SeqCst) >= 2);
        assert!(!poller.is_running());
    }

    #[tokio::test]
    async fn run_processes_until_stopped() {
        let queue = Arc::new(ScriptedQueue::default());
        queue
            .batches
            .lock()
            .expect("batches lock")
            .push(vec![message("m1")]);
        let store = Arc::new(CountingStore::default());
        let poller = Arc::new(poller(queue.clone(), store.clone()));

        let runner = {
            let poller = poller.clone();
            tokio::spawn(async move { poller.run().await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(poller.is_running());
        poller.stop();
        tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .expect("run should stop promptly")
            .expect("run task should not panic")
            .expect("run should return Ok");

        assert_eq!(store.puts.load(Ordering::SeqCst), 1);
        assert!(!poller.is_running());
    }

    #[tokio::test]
    async fn second_run_reports_already_running() {
        let queue = Arc::new(ScriptedQueue::default());
        let store = Arc::new(CountingStore::default());
        let poller = Arc::new(poller(queue, store));

        let runner = {
            let poller = poller.clone();
            tokio::spawn(async move { poller.run().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(matches!(poller.run().await, Err(PollerError::AlreadyRunning)));

        poller.stop();
        tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .expect("run should stop promptly")
            .expect("run task should not panic")
            .expect("run should return Ok");
    }
}
