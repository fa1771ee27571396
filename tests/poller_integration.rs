//! End-to-end tests for the poll loop over in-memory collaborators.
//!
//! These exercise the full receive/store/delete path, the exhausted-retry
//! dead-letter divert path, and graceful shutdown, without any AWS
//! dependency.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use sluice::pipeline::MessagePipeline;
use sluice::poller::{Poller, PollerConfig};
use sluice::queue::{QueueClient, QueueError, QueueMessage};
use sluice::storage::{ObjectStore, PutReceipt, StorageError};
use sluice::BackoffPolicy;

/// In-memory queue: receives drain pending messages, deletes and
/// dead-letter sends are recorded.
#[derive(Default)]
struct InMemoryQueue {
    pending: Mutex<Vec<QueueMessage>>,
    deleted: Mutex<Vec<String>>,
    dead_letter: Mutex<Vec<(String, HashMap<String, String>)>>,
}

impl InMemoryQueue {
    fn enqueue(&self, message: QueueMessage) {
        self.pending.lock().expect("pending lock").push(message);
    }

    fn deleted_receipts(&self) -> Vec<String> {
        self.deleted.lock().expect("deleted lock").clone()
    }

    fn dead_lettered(&self) -> Vec<(String, HashMap<String, String>)> {
        self.dead_letter.lock().expect("dead letter lock").clone()
    }
}

#[async_trait]
impl QueueClient for InMemoryQueue {
    async fn receive_batch(
        &self,
        max_messages: u32,
        _wait_time: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let mut pending = self.pending.lock().expect("pending lock");
        let take = (max_messages as usize).min(pending.len());
        Ok(pending.drain(..take).collect())
    }

    async fn delete_message(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.deleted
            .lock()
            .expect("deleted lock")
            .push(receipt_handle.to_string());
        Ok(())
    }

    async fn send_message(
        &self,
        _target_queue_url: &str,
        body: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<(), QueueError> {
        self.dead_letter
            .lock()
            .expect("dead letter lock")
            .push((body.to_string(), attributes.clone()));
        Ok(())
    }
}

/// In-memory object store with an injectable failure mode.
#[derive(Default)]
struct InMemoryStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    put_attempts: AtomicU32,
    always_fail: AtomicBool,
}

impl InMemoryStore {
    fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().expect("objects lock").get(key).cloned()
    }

    fn object_count(&self) -> usize {
        self.objects.lock().expect("objects lock").len()
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn put(
        &self,
        _bucket: &str,
        key: &str,
        _content_type: &str,
        body: &[u8],
    ) -> Result<PutReceipt, StorageError> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);
        if self.always_fail.load(Ordering::SeqCst) {
            return Err(StorageError::Put {
                bucket: "archive".to_string(),
                key: key.to_string(),
                message: "injected outage".to_string(),
            });
        }
        self.objects
            .lock()
            .expect("objects lock")
            .insert(key.to_string(), body.to_vec());
        Ok(PutReceipt {
            etag: Some(format!("etag-{}", body.len())),
        })
    }
}

fn message(id: &str, body: &str) -> QueueMessage {
    QueueMessage {
        id: id.to_string(),
        body: body.to_string(),
        receipt_handle: format!("receipt-{id}"),
        attributes: HashMap::from([("source".to_string(), "orders".to_string())]),
    }
}

fn build_poller(queue: Arc<InMemoryQueue>, store: Arc<InMemoryStore>) -> Arc<Poller> {
    let backoff = BackoffPolicy::seeded(Duration::from_millis(1), Duration::from_millis(5), 11)
        .with_min_delay(Duration::from_millis(1));
    let pipeline = MessagePipeline::new(
        store,
        queue.clone(),
        "archive",
        "https://sqs.example/dlq",
        3,
        backoff,
    );
    let config = PollerConfig::default()
        .with_wait_time(Duration::from_millis(1))
        .with_poll_interval(Duration::from_millis(2))
        .with_error_backoff(Duration::from_millis(2));
    Arc::new(Poller::new(queue, pipeline, config))
}

/// Polls `condition` until it holds or the timeout elapses.
async fn wait_for(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within 5s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn archives_received_messages_and_deletes_them() {
    let queue = Arc::new(InMemoryQueue::default());
    let store = Arc::new(InMemoryStore::default());
    queue.enqueue(message("m1", "{\"x\":1}"));
    queue.enqueue(message("m2", "{\"x\":2}"));

    let poller = build_poller(queue.clone(), store.clone());
    let runner = {
        let poller = poller.clone();
        tokio::spawn(async move { poller.run().await })
    };

    wait_for(|| store.object_count() == 2).await;
    poller.stop();
    tokio::time::timeout(Duration::from_secs(1), runner)
        .await
        .expect("poller should stop promptly")
        .expect("runner should not panic")
        .expect("run should return Ok");

    let body = store
        .object("messages/m1.json")
        .expect("m1 should be archived");
    let value: serde_json::Value = serde_json::from_slice(&body).expect("stored body is JSON");
    assert_eq!(value, serde_json::json!({"x": 1}));
    assert!(store.object("messages/m2.json").is_some());

    let mut deleted = queue.deleted_receipts();
    deleted.sort();
    assert_eq!(deleted, vec!["receipt-m1", "receipt-m2"]);
    assert!(queue.dead_lettered().is_empty());
}

#[tokio::test]
async fn exhausted_messages_are_diverted_with_body_and_attributes() {
    let queue = Arc::new(InMemoryQueue::default());
    let store = Arc::new(InMemoryStore::default());
    store.always_fail.store(true, Ordering::SeqCst);
    queue.enqueue(message("doomed", "payload"));

    let poller = build_poller(queue.clone(), store.clone());
    let runner = {
        let poller = poller.clone();
        tokio::spawn(async move { poller.run().await })
    };

    wait_for(|| !queue.dead_lettered().is_empty()).await;
    poller.stop();
    tokio::time::timeout(Duration::from_secs(1), runner)
        .await
        .expect("poller should stop promptly")
        .expect("runner should not panic")
        .expect("run should return Ok");

    // The store was attempted exactly max_attempts times before diverting.
    assert_eq!(store.put_attempts.load(Ordering::SeqCst), 3);
    assert_eq!(store.object_count(), 0);

    let dead_lettered = queue.dead_lettered();
    assert_eq!(dead_lettered.len(), 1);
    assert_eq!(dead_lettered[0].0, "payload");
    assert_eq!(
        dead_lettered[0].1.get("source").map(String::as_str),
        Some("orders")
    );

    // The original was deleted only after the dead-letter send.
    assert_eq!(queue.deleted_receipts(), vec!["receipt-doomed"]);
}

#[tokio::test]
async fn stop_ends_an_idle_loop_promptly() {
    let queue = Arc::new(InMemoryQueue::default());
    let store = Arc::new(InMemoryStore::default());

    let poller = build_poller(queue, store);
    let runner = {
        let poller = poller.clone();
        tokio::spawn(async move { poller.run().await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(poller.is_running());
    poller.stop();

    tokio::time::timeout(Duration::from_secs(1), runner)
        .await
        .expect("poller should stop promptly")
        .expect("runner should not panic")
        .expect("run should return Ok");
    assert!(!poller.is_running());
}
