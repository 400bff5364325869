//! Delivery backend adapters.
//!
//! A [`Sender`] knows how to transmit one batch to one backend; a
//! [`BufferedConsumer`] owns the FIFO queue in front of a sender and turns
//! transport failures into logged, counted outcomes. Delivery is best-effort:
//! after one immediate retry a batch is dropped with enough logged context to
//! replay it manually.

use crate::error::DeliveryError;
use crate::models::{Endpoint, FlushResult, Message};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Largest batch the ingestion APIs accept in one request.
pub const MAX_BATCH_SIZE: usize = 50;

/// Transmits pre-validated message batches to one backend.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Send one batch, at most [`MAX_BATCH_SIZE`] messages, all for the
    /// same endpoint.
    async fn send_batch(&self, endpoint: Endpoint, batch: &[Message]) -> Result<(), DeliveryError>;

    /// Backend name for logging.
    fn name(&self) -> &'static str;
}

/// FIFO buffer in front of a [`Sender`].
///
/// `enqueue` appends under a mutex and never performs I/O, so it is safe to
/// call from request handlers; only `flush` touches the network. The queue
/// is cleared by `flush` whether or not every batch made it out.
pub struct BufferedConsumer {
    sender: Arc<dyn Sender>,
    queue: Mutex<VecDeque<Message>>,
}

impl BufferedConsumer {
    pub fn new(sender: Arc<dyn Sender>) -> Self {
        Self {
            sender,
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a pre-validated message to the queue.
    pub fn enqueue(&self, message: Message) {
        let mut queue = self.queue.lock().expect("consumer queue poisoned");
        queue.push_back(message);
    }

    pub fn len(&self) -> usize {
        self.queue.lock().expect("consumer queue poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything queued without transmitting.
    pub fn clear(&self) {
        self.queue.lock().expect("consumer queue poisoned").clear();
    }

    /// Transmit all queued messages in endpoint-grouped, size-capped
    /// batches. Each failed batch is retried once; a batch that fails twice
    /// is logged with replay context and counted in `failed`.
    pub async fn flush(&self) -> FlushResult {
        let drained: Vec<Message> = {
            let mut queue = self.queue.lock().expect("consumer queue poisoned");
            queue.drain(..).collect()
        };

        if drained.is_empty() {
            return FlushResult::default();
        }

        let mut result = FlushResult::default();
        for endpoint in [Endpoint::Events, Endpoint::People] {
            let group: Vec<&Message> = drained.iter().filter(|m| m.endpoint == endpoint).collect();
            for chunk in group.chunks(MAX_BATCH_SIZE) {
                let batch: Vec<Message> = chunk.iter().map(|m| (*m).clone()).collect();
                match self.send_with_retry(endpoint, &batch).await {
                    Ok(()) => result.sent += batch.len(),
                    Err(err) => {
                        result.failed += batch.len();
                        let events: Vec<&str> =
                            batch.iter().filter_map(Message::event_name).collect();
                        let distinct_ids: Vec<&str> =
                            batch.iter().map(|m| m.distinct_id.as_str()).collect();
                        error!(
                            backend = self.sender.name(),
                            endpoint = %endpoint,
                            error = %err,
                            count = batch.len(),
                            events = ?events,
                            distinct_ids = ?distinct_ids,
                            "Analytics batch dropped after retry"
                        );
                    }
                }
            }
        }

        debug!(
            backend = self.sender.name(),
            sent = result.sent,
            failed = result.failed,
            "Consumer flushed"
        );
        result
    }

    async fn send_with_retry(
        &self,
        endpoint: Endpoint,
        batch: &[Message],
    ) -> Result<(), DeliveryError> {
        if let Err(first) = self.sender.send_batch(endpoint, batch).await {
            warn!(
                backend = self.sender.name(),
                endpoint = %endpoint,
                error = %first,
                "Batch send failed, retrying once"
            );
            return self.sender.send_batch(endpoint, batch).await;
        }
        Ok(())
    }
}

/// Live sender for the primary ingestion API.
pub struct MixpanelSender {
    client: reqwest::Client,
    api_host: String,
}

impl MixpanelSender {
    pub const DEFAULT_API_HOST: &'static str = "https://api.mixpanel.com";

    pub fn new() -> Self {
        Self::with_api_host(Self::DEFAULT_API_HOST)
    }

    /// Point the sender at a different host, e.g. a local stub in tests.
    pub fn with_api_host(api_host: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_host: api_host.into(),
        }
    }

    fn endpoint_path(endpoint: Endpoint) -> &'static str {
        match endpoint {
            Endpoint::Events => "/track",
            Endpoint::People => "/engage",
        }
    }
}

impl Default for MixpanelSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sender for MixpanelSender {
    async fn send_batch(&self, endpoint: Endpoint, batch: &[Message]) -> Result<(), DeliveryError> {
        let payloads: Vec<&Value> = batch.iter().map(|m| &m.payload).collect();
        let data = serde_json::to_string(&payloads).map_err(|e| DeliveryError::Encoding {
            backend: self.name(),
            message: e.to_string(),
        })?;

        let url = format!("{}{}", self.api_host, Self::endpoint_path(endpoint));
        let response = self
            .client
            .post(&url)
            .form(&[("data", data.as_str()), ("verbose", "1")])
            .send()
            .await
            .map_err(|e| DeliveryError::Transport {
                backend: self.name(),
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(DeliveryError::Rejected {
                backend: self.name(),
                status: status.as_u16(),
                body,
            });
        }

        // With verbose=1 the API reports per-request acceptance in the body.
        let accepted = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("status").and_then(Value::as_i64))
            == Some(1);
        if !accepted {
            return Err(DeliveryError::Rejected {
                backend: self.name(),
                status: status.as_u16(),
                body,
            });
        }

        info!(endpoint = %endpoint, count = batch.len(), "Batch accepted by Mixpanel");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mixpanel"
    }
}

/// Mock-mode sender that records messages instead of transmitting them.
///
/// Clones share the same store, so a test can keep one handle and inspect
/// what the middleware delivered after the request completed. Part of the
/// public test-support surface.
#[derive(Clone, Default)]
pub struct RecordingSender {
    records: Arc<Mutex<Vec<Message>>>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far, in delivery order.
    pub fn records(&self) -> Vec<Message> {
        self.records.lock().expect("recording store poisoned").clone()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().expect("recording store poisoned").is_empty()
    }
}

#[async_trait]
impl Sender for RecordingSender {
    async fn send_batch(&self, _endpoint: Endpoint, batch: &[Message]) -> Result<(), DeliveryError> {
        let mut records = self.records.lock().expect("recording store poisoned");
        records.extend_from_slice(batch);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use mockall::predicate::eq;
    use serde_json::json;

    mock! {
        pub Backend {}

        #[async_trait]
        impl Sender for Backend {
            async fn send_batch(
                &self,
                endpoint: Endpoint,
                batch: &[Message],
            ) -> Result<(), DeliveryError>;
            fn name(&self) -> &'static str;
        }
    }

    fn message(n: usize) -> Message {
        Message {
            endpoint: Endpoint::Events,
            distinct_id: format!("user-{}", n),
            payload: json!({"event": format!("Event {}", n), "properties": {}}),
        }
    }

    fn transport_error() -> DeliveryError {
        DeliveryError::Transport {
            backend: "mock",
            message: "connection refused".to_string(),
        }
    }

    #[tokio::test]
    async fn test_flush_preserves_fifo_order() {
        let sender = RecordingSender::new();
        let consumer = BufferedConsumer::new(Arc::new(sender.clone()));

        for n in 0..5 {
            consumer.enqueue(message(n));
        }
        let result = consumer.flush().await;

        assert_eq!(result, FlushResult { sent: 5, failed: 0 });
        let names: Vec<String> = sender
            .records()
            .iter()
            .map(|m| m.event_name().unwrap().to_string())
            .collect();
        assert_eq!(names, ["Event 0", "Event 1", "Event 2", "Event 3", "Event 4"]);
        assert!(consumer.is_empty());
    }

    #[tokio::test]
    async fn test_flush_chunks_large_queues() {
        let mut backend = MockBackend::new();
        backend.expect_name().return_const("mock");
        // 120 messages -> 50 + 50 + 20.
        backend
            .expect_send_batch()
            .with(eq(Endpoint::Events), mockall::predicate::always())
            .times(3)
            .returning(|_, _| Ok(()));

        let consumer = BufferedConsumer::new(Arc::new(backend));
        for n in 0..120 {
            consumer.enqueue(message(n));
        }

        let result = consumer.flush().await;
        assert_eq!(result, FlushResult { sent: 120, failed: 0 });
    }

    #[tokio::test]
    async fn test_failed_batch_retried_exactly_once() {
        let mut backend = MockBackend::new();
        backend.expect_name().return_const("mock");
        // First attempt fails, the single retry succeeds.
        backend
            .expect_send_batch()
            .times(2)
            .returning({
                let mut attempts = 0;
                move |_, _| {
                    attempts += 1;
                    if attempts == 1 {
                        Err(transport_error())
                    } else {
                        Ok(())
                    }
                }
            });

        let consumer = BufferedConsumer::new(Arc::new(backend));
        consumer.enqueue(message(1));

        let result = consumer.flush().await;
        assert_eq!(result, FlushResult { sent: 1, failed: 0 });
    }

    #[tokio::test]
    async fn test_queue_cleared_even_when_delivery_fails() {
        let mut backend = MockBackend::new();
        backend.expect_name().return_const("mock");
        // Both the attempt and the retry fail; no further attempts.
        backend
            .expect_send_batch()
            .times(2)
            .returning(|_, _| Err(transport_error()));

        let consumer = BufferedConsumer::new(Arc::new(backend));
        consumer.enqueue(message(1));
        consumer.enqueue(message(2));

        let result = consumer.flush().await;
        assert_eq!(result, FlushResult { sent: 0, failed: 2 });
        assert!(consumer.is_empty());

        // A second flush finds nothing to send.
        let result = consumer.flush().await;
        assert_eq!(result, FlushResult::default());
    }

    #[tokio::test]
    async fn test_clear_drops_without_transmitting() {
        let sender = RecordingSender::new();
        let consumer = BufferedConsumer::new(Arc::new(sender.clone()));

        consumer.enqueue(message(1));
        consumer.clear();

        assert!(consumer.is_empty());
        assert!(sender.is_empty());
    }

    #[test]
    fn test_recording_sender_clones_share_store() {
        let sender = RecordingSender::new();
        let clone = sender.clone();

        let consumer = BufferedConsumer::new(Arc::new(clone));
        consumer.enqueue(message(1));
        // Not flushed yet: nothing recorded.
        assert!(sender.is_empty());
    }
}
