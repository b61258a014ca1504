//! Typed inbound façade for one-shot receives.

use crate::adapter::{self, MessageAdapter, ReceiveOptions};
use crate::config::QueueSettings;
use crate::error::{AdapterError, MessagingError};
use crate::message::Message;
use crate::serializer::Serializer;
use std::sync::Arc;
use tracing::{debug, warn};

/// A decoded value together with its envelope.
#[derive(Debug, Clone)]
pub struct Received<T> {
    pub value: T,
    pub message: Message,
}

/// Receives messages from one queue and deserializes them to `T`.
pub struct MessageReceiver<T> {
    settings: Arc<QueueSettings>,
    adapter: Arc<dyn MessageAdapter>,
    serializer: Arc<dyn Serializer<T>>,
}

impl<T: Send + 'static> MessageReceiver<T> {
    pub fn new(
        settings: Arc<QueueSettings>,
        adapter: Arc<dyn MessageAdapter>,
        serializer: Arc<dyn Serializer<T>>,
    ) -> Self {
        Self {
            settings,
            adapter,
            serializer,
        }
    }

    pub fn adapter(&self) -> &Arc<dyn MessageAdapter> {
        &self.adapter
    }

    /// Blocking receive with the configured timeout.
    pub async fn receive(&self) -> Result<Received<T>, MessagingError> {
        self.receive_with(ReceiveOptions::new()).await
    }

    /// Blocking receive.
    ///
    /// Fails with [`MessagingError::Empty`] when nothing arrived in time.
    pub async fn receive_with(&self, options: ReceiveOptions) -> Result<Received<T>, MessagingError> {
        adapter::ensure_connected(self.adapter.as_ref()).await?;

        match self.adapter.receive(self.bounded(options)).await {
            Ok(message) => self.decode(message).await,
            Err(AdapterError::NoMessage) => Err(MessagingError::Empty {
                queue: self.settings.queue_name.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Non-blocking receive; `Ok(None)` when the queue is empty.
    pub async fn try_receive(&self) -> Result<Option<Received<T>>, MessagingError> {
        self.try_receive_with(ReceiveOptions::new()).await
    }

    pub async fn try_receive_with(
        &self,
        options: ReceiveOptions,
    ) -> Result<Option<Received<T>>, MessagingError> {
        adapter::ensure_connected(self.adapter.as_ref()).await?;

        match self.adapter.try_receive(options).await? {
            Some(message) => self.decode(message).await.map(Some),
            None => Ok(None),
        }
    }

    fn bounded(&self, options: ReceiveOptions) -> ReceiveOptions {
        if options.timeout.is_some() {
            return options;
        }
        options.with_timeout(self.settings.receive_timeout())
    }

    /// Deserialize, committing on success and rolling back on failure.
    async fn decode(&self, message: Message) -> Result<Received<T>, MessagingError> {
        match self.serializer.deserialize(&message) {
            Ok(value) => {
                adapter::commit_if_transacted(self.adapter.as_ref(), &message).await?;
                debug!(
                    queue_id = %self.settings.id,
                    message_id = %message.message_id,
                    "Message received"
                );
                Ok(Received { value, message })
            }
            Err(e) => {
                warn!(
                    queue_id = %self.settings.id,
                    message_id = %message.message_id,
                    body = %message.log_body(),
                    error = %e,
                    "Failed to deserialize message"
                );
                adapter::rollback_if_transacted(self.adapter.as_ref()).await?;
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryAdapter, InMemoryBroker};
    use crate::serializer::{BytesSerializer, JsonSerializer};
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    fn settings(transacted: bool) -> Arc<QueueSettings> {
        Arc::new(
            QueueSettings::new("orders", "mem://local", "ORDERS")
                .with_receive_timeout(Duration::from_millis(20))
                .with_transacted(transacted),
        )
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Order {
        id: u32,
    }

    fn json_receiver(broker: &InMemoryBroker, transacted: bool) -> (Arc<InMemoryAdapter>, MessageReceiver<Order>) {
        let settings = settings(transacted);
        let adapter = Arc::new(InMemoryAdapter::new(broker.clone(), Arc::clone(&settings)));
        let receiver = MessageReceiver::new(settings, adapter.clone(), Arc::new(JsonSerializer::<Order>::new()));
        (adapter, receiver)
    }

    #[tokio::test]
    async fn test_blocking_receive_reports_empty() {
        let broker = InMemoryBroker::new();
        let (adapter, receiver) = json_receiver(&broker, false);

        let err = receiver.receive().await.unwrap_err();
        assert!(err.is_empty());
        assert!(matches!(err, MessagingError::Empty { ref queue } if queue == "ORDERS"));
        // Connected on demand
        assert!(adapter.is_connected());
    }

    #[tokio::test]
    async fn test_non_blocking_receive_reports_none() {
        let broker = InMemoryBroker::new();
        let (_, receiver) = json_receiver(&broker, false);
        assert!(receiver.try_receive().await.unwrap().is_none());

        broker.publish("ORDERS", Message::text(r#"{"id":3}"#));
        let received = receiver.try_receive().await.unwrap().unwrap();
        assert_eq!(received.value, Order { id: 3 });
    }

    #[tokio::test]
    async fn test_correlation_filter() {
        let broker = InMemoryBroker::new();
        let (_, receiver) = json_receiver(&broker, false);
        broker.publish("ORDERS", Message::text(r#"{"id":1}"#).with_correlation_id("a"));
        broker.publish("ORDERS", Message::text(r#"{"id":2}"#).with_correlation_id("b"));

        let received = receiver
            .receive_with(ReceiveOptions::new().with_correlation_id("b"))
            .await
            .unwrap();
        assert_eq!(received.value, Order { id: 2 });
        assert_eq!(broker.depth("ORDERS"), 1);
    }

    #[tokio::test]
    async fn test_bad_payload_rolls_back() {
        let broker = InMemoryBroker::new();
        let (adapter, receiver) = json_receiver(&broker, true);
        broker.publish("ORDERS", Message::text("not json"));

        let err = receiver.receive().await.unwrap_err();
        assert!(matches!(err, MessagingError::Serialization(_)));
        assert_eq!(adapter.calls().rollback, 1);
        assert_eq!(adapter.calls().commit, 0);
        // Back at the head of the queue for the next attempt
        assert_eq!(broker.depth("ORDERS"), 1);
    }

    #[tokio::test]
    async fn test_binary_payload() {
        let broker = InMemoryBroker::new();
        let settings = settings(false);
        let adapter = Arc::new(InMemoryAdapter::new(broker.clone(), Arc::clone(&settings)));
        let receiver = MessageReceiver::<Vec<u8>>::new(settings, adapter, Arc::new(BytesSerializer));

        broker.publish("ORDERS", Message::binary(vec![0u8, 159, 146, 150]));
        let received = receiver.receive().await.unwrap();
        assert_eq!(received.value, vec![0u8, 159, 146, 150]);
    }
}
