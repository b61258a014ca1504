//! Request/reply façade.
//!
//! [`RpcSender`] sends a request and waits for the reply that carries the
//! same correlation id. The exchange uses the driver's own request/reply
//! support when it has one; otherwise it sends on the request adapter and
//! waits on a separate adapter bound to the reply queue.

use crate::adapter::{self, MessageAdapter, ReceiveOptions};
use crate::error::{ConfigError, MessagingError};
use crate::message::Message;
use crate::receiver::Received;
use crate::sender::{MessageSender, SendOptions};
use crate::serializer::Serializer;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Typed request/reply client for one queue.
pub struct RpcSender<Req, Resp> {
    sender: MessageSender<Req>,
    response: Arc<dyn Serializer<Resp>>,
    reply_adapter: Option<Arc<dyn MessageAdapter>>,
    timeout: Option<Duration>,
}

impl<Req, Resp> RpcSender<Req, Resp>
where
    Req: Send + Sync + 'static,
    Resp: Send + 'static,
{
    pub fn new(sender: MessageSender<Req>, response: Arc<dyn Serializer<Resp>>) -> Self {
        Self {
            sender,
            response,
            reply_adapter: None,
            timeout: None,
        }
    }

    /// Adapter bound to the reply queue, for drivers without request/reply.
    pub fn with_reply_adapter(mut self, adapter: Arc<dyn MessageAdapter>) -> Self {
        self.reply_adapter = Some(adapter);
        self
    }

    /// Default bound on the wait for a reply. Unset waits indefinitely.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Send `request` and return the decoded reply.
    pub async fn call(&self, request: &Req) -> Result<Resp, MessagingError> {
        self.call_with(request, SendOptions::default(), self.timeout)
            .await
            .map(|received| received.value)
    }

    /// Send `request` and wait up to `timeout` for the correlated reply.
    ///
    /// A correlation id is generated when `options` carries none.
    #[instrument(skip_all, fields(queue_id = %self.sender.settings().id, correlation_id = tracing::field::Empty))]
    pub async fn call_with(
        &self,
        request: &Req,
        options: SendOptions,
        timeout: Option<Duration>,
    ) -> Result<Received<Resp>, MessagingError> {
        let correlation_id = options
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        tracing::Span::current().record("correlation_id", correlation_id.as_str());

        let options = options.with_correlation_id(correlation_id.clone());
        let message = self.sender.prepare(request, options)?;

        let exchange = self.exchange(message, &correlation_id);
        let outcome = match timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .unwrap_or_else(|_| Err(self.timed_out(&correlation_id, limit))),
            None => exchange.await,
        };

        let response = match outcome {
            Err(MessagingError::Adapter(e)) if e.is_timeout() => {
                return Err(self.timed_out(&correlation_id, timeout.unwrap_or_default()));
            }
            other => other?,
        };

        debug!(
            message_id = %response.message_id,
            body = %response.log_body(),
            "Reply received"
        );
        let value = self.response.deserialize(&response)?;
        Ok(Received {
            value,
            message: response,
        })
    }

    fn timed_out(&self, correlation_id: &str, timeout: Duration) -> MessagingError {
        warn!(correlation_id, ?timeout, "No reply within timeout");
        MessagingError::Timeout {
            correlation_id: correlation_id.to_string(),
            timeout,
        }
    }

    async fn exchange(&self, mut request: Message, correlation_id: &str) -> Result<Message, MessagingError> {
        let driver = self.sender.adapter().as_ref();
        adapter::ensure_connected(driver).await?;

        if let Some(subscriber) = driver.as_subscriber() {
            return Ok(subscriber.request_and_wait_response(request).await?);
        }

        let reply = self
            .reply_adapter
            .as_deref()
            .ok_or_else(|| ConfigError::MissingCapability {
                queue_id: self.sender.settings().id.clone(),
                capability: "request/reply",
            })?;
        adapter::ensure_connected(reply).await?;

        if request.reply_to.is_none() {
            request.reply_to = Some(reply.queue_name().to_string());
        }
        let sent = driver.send(request).await?;
        adapter::commit_if_transacted(driver, &sent).await?;

        let options = ReceiveOptions::new().with_correlation_id(correlation_id);
        loop {
            match reply.receive(options.clone()).await {
                Ok(response) => {
                    adapter::commit_if_transacted(reply, &response).await?;
                    return Ok(response);
                }
                Err(e) if e.is_no_message() => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueSettings;
    use crate::memory::{InMemoryAdapter, InMemoryBroker};
    use crate::serializer::TextSerializer;

    fn settings() -> Arc<QueueSettings> {
        Arc::new(
            QueueSettings::new("pricing", "mem://local", "PRICING")
                .with_reply_queue("PRICING.REPLY")
                .with_receive_timeout(Duration::from_millis(50)),
        )
    }

    fn rpc(adapter: InMemoryAdapter, settings: Arc<QueueSettings>) -> RpcSender<String, String> {
        let sender = MessageSender::<String>::new(settings, Arc::new(adapter), Arc::new(TextSerializer));
        RpcSender::new(sender, Arc::new(TextSerializer))
    }

    /// Answer one request on PRICING with "re:<body>".
    fn respond_once(broker: &InMemoryBroker) -> tokio::task::JoinHandle<()> {
        let broker = broker.clone();
        tokio::spawn(async move {
            let request = broker.wait_for("PRICING", None, None).await.unwrap();
            let response = Message::text(format!("re:{}", request.body_text()))
                .with_correlation_id(request.correlation_id.clone().unwrap());
            broker.publish(request.reply_to.as_deref().unwrap(), response);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_without_reply() {
        let broker = InMemoryBroker::new();
        let settings = settings();
        let rpc = rpc(InMemoryAdapter::new(broker.clone(), Arc::clone(&settings)), settings);

        let err = rpc
            .call_with(
                &"quote".to_string(),
                SendOptions::new().with_correlation_id("abc"),
                Some(Duration::from_secs(5)),
            )
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(matches!(
            err,
            MessagingError::Timeout { ref correlation_id, timeout }
                if correlation_id == "abc" && timeout == Duration::from_secs(5)
        ));
    }

    #[tokio::test]
    async fn test_round_trip_through_driver_request_reply() {
        let broker = InMemoryBroker::new();
        let settings = settings();
        let rpc = rpc(InMemoryAdapter::new(broker.clone(), Arc::clone(&settings)), settings)
            .with_timeout(Duration::from_secs(5));

        let responder = respond_once(&broker);
        let reply = rpc.call(&"quote".to_string()).await.unwrap();
        assert_eq!(reply, "re:quote");
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_round_trip_through_reply_adapter() {
        let broker = InMemoryBroker::new();
        let settings = settings();
        let request = InMemoryAdapter::new(broker.clone(), Arc::clone(&settings)).without_subscribe();
        let reply_settings = Arc::new(QueueSettings::new("pricing.reply", "mem://local", "PRICING.REPLY"));
        let reply = Arc::new(InMemoryAdapter::new(broker.clone(), reply_settings));

        let rpc = rpc(request, settings).with_reply_adapter(reply.clone());
        let responder = respond_once(&broker);

        let received = rpc
            .call_with(&"quote".to_string(), SendOptions::new(), Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(received.value, "re:quote");
        assert!(received.message.correlation_id.is_some());
        assert!(reply.calls().receive >= 1);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_request_reply_support() {
        let broker = InMemoryBroker::new();
        let settings = settings();
        let request = InMemoryAdapter::new(broker.clone(), Arc::clone(&settings)).without_subscribe();
        let rpc = rpc(request, settings);

        let err = rpc.call(&"quote".to_string()).await.unwrap_err();
        assert!(matches!(
            err,
            MessagingError::Config(ConfigError::MissingCapability { capability: "request/reply", .. })
        ));
        // Nothing was sent
        assert_eq!(broker.depth("PRICING"), 0);
    }
}
