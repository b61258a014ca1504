//! Broker driver capability contracts.
//!
//! A driver implements [`MessageAdapter`] and, optionally,
//! [`SubscribingAdapter`] and [`TransactionalAdapter`]. Reactors and
//! factories only ever talk to these traits and probe the optional
//! capabilities once, at bind time, through [`MessageAdapter::as_subscriber`]
//! and [`MessageAdapter::as_transactional`].
//!
//! # Receive convention
//!
//! - [`MessageAdapter::receive`] blocks up to the timeout and returns
//!   [`AdapterError::NoMessage`] when nothing arrived.
//! - [`MessageAdapter::try_receive`] never blocks and returns `Ok(None)`
//!   for the empty case.

use crate::config::{ProcessingType, QueueSettings};
use crate::error::AdapterError;
use crate::message::Message;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// One push delivery from a driver to a reactor.
///
/// Drivers report receive failures through the same channel so the reactor
/// can trigger a reconnect.
pub type Delivery = Result<Message, AdapterError>;

/// Filters and bounds for a receive call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveOptions {
    /// Only accept a message with this correlation id
    pub correlation_id: Option<String>,

    /// Upper bound on a blocking receive; drivers apply their configured
    /// receive timeout when unset
    pub timeout: Option<Duration>,
}

impl ReceiveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Base contract every broker driver supports.
#[async_trait]
pub trait MessageAdapter: Send + Sync {
    /// Physical queue this adapter is bound to.
    fn queue_name(&self) -> &str;

    fn is_connected(&self) -> bool;

    /// Open the connection. No-op when already connected.
    async fn connect(&self) -> Result<(), AdapterError>;

    /// Release the connection. No-op when already disconnected.
    async fn disconnect(&self) -> Result<(), AdapterError>;

    /// Send a message; the returned copy carries the assigned message id.
    async fn send(&self, message: Message) -> Result<Message, AdapterError>;

    /// Blocking receive, see the module docs for the empty case.
    async fn receive(&self, options: ReceiveOptions) -> Result<Message, AdapterError>;

    /// Non-blocking receive, see the module docs for the empty case.
    async fn try_receive(&self, options: ReceiveOptions) -> Result<Option<Message>, AdapterError>;

    fn supports_processing_type(&self, processing_type: ProcessingType) -> bool;

    /// Push capability, if the driver has one.
    fn as_subscriber(&self) -> Option<&dyn SubscribingAdapter> {
        None
    }

    /// Transaction capability, if the driver has one.
    fn as_transactional(&self) -> Option<&dyn TransactionalAdapter> {
        None
    }
}

/// Push delivery and request/reply.
#[async_trait]
pub trait SubscribingAdapter: Send + Sync {
    /// Start pushing inbound messages into `sink`.
    ///
    /// The driver owns the producing side; the reactor drains the channel
    /// from a single task. A full channel applies back-pressure to the driver.
    async fn subscribe(&self, sink: mpsc::Sender<Delivery>) -> Result<(), AdapterError>;

    /// Stop pushing and drop the sink.
    async fn unsubscribe(&self) -> Result<(), AdapterError>;

    /// Send `request` and wait for the reply carrying its correlation id.
    ///
    /// Waits indefinitely; callers bound the wait themselves.
    async fn request_and_wait_response(&self, request: Message) -> Result<Message, AdapterError>;

    /// Send a response correlated to an inbound request.
    async fn reply(&self, response: Message) -> Result<Message, AdapterError>;
}

/// Transacted sessions.
///
/// Both operations are no-ops on non-transacted configurations.
#[async_trait]
pub trait TransactionalAdapter: Send + Sync {
    async fn commit_if_transacted(&self, message: &Message) -> Result<(), AdapterError>;

    async fn rollback_if_transacted(&self) -> Result<(), AdapterError>;
}

/// Creates a driver instance for one queue.
///
/// Each reactor and façade gets its own adapter; instances are never shared.
pub trait AdapterFactory: Send + Sync {
    fn create(&self, settings: &QueueSettings) -> Result<Arc<dyn MessageAdapter>, AdapterError>;
}

/// Connect unless already connected.
pub async fn ensure_connected(adapter: &dyn MessageAdapter) -> Result<(), AdapterError> {
    if adapter.is_connected() {
        return Ok(());
    }
    adapter.connect().await
}

/// Commit through the transaction capability, if any.
pub async fn commit_if_transacted(
    adapter: &dyn MessageAdapter,
    message: &Message,
) -> Result<(), AdapterError> {
    match adapter.as_transactional() {
        Some(tx) => tx.commit_if_transacted(message).await,
        None => Ok(()),
    }
}

/// Roll back through the transaction capability, if any.
pub async fn rollback_if_transacted(adapter: &dyn MessageAdapter) -> Result<(), AdapterError> {
    match adapter.as_transactional() {
        Some(tx) => tx.rollback_if_transacted().await,
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Minimal driver without optional capabilities.
    #[derive(Default)]
    struct BareAdapter {
        connected: AtomicBool,
        connects: AtomicUsize,
    }

    #[async_trait]
    impl MessageAdapter for BareAdapter {
        fn queue_name(&self) -> &str {
            "BARE"
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn connect(&self) -> Result<(), AdapterError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), AdapterError> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn send(&self, mut message: Message) -> Result<Message, AdapterError> {
            message.mark_sent("bare-1");
            Ok(message)
        }

        async fn receive(&self, _options: ReceiveOptions) -> Result<Message, AdapterError> {
            Err(AdapterError::NoMessage)
        }

        async fn try_receive(
            &self,
            _options: ReceiveOptions,
        ) -> Result<Option<Message>, AdapterError> {
            Ok(None)
        }

        fn supports_processing_type(&self, processing_type: ProcessingType) -> bool {
            processing_type == ProcessingType::ThreadStrategy
        }
    }

    #[tokio::test]
    async fn test_optional_capabilities_default_to_none() {
        let adapter = BareAdapter::default();
        assert!(adapter.as_subscriber().is_none());
        assert!(adapter.as_transactional().is_none());

        // Without the capability both helpers are no-ops
        assert!(commit_if_transacted(&adapter, &Message::text("x")).await.is_ok());
        assert!(rollback_if_transacted(&adapter).await.is_ok());
    }

    #[tokio::test]
    async fn test_ensure_connected_is_idempotent() {
        let adapter = BareAdapter::default();
        ensure_connected(&adapter).await.unwrap();
        ensure_connected(&adapter).await.unwrap();
        assert_eq!(adapter.connects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_receive_options_builder() {
        let options = ReceiveOptions::new()
            .with_correlation_id("abc")
            .with_timeout(Duration::from_secs(5));
        assert_eq!(options.correlation_id.as_deref(), Some("abc"));
        assert_eq!(options.timeout, Some(Duration::from_secs(5)));
    }
}
