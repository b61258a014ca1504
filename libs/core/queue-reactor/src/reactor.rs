//! Queue reactors.
//!
//! A reactor owns one adapter and drives consumption for one queue:
//!
//! ```text
//! Stopped --start_processing--> Running --stop--> Stopped
//!                                  |
//!                                  +--receive failure--> Stopped + NeedReconnect event
//! ```
//!
//! `ThreadStrategy` queues are consumed by a [`PollingEngine`] around a
//! blocking receive. `Subscribe` and `SubscribeAndReply` queues are consumed
//! from a bounded channel the driver pushes into, drained by a single task.
//! Either way messages are dispatched strictly one at a time.

use crate::adapter::{self, Delivery, MessageAdapter, ReceiveOptions};
use crate::config::{ProcessingType, QueueSettings};
use crate::context::CallContext;
use crate::error::{AdapterError, ErrorCategory, MessagingError, ProcessingError};
use crate::message::Message;
use crate::metrics::ReactorMetrics;
use crate::polling::{CancelHandle, PollingEngine};
use crate::processor::{Dispatch, DispatchOutcome, ProcessorChain, ReplyProcessorChain};
use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 16;

/// Signals raised by a reactor for its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReactorEvent {
    /// The reactor stopped listening after a transport failure; the owner
    /// should rebuild the adapter and reactor for `queue_id`.
    NeedReconnect { queue_id: String, reason: String },
}

/// Health snapshot of one reactor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueHealth {
    pub queue_id: String,
    pub processing_type: ProcessingType,
    pub running: bool,
    pub connected: bool,
    pub error_count: u64,
    pub critical: bool,
}

impl QueueHealth {
    pub fn is_healthy(&self) -> bool {
        self.running && self.connected
    }
}

/// Lifecycle and observability surface shared by all reactors.
#[async_trait]
pub trait Reactor: Send + Sync {
    fn queue_id(&self) -> &str;

    fn processing_type(&self) -> ProcessingType;

    /// Connect and begin listening.
    ///
    /// Returns false when already running or when the adapter could not be
    /// connected; never errors.
    async fn start_processing(&self) -> bool;

    /// Stop listening and disconnect. Idempotent.
    async fn stop(&self);

    fn is_running(&self) -> bool;

    fn is_connected(&self) -> bool;

    /// Transport failures seen since construction.
    fn error_count(&self) -> u64;

    /// Subscribe to reactor events.
    fn events(&self) -> broadcast::Receiver<ReactorEvent>;

    fn health(&self) -> QueueHealth;
}

/// Reactor bound to plain processors.
pub type SubscribeReactor = QueueReactor<ProcessorChain>;

/// Reactor bound to reply processors.
pub type SubscribeAndReplyReactor = QueueReactor<ReplyProcessorChain>;

enum Listener {
    Idle,
    Polling(PollingEngine),
    Push {
        cancel: watch::Sender<bool>,
        task: JoinHandle<()>,
    },
}

struct Shared<D> {
    settings: Arc<QueueSettings>,
    adapter: Arc<dyn MessageAdapter>,
    chain: Arc<D>,
    running: AtomicBool,
    error_count: AtomicU64,
    events: broadcast::Sender<ReactorEvent>,
    metrics: ReactorMetrics,
}

/// Reactor over any processor chain.
pub struct QueueReactor<D: Dispatch> {
    shared: Arc<Shared<D>>,
    listener: Mutex<Listener>,
}

impl<D: Dispatch> QueueReactor<D> {
    pub fn new(settings: Arc<QueueSettings>, adapter: Arc<dyn MessageAdapter>, chain: Arc<D>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let metrics = ReactorMetrics::new(&settings.id);

        Self {
            shared: Arc::new(Shared {
                settings,
                adapter,
                chain,
                running: AtomicBool::new(false),
                error_count: AtomicU64::new(0),
                events,
                metrics,
            }),
            listener: Mutex::new(Listener::Idle),
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.shared.settings
    }

    pub fn adapter(&self) -> &Arc<dyn MessageAdapter> {
        &self.shared.adapter
    }

    async fn begin_listening(&self) -> Result<Listener, AdapterError> {
        let settings = &self.shared.settings;

        if !settings.processing_type.is_push() {
            let cancel = CancelHandle::new();
            let shared = Arc::clone(&self.shared);
            let stop = cancel.clone();

            let engine = PollingEngine::with_cancel_handle(
                format!("queue:{}", settings.id),
                settings.polling_interval(),
                move || {
                    let shared = Arc::clone(&shared);
                    let stop = stop.clone();
                    async move { shared.receive_and_dispatch(&stop).await }
                },
                cancel,
            );
            engine.start();
            return Ok(Listener::Polling(engine));
        }

        let subscriber = self
            .shared
            .adapter
            .as_subscriber()
            .ok_or(AdapterError::Unsupported("subscribe"))?;

        let (sink, deliveries) = mpsc::channel(settings.push_buffer.max(1));
        subscriber.subscribe(sink).await?;

        let (cancel, cancelled) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move { shared.consume(deliveries, cancelled).await });

        Ok(Listener::Push { cancel, task })
    }

    async fn end_listening(&self, listener: Listener) {
        match listener {
            Listener::Idle => {}
            Listener::Polling(engine) => engine.stop().await,
            Listener::Push { cancel, task } => {
                let _ = cancel.send(true);
                if let Err(e) = task.await {
                    if !e.is_cancelled() {
                        error!(queue_id = %self.shared.settings.id, error = %e, "Push consumer terminated abnormally");
                    }
                }
                if let Some(subscriber) = self.shared.adapter.as_subscriber() {
                    if let Err(e) = subscriber.unsubscribe().await {
                        warn!(queue_id = %self.shared.settings.id, error = %e, "Failed to unsubscribe");
                    }
                }
            }
        }
    }
}

#[async_trait]
impl<D: Dispatch> Reactor for QueueReactor<D> {
    fn queue_id(&self) -> &str {
        &self.shared.settings.id
    }

    fn processing_type(&self) -> ProcessingType {
        self.shared.settings.processing_type
    }

    async fn start_processing(&self) -> bool {
        let mut listener = self.listener.lock().await;
        let queue_id = &self.shared.settings.id;

        if self.shared.running.load(Ordering::SeqCst) {
            debug!(queue_id = %queue_id, "Reactor already running");
            return false;
        }

        // Leftover listener from a run that stopped itself after a failure
        let previous = std::mem::replace(&mut *listener, Listener::Idle);
        self.end_listening(previous).await;

        if !self.shared.connect().await {
            return false;
        }

        match self.begin_listening().await {
            Ok(started) => {
                *listener = started;
                self.shared.running.store(true, Ordering::SeqCst);
                self.shared.metrics.set_running(true);
                info!(
                    queue_id = %queue_id,
                    queue = %self.shared.settings.queue_name,
                    processing_type = %self.shared.settings.processing_type,
                    processors = self.shared.chain.len(),
                    "Reactor started"
                );
                true
            }
            Err(e) => {
                self.shared.error_count.fetch_add(1, Ordering::SeqCst);
                error!(queue_id = %queue_id, error = %e, "Failed to begin listening");
                false
            }
        }
    }

    async fn stop(&self) {
        let mut listener = self.listener.lock().await;
        let was_running = self.shared.running.swap(false, Ordering::SeqCst);

        let current = std::mem::replace(&mut *listener, Listener::Idle);
        self.end_listening(current).await;

        if self.shared.adapter.is_connected() {
            if let Err(e) = self.shared.adapter.disconnect().await {
                warn!(queue_id = %self.shared.settings.id, error = %e, "Failed to disconnect adapter");
            }
        }

        self.shared.metrics.set_running(false);
        if was_running {
            info!(queue_id = %self.shared.settings.id, "Reactor stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    fn is_connected(&self) -> bool {
        self.shared.adapter.is_connected()
    }

    fn error_count(&self) -> u64 {
        self.shared.error_count.load(Ordering::SeqCst)
    }

    fn events(&self) -> broadcast::Receiver<ReactorEvent> {
        self.shared.events.subscribe()
    }

    fn health(&self) -> QueueHealth {
        QueueHealth {
            queue_id: self.shared.settings.id.clone(),
            processing_type: self.shared.settings.processing_type,
            running: self.is_running(),
            connected: self.is_connected(),
            error_count: self.error_count(),
            critical: self.shared.settings.health_check.critical,
        }
    }
}

impl<D: Dispatch> Shared<D> {
    /// Connect unless connected, retrying timeouts up to `connect_attempts`.
    async fn connect(&self) -> bool {
        if self.adapter.is_connected() {
            return true;
        }

        let attempts = self.settings.connect_attempts.max(1);
        for attempt in 1..=attempts {
            match self.adapter.connect().await {
                Ok(()) => {
                    info!(queue_id = %self.settings.id, server = %self.settings.server, attempt, "Adapter connected");
                    return true;
                }
                Err(e) if e.is_timeout() && attempt < attempts => {
                    self.metrics.connect_failed(true);
                    warn!(
                        queue_id = %self.settings.id,
                        attempt,
                        attempts,
                        error = %e,
                        "Connect timed out, retrying"
                    );
                    tokio::time::sleep(self.settings.polling_interval()).await;
                }
                Err(e) => {
                    self.metrics.connect_failed(e.is_timeout());
                    self.request_reconnect(&e);
                    return false;
                }
            }
        }
        false
    }

    /// Unit of work of the polling listener.
    async fn receive_and_dispatch(&self, stop: &CancelHandle) -> Result<bool, MessagingError> {
        let options = ReceiveOptions::new().with_timeout(self.settings.receive_timeout());

        match self.adapter.receive(options).await {
            Ok(message) => {
                self.handle(message).await;
                Ok(true)
            }
            Err(e) if e.is_no_message() => Ok(false),
            Err(e) => {
                stop.cancel();
                self.request_reconnect(&e);
                Ok(false)
            }
        }
    }

    /// Drain the push channel until cancelled or the driver goes away.
    async fn consume(&self, mut deliveries: mpsc::Receiver<Delivery>, mut cancelled: watch::Receiver<bool>) {
        loop {
            let delivery = tokio::select! {
                biased;
                changed = cancelled.changed() => {
                    if changed.is_err() || *cancelled.borrow() {
                        break;
                    }
                    continue;
                }
                delivery = deliveries.recv() => delivery,
            };

            match delivery {
                Some(Ok(message)) => self.handle(message).await,
                Some(Err(e)) if e.is_no_message() => continue,
                Some(Err(e)) => {
                    self.request_reconnect(&e);
                    break;
                }
                None => {
                    if !*cancelled.borrow() {
                        self.request_reconnect(&AdapterError::Connection(
                            "push channel closed by driver".to_string(),
                        ));
                    }
                    break;
                }
            }
        }

        debug!(queue_id = %self.settings.id, "Push consumer exited");
    }

    /// Handle one delivery. A panic anywhere in handling, not only in the
    /// processors, is contained here so the listener keeps running.
    async fn handle(&self, message: Message) {
        let message_id = message.message_id.clone();
        if let Err(panic) = AssertUnwindSafe(self.process(message)).catch_unwind().await {
            let e = ProcessingError::from_panic(panic);
            error!(queue_id = %self.settings.id, message_id, error = %e, "Message handling panicked");
            self.metrics.message_failed(&ErrorCategory::Processing.to_string());
            self.rollback().await;
        }
    }

    /// Dispatch one message inside its call context, then commit or roll back.
    async fn process(&self, message: Message) {
        let queue_id = self.settings.id.as_str();
        self.metrics.message_received();

        if message.is_expired() {
            warn!(
                queue_id,
                message_id = %message.message_id,
                "Skipping expired message"
            );
            self.metrics.message_expired();
            self.commit(&message).await;
            return;
        }

        let context = CallContext::from_message(&message);
        debug!(
            queue_id,
            message_id = %message.message_id,
            correlation_id = ?message.correlation_id,
            request_id = %context.request_id,
            body = %message.log_body(),
            "Dispatching message"
        );

        let started = Instant::now();
        let dispatch = self.chain.dispatch(&message, &context, self.adapter.as_ref());
        let result = AssertUnwindSafe(context.clone().scope(dispatch))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ProcessingError::from_panic(panic)));

        match result {
            Ok(DispatchOutcome::Claimed(processor)) => {
                debug!(queue_id, message_id = %message.message_id, processor, "Message claimed");
                self.metrics.message_claimed(processor, started.elapsed());
                self.commit(&message).await;
            }
            Ok(DispatchOutcome::Unhandled) => {
                warn!(
                    queue_id,
                    message_id = %message.message_id,
                    body = %message.log_body(),
                    "No processor claimed message"
                );
                self.metrics.message_unhandled(started.elapsed());
                self.commit(&message).await;
            }
            Err(e) => {
                error!(
                    queue_id,
                    message_id = %message.message_id,
                    request_id = %context.request_id,
                    error = %e,
                    "Processing failed"
                );
                self.metrics.message_failed(&ErrorCategory::Processing.to_string());
                self.rollback().await;
            }
        }
    }

    async fn commit(&self, message: &Message) {
        if self.adapter.as_transactional().is_none() {
            return;
        }
        match adapter::commit_if_transacted(self.adapter.as_ref(), message).await {
            Ok(()) => self.metrics.committed(),
            Err(e) => error!(
                queue_id = %self.settings.id,
                message_id = %message.message_id,
                error = %e,
                "Commit failed"
            ),
        }
    }

    async fn rollback(&self) {
        if self.adapter.as_transactional().is_none() {
            return;
        }
        match adapter::rollback_if_transacted(self.adapter.as_ref()).await {
            Ok(()) => self.metrics.rolled_back(),
            Err(e) => error!(queue_id = %self.settings.id, error = %e, "Rollback failed"),
        }
    }

    /// Stop counting as running and ask the owner to rebuild.
    fn request_reconnect(&self, cause: &AdapterError) {
        let count = self.error_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.running.store(false, Ordering::SeqCst);
        self.metrics.set_running(false);
        self.metrics.reconnect_requested();

        error!(
            queue_id = %self.settings.id,
            error = %cause,
            error_count = count,
            "Transport failure, reconnect requested"
        );

        // No subscribers is fine: nobody supervises this reactor
        let _ = self.events.send(ReactorEvent::NeedReconnect {
            queue_id: self.settings.id.clone(),
            reason: cause.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryAdapter, InMemoryBroker};
    use crate::processor::{MockProcessor, Registered};
    use std::time::Duration;
    use test_utils::eventually;

    fn settings(processing_type: ProcessingType) -> Arc<QueueSettings> {
        Arc::new(
            QueueSettings::new("orders", "mem://local", "ORDERS")
                .with_processing_type(processing_type)
                .with_polling_interval(Duration::from_millis(10))
                .with_receive_timeout(Duration::from_millis(10)),
        )
    }

    fn chain_of(mock: MockProcessor) -> Arc<ProcessorChain> {
        let mut chain = ProcessorChain::new();
        let mock: Arc<dyn crate::processor::Processor> = Arc::new(mock);
        chain.push(Registered::new("mock", mock));
        Arc::new(chain)
    }

    #[tokio::test]
    async fn test_start_twice_does_not_reconnect() {
        let settings = settings(ProcessingType::ThreadStrategy);
        let adapter = Arc::new(InMemoryAdapter::new(InMemoryBroker::new(), Arc::clone(&settings)));
        let reactor = SubscribeReactor::new(settings, adapter.clone(), chain_of(MockProcessor::new()));

        assert!(reactor.start_processing().await);
        assert!(!reactor.start_processing().await);
        assert_eq!(adapter.calls().connect, 1);
        assert!(reactor.is_running());

        reactor.stop().await;
        reactor.stop().await;
        assert!(!reactor.is_running());
        assert!(!reactor.is_connected());
    }

    #[tokio::test]
    async fn test_connect_timeout_is_absorbed() {
        let settings = settings(ProcessingType::ThreadStrategy);
        let adapter = Arc::new(InMemoryAdapter::new(InMemoryBroker::new(), Arc::clone(&settings)));
        adapter.inject_connect_error(AdapterError::Timeout("connect".into()));

        let reactor = SubscribeReactor::new(settings, adapter.clone(), chain_of(MockProcessor::new()));
        assert!(reactor.start_processing().await);
        assert_eq!(adapter.calls().connect, 2);
        reactor.stop().await;
    }

    #[tokio::test]
    async fn test_connect_failure_reports_false() {
        let settings = settings(ProcessingType::ThreadStrategy);
        let adapter = Arc::new(InMemoryAdapter::new(InMemoryBroker::new(), Arc::clone(&settings)));
        adapter.inject_connect_error(AdapterError::Authentication("bad password".into()));

        let reactor = SubscribeReactor::new(settings, adapter.clone(), chain_of(MockProcessor::new()));
        let mut events = reactor.events();

        assert!(!reactor.start_processing().await);
        assert!(!reactor.is_running());
        assert_eq!(reactor.error_count(), 1);
        assert!(matches!(events.try_recv(), Ok(ReactorEvent::NeedReconnect { .. })));
    }

    #[tokio::test]
    async fn test_polling_reactor_dispatches_in_order() {
        let broker = InMemoryBroker::new();
        let settings = settings(ProcessingType::ThreadStrategy);
        let adapter = Arc::new(InMemoryAdapter::new(broker.clone(), Arc::clone(&settings)));

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        let mut mock = MockProcessor::new();
        mock.expect_process().times(3).returning(move |message, _| {
            record.lock().unwrap().push(message.body_text().into_owned());
            Ok(true)
        });

        for body in ["a", "b", "c"] {
            broker.publish("ORDERS", Message::text(body));
        }

        let reactor = SubscribeReactor::new(settings, adapter, chain_of(mock));
        assert!(reactor.start_processing().await);
        eventually(|| seen.lock().unwrap().len() == 3).await;
        reactor.stop().await;

        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_receive_failure_requests_reconnect() {
        let settings = settings(ProcessingType::ThreadStrategy);
        let adapter = Arc::new(InMemoryAdapter::new(InMemoryBroker::new(), Arc::clone(&settings)));

        let reactor = SubscribeReactor::new(settings, adapter.clone(), chain_of(MockProcessor::new()));
        let mut events = reactor.events();
        assert!(reactor.start_processing().await);

        adapter.inject_receive_error(AdapterError::Connection("broker went away".into()));

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, ReactorEvent::NeedReconnect { ref queue_id, .. } if queue_id == "orders"));
        assert!(!reactor.is_running());
        assert_eq!(reactor.error_count(), 1);

        // In-place restart works after a self-stop
        assert!(reactor.start_processing().await);
        reactor.stop().await;
    }

    #[tokio::test]
    async fn test_call_context_is_scoped_to_dispatch() {
        let broker = InMemoryBroker::new();
        let settings = settings(ProcessingType::Subscribe);
        let adapter = Arc::new(InMemoryAdapter::new(broker.clone(), Arc::clone(&settings)));

        let seen = Arc::new(std::sync::Mutex::new(None));
        let record = Arc::clone(&seen);
        let mut mock = MockProcessor::new();
        mock.expect_process().times(1).returning(move |_, context| {
            let ambient = CallContext::current().map(|c| c.request_id);
            *record.lock().unwrap() = Some((context.request_id.clone(), ambient));
            Ok(true)
        });

        let reactor = SubscribeReactor::new(settings, adapter, chain_of(mock));
        assert!(reactor.start_processing().await);
        broker.publish("ORDERS", Message::text("x").with_property("RequestId", "req-42"));

        eventually(|| seen.lock().unwrap().is_some()).await;
        reactor.stop().await;

        let (explicit, ambient) = seen.lock().unwrap().clone().unwrap();
        assert_eq!(explicit, "req-42");
        assert_eq!(ambient.as_deref(), Some("req-42"));
        assert!(CallContext::current().is_none());
    }

    /// Panics on a "bad" body, claims everything else.
    struct Grumpy {
        handled: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl crate::processor::Processor for Grumpy {
        fn process(&self, message: &Message, _context: &CallContext) -> Result<bool, ProcessingError> {
            self.handled.fetch_add(1, Ordering::SeqCst);
            if message.body_text() == "bad" {
                panic!("processor bug");
            }
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_panicking_processor_does_not_stop_reactor() {
        let broker = InMemoryBroker::new();
        let settings = settings(ProcessingType::Subscribe);
        let adapter = Arc::new(InMemoryAdapter::new(broker.clone(), Arc::clone(&settings)));

        let handled = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let grumpy: Arc<dyn crate::processor::Processor> = Arc::new(Grumpy {
            handled: Arc::clone(&handled),
        });
        let mut chain = ProcessorChain::new();
        chain.push(Registered::new("grumpy", grumpy));

        let reactor = SubscribeReactor::new(settings, adapter, Arc::new(chain));
        assert!(reactor.start_processing().await);
        broker.publish("ORDERS", Message::text("bad"));
        broker.publish("ORDERS", Message::text("good"));

        eventually(|| handled.load(Ordering::SeqCst) == 2).await;
        assert!(reactor.is_running());
        reactor.stop().await;
    }

    #[tokio::test]
    async fn test_expired_message_is_skipped() {
        let broker = InMemoryBroker::new();
        let settings = settings(ProcessingType::Subscribe);
        let adapter = Arc::new(InMemoryAdapter::new(broker.clone(), Arc::clone(&settings)));

        let mut mock = MockProcessor::new();
        mock.expect_process().times(1).returning(|message, _| {
            assert_eq!(message.body_text(), "fresh");
            Ok(true)
        });

        let mut stale = Message::text("stale").with_time_to_live(Duration::from_millis(1));
        stale.sent_at = Some(chrono::Utc::now() - chrono::Duration::seconds(10));
        broker.enqueue("ORDERS", stale);
        broker.publish("ORDERS", Message::text("fresh"));

        let reactor = SubscribeReactor::new(settings, adapter, chain_of(mock));
        assert!(reactor.start_processing().await);
        eventually(|| broker.depth("ORDERS") == 0).await;
        // Give the second dispatch time to finish before stopping
        tokio::time::sleep(Duration::from_millis(20)).await;
        reactor.stop().await;
    }

    #[tokio::test]
    async fn test_huge_ttl_does_not_kill_push_listener() {
        let broker = InMemoryBroker::new();
        let settings = settings(ProcessingType::Subscribe);
        let adapter = Arc::new(InMemoryAdapter::new(broker.clone(), Arc::clone(&settings)));

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        let mut mock = MockProcessor::new();
        mock.expect_process().times(2).returning(move |message, _| {
            record.lock().unwrap().push(message.body_text().into_owned());
            Ok(true)
        });

        let reactor = SubscribeReactor::new(settings, adapter, chain_of(mock));
        let mut events = reactor.events();
        assert!(reactor.start_processing().await);

        broker.publish(
            "ORDERS",
            Message::text("forever").with_time_to_live(Duration::from_secs(10u64.pow(15))),
        );
        broker.publish("ORDERS", Message::text("next"));

        eventually(|| seen.lock().unwrap().len() == 2).await;
        assert_eq!(*seen.lock().unwrap(), vec!["forever", "next"]);
        assert!(reactor.is_running());
        assert_eq!(reactor.error_count(), 0);
        assert!(events.try_recv().is_err());
        reactor.stop().await;
    }
}
