//! In-process broker driver.
//!
//! [`InMemoryBroker`] holds named FIFO queues shared by every adapter built
//! on it. [`InMemoryAdapter`] implements the base, subscribing and
//! transactional capabilities, plus fault injection and call counters for
//! tests. [`InMemoryAdapterFactory`] plugs it into a
//! [`ReactorFactory`](crate::factory::ReactorFactory).

use crate::adapter::{
    AdapterFactory, Delivery, MessageAdapter, ReceiveOptions, SubscribingAdapter,
    TransactionalAdapter,
};
use crate::config::{ProcessingType, QueueSettings};
use crate::error::AdapterError;
use crate::message::{Message, PropertyValue};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use strum::IntoEnumIterator;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Property carrying how often a transacted message has been delivered.
pub const DELIVERY_COUNT_PROPERTY: &str = "DeliveryCount";

/// Suffix of the queue that receives messages past the backout threshold.
pub const BACKOUT_QUEUE_SUFFIX: &str = ".BACKOUT";

const DEFAULT_BACKOUT_THRESHOLD: u32 = 3;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct BrokerState {
    queues: Mutex<HashMap<String, VecDeque<Message>>>,
    /// (queue, correlation id) of replies nobody waits for any more
    abandoned: Mutex<HashSet<(String, String)>>,
    notify: Notify,
    next_id: AtomicU64,
}

/// Named FIFO queues shared across adapters.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_message_id(&self) -> String {
        format!("mem-{}", self.state.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Stamp `message` as sent and append it to `queue`.
    pub fn publish(&self, queue: &str, mut message: Message) -> Message {
        message.mark_sent(self.next_message_id());
        self.push_back(queue, message.clone());
        message
    }

    /// Append `message` as-is; only a missing id is filled in.
    pub fn enqueue(&self, queue: &str, mut message: Message) {
        if message.message_id.is_empty() {
            message.message_id = self.next_message_id();
        }
        self.push_back(queue, message);
    }

    fn push_back(&self, queue: &str, message: Message) {
        let mut abandoned = lock(&self.state.abandoned);
        if let Some(correlation_id) = &message.correlation_id {
            if abandoned.remove(&(queue.to_string(), correlation_id.clone())) {
                debug!(queue, correlation_id, "Dropping reply nobody is waiting for");
                return;
            }
        }

        lock(&self.state.queues)
            .entry(queue.to_string())
            .or_default()
            .push_back(message);
        drop(abandoned);
        self.wake();
    }

    /// Give up on the reply to `correlation_id` on `queue`.
    ///
    /// A reply already waiting is removed; one that arrives later is
    /// dropped on arrival.
    pub fn abandon(&self, queue: &str, correlation_id: &str) {
        let mut abandoned = lock(&self.state.abandoned);
        if self.take(queue, Some(correlation_id)).is_none() {
            abandoned.insert((queue.to_string(), correlation_id.to_string()));
        }
    }

    fn push_front(&self, queue: &str, message: Message) {
        lock(&self.state.queues)
            .entry(queue.to_string())
            .or_default()
            .push_front(message);
        self.wake();
    }

    fn wake(&self) {
        self.state.notify.notify_waiters();
    }

    /// Number of messages waiting on `queue`.
    pub fn depth(&self, queue: &str) -> usize {
        lock(&self.state.queues).get(queue).map_or(0, VecDeque::len)
    }

    /// Snapshot of the messages waiting on `queue`.
    pub fn messages(&self, queue: &str) -> Vec<Message> {
        lock(&self.state.queues)
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove the oldest message, optionally the oldest with a correlation id.
    pub fn take(&self, queue: &str, correlation_id: Option<&str>) -> Option<Message> {
        let mut queues = lock(&self.state.queues);
        let messages = queues.get_mut(queue)?;
        let index = messages.iter().position(|m| match correlation_id {
            Some(id) => m.correlation_id.as_deref() == Some(id),
            None => true,
        })?;
        messages.remove(index)
    }

    /// Wait for a matching message. `None` timeout waits indefinitely.
    pub async fn wait_for(
        &self,
        queue: &str,
        correlation_id: Option<&str>,
        timeout: Option<Duration>,
    ) -> Option<Message> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);

        loop {
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.take(queue, correlation_id) {
                return Some(message);
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return self.take(queue, correlation_id);
                    }
                }
                None => notified.await,
            }
        }
    }
}

/// Number of calls made on an [`InMemoryAdapter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub connect: usize,
    pub disconnect: usize,
    pub send: usize,
    pub receive: usize,
    pub commit: usize,
    pub rollback: usize,
    pub reply: usize,
    pub subscribe: usize,
    pub unsubscribe: usize,
}

#[derive(Default)]
struct Counters {
    connect: AtomicUsize,
    disconnect: AtomicUsize,
    send: AtomicUsize,
    receive: AtomicUsize,
    commit: AtomicUsize,
    rollback: AtomicUsize,
    reply: AtomicUsize,
    subscribe: AtomicUsize,
    unsubscribe: AtomicUsize,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

/// State reachable from the push pump task.
struct AdapterState {
    broker: InMemoryBroker,
    settings: Arc<QueueSettings>,
    connected: AtomicBool,
    in_flight: Mutex<Vec<Message>>,
    connect_faults: Mutex<VecDeque<AdapterError>>,
    receive_faults: Mutex<VecDeque<AdapterError>>,
    counters: Counters,
}

impl AdapterState {
    fn require_connected(&self) -> Result<(), AdapterError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AdapterError::NotConnected)
        }
    }

    fn take_receive_fault(&self) -> Option<AdapterError> {
        lock(&self.receive_faults).pop_front()
    }

    fn has_in_flight(&self) -> bool {
        self.settings.transacted && !lock(&self.in_flight).is_empty()
    }

    /// Stamp a taken message and track it until commit when transacted.
    fn accept(&self, mut message: Message) -> Message {
        message.mark_received();
        if self.settings.transacted {
            let deliveries = match message.property(DELIVERY_COUNT_PROPERTY) {
                Some(PropertyValue::Int(n)) => n + 1,
                _ => 1,
            };
            message
                .properties
                .insert(DELIVERY_COUNT_PROPERTY.to_string(), PropertyValue::Int(deliveries));
            lock(&self.in_flight).push(message.clone());
        }
        message
    }
}

struct Pump {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// In-process driver with all three capabilities.
pub struct InMemoryAdapter {
    state: Arc<AdapterState>,
    subscribing: bool,
    transactional: bool,
    supported: Vec<ProcessingType>,
    backout_threshold: u32,
    pump: Mutex<Option<Pump>>,
}

impl InMemoryAdapter {
    pub fn new(broker: InMemoryBroker, settings: Arc<QueueSettings>) -> Self {
        Self {
            state: Arc::new(AdapterState {
                broker,
                settings,
                connected: AtomicBool::new(false),
                in_flight: Mutex::new(Vec::new()),
                connect_faults: Mutex::new(VecDeque::new()),
                receive_faults: Mutex::new(VecDeque::new()),
                counters: Counters::default(),
            }),
            subscribing: true,
            transactional: true,
            supported: ProcessingType::iter().collect(),
            backout_threshold: DEFAULT_BACKOUT_THRESHOLD,
            pump: Mutex::new(None),
        }
    }

    /// Drop the subscribing capability.
    pub fn without_subscribe(mut self) -> Self {
        self.subscribing = false;
        self
    }

    /// Drop the transaction capability.
    pub fn without_transactions(mut self) -> Self {
        self.transactional = false;
        self
    }

    /// Restrict the processing types this driver accepts.
    pub fn with_supported_types(mut self, types: &[ProcessingType]) -> Self {
        self.supported = types.to_vec();
        self
    }

    /// Deliveries after which a rolled back message moves to the backout queue.
    pub fn with_backout_threshold(mut self, threshold: u32) -> Self {
        self.backout_threshold = threshold.max(1);
        self
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.state.settings
    }

    pub fn broker(&self) -> &InMemoryBroker {
        &self.state.broker
    }

    /// Name of the queue rolled back messages end up on.
    pub fn backout_queue(&self) -> String {
        format!("{}{}", self.state.settings.queue_name, BACKOUT_QUEUE_SUFFIX)
    }

    /// Fail the next connect with `error`. Queue several for several failures.
    pub fn inject_connect_error(&self, error: AdapterError) {
        lock(&self.state.connect_faults).push_back(error);
    }

    /// Fail the next receive or push delivery with `error`.
    pub fn inject_receive_error(&self, error: AdapterError) {
        lock(&self.state.receive_faults).push_back(error);
        self.state.broker.wake();
    }

    pub fn calls(&self) -> CallCounts {
        let c = &self.state.counters;
        let load = |counter: &AtomicUsize| counter.load(Ordering::SeqCst);
        CallCounts {
            connect: load(&c.connect),
            disconnect: load(&c.disconnect),
            send: load(&c.send),
            receive: load(&c.receive),
            commit: load(&c.commit),
            rollback: load(&c.rollback),
            reply: load(&c.reply),
            subscribe: load(&c.subscribe),
            unsubscribe: load(&c.unsubscribe),
        }
    }

    /// Messages received under the open transaction.
    pub fn in_flight(&self) -> usize {
        lock(&self.state.in_flight).len()
    }

    fn stop_pump(&self) {
        if let Some(pump) = lock(&self.pump).take() {
            let _ = pump.cancel.send(true);
            pump.task.abort();
        }
    }
}

impl Drop for InMemoryAdapter {
    fn drop(&mut self) {
        self.stop_pump();
    }
}

#[async_trait]
impl MessageAdapter for InMemoryAdapter {
    fn queue_name(&self) -> &str {
        &self.state.settings.queue_name
    }

    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<(), AdapterError> {
        bump(&self.state.counters.connect);
        if let Some(error) = lock(&self.state.connect_faults).pop_front() {
            return Err(error);
        }
        if !self.state.connected.swap(true, Ordering::SeqCst) {
            debug!(queue = %self.queue_name(), "In-memory adapter connected");
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AdapterError> {
        bump(&self.state.counters.disconnect);
        self.stop_pump();
        self.state.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, message: Message) -> Result<Message, AdapterError> {
        self.state.require_connected()?;
        bump(&self.state.counters.send);
        Ok(self.state.broker.publish(self.queue_name(), message))
    }

    async fn receive(&self, options: ReceiveOptions) -> Result<Message, AdapterError> {
        self.state.require_connected()?;
        bump(&self.state.counters.receive);
        if let Some(error) = self.state.take_receive_fault() {
            return Err(error);
        }

        let timeout = options
            .timeout
            .unwrap_or_else(|| self.state.settings.receive_timeout());
        self.state
            .broker
            .wait_for(self.queue_name(), options.correlation_id.as_deref(), Some(timeout))
            .await
            .map(|message| self.state.accept(message))
            .ok_or(AdapterError::NoMessage)
    }

    async fn try_receive(&self, options: ReceiveOptions) -> Result<Option<Message>, AdapterError> {
        self.state.require_connected()?;
        bump(&self.state.counters.receive);
        if let Some(error) = self.state.take_receive_fault() {
            return Err(error);
        }

        Ok(self
            .state
            .broker
            .take(self.queue_name(), options.correlation_id.as_deref())
            .map(|message| self.state.accept(message)))
    }

    fn supports_processing_type(&self, processing_type: ProcessingType) -> bool {
        self.supported.contains(&processing_type)
    }

    fn as_subscriber(&self) -> Option<&dyn SubscribingAdapter> {
        if self.subscribing {
            Some(self)
        } else {
            None
        }
    }

    fn as_transactional(&self) -> Option<&dyn TransactionalAdapter> {
        if self.transactional {
            Some(self)
        } else {
            None
        }
    }
}

/// Move messages from the broker into the reactor's channel.
async fn pump(state: Arc<AdapterState>, sink: mpsc::Sender<Delivery>, mut cancel: watch::Receiver<bool>) {
    let queue = state.settings.queue_name.clone();

    loop {
        let notified = state.broker.state.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if *cancel.borrow() {
            break;
        }

        let permit = tokio::select! {
            permit = sink.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = cancel.changed() => break,
        };

        if let Some(error) = state.take_receive_fault() {
            permit.send(Err(error));
            continue;
        }

        // A transacted session delivers one message at a time
        if !state.has_in_flight() {
            if let Some(message) = state.broker.take(&queue, None) {
                permit.send(Ok(state.accept(message)));
                continue;
            }
        }
        drop(permit);

        tokio::select! {
            _ = &mut notified => {}
            changed = cancel.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    debug!(queue = %queue, "In-memory pump stopped");
}

#[async_trait]
impl SubscribingAdapter for InMemoryAdapter {
    async fn subscribe(&self, sink: mpsc::Sender<Delivery>) -> Result<(), AdapterError> {
        self.state.require_connected()?;
        bump(&self.state.counters.subscribe);
        self.stop_pump();

        let (cancel, cancelled) = watch::channel(false);
        let task = tokio::spawn(pump(Arc::clone(&self.state), sink, cancelled));
        *lock(&self.pump) = Some(Pump { cancel, task });
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<(), AdapterError> {
        bump(&self.state.counters.unsubscribe);
        self.stop_pump();
        Ok(())
    }

    async fn request_and_wait_response(&self, mut request: Message) -> Result<Message, AdapterError> {
        self.state.require_connected()?;

        let reply_queue = request
            .reply_to
            .clone()
            .or_else(|| self.state.settings.reply_queue.clone())
            .ok_or_else(|| AdapterError::transport("no reply queue configured"))?;
        let correlation_id = request
            .correlation_id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone();
        request.reply_to = Some(reply_queue.clone());

        bump(&self.state.counters.send);
        self.state.broker.publish(self.queue_name(), request);

        // Abandons the reply if this future is dropped before it arrives
        let mut pending = PendingReply {
            broker: self.state.broker.clone(),
            queue: reply_queue,
            correlation_id,
            settled: false,
        };
        let mut response = pending
            .broker
            .wait_for(&pending.queue, Some(&pending.correlation_id), None)
            .await
            .ok_or(AdapterError::NoMessage)?;
        pending.settled = true;

        response.mark_received();
        Ok(response)
    }

    async fn reply(&self, response: Message) -> Result<Message, AdapterError> {
        self.state.require_connected()?;

        let target = response
            .reply_to
            .clone()
            .ok_or_else(|| AdapterError::transport("response has no reply-to queue"))?;
        bump(&self.state.counters.reply);
        Ok(self.state.broker.publish(&target, response))
    }
}

#[async_trait]
impl TransactionalAdapter for InMemoryAdapter {
    async fn commit_if_transacted(&self, message: &Message) -> Result<(), AdapterError> {
        bump(&self.state.counters.commit);
        if !self.state.settings.transacted {
            return Ok(());
        }

        lock(&self.state.in_flight).retain(|m| m.message_id != message.message_id);
        self.state.broker.wake();
        Ok(())
    }

    async fn rollback_if_transacted(&self) -> Result<(), AdapterError> {
        bump(&self.state.counters.rollback);
        if !self.state.settings.transacted {
            return Ok(());
        }

        let returned = std::mem::take(&mut *lock(&self.state.in_flight));
        // Reverse so the original order is restored at the head of the queue
        for message in returned.into_iter().rev() {
            let deliveries = match message.property(DELIVERY_COUNT_PROPERTY) {
                Some(PropertyValue::Int(n)) => *n,
                _ => 0,
            };

            if deliveries >= i64::from(self.backout_threshold) {
                warn!(
                    queue = %self.queue_name(),
                    message_id = %message.message_id,
                    deliveries,
                    "Backout threshold reached, moving message to backout queue"
                );
                self.state.broker.enqueue(&self.backout_queue(), message);
            } else {
                self.state.broker.push_front(self.queue_name(), message);
            }
        }
        Ok(())
    }
}

struct PendingReply {
    broker: InMemoryBroker,
    queue: String,
    correlation_id: String,
    settled: bool,
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if !self.settled {
            self.broker.abandon(&self.queue, &self.correlation_id);
        }
    }
}

/// [`AdapterFactory`] producing [`InMemoryAdapter`]s over one broker.
///
/// Created adapters are tracked weakly: once the reactor that owned one is
/// dropped the adapter goes away, and only the per-queue count remains.
pub struct InMemoryAdapterFactory {
    broker: InMemoryBroker,
    customize: Option<Box<dyn Fn(InMemoryAdapter) -> InMemoryAdapter + Send + Sync>>,
    create_faults: Mutex<VecDeque<AdapterError>>,
    created: Mutex<Vec<Weak<InMemoryAdapter>>>,
    created_counts: Mutex<HashMap<String, usize>>,
}

impl InMemoryAdapterFactory {
    pub fn new(broker: InMemoryBroker) -> Self {
        Self {
            broker,
            customize: None,
            create_faults: Mutex::new(VecDeque::new()),
            created: Mutex::new(Vec::new()),
            created_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Adjust every adapter this factory creates.
    pub fn with_customizer(
        mut self,
        customize: impl Fn(InMemoryAdapter) -> InMemoryAdapter + Send + Sync + 'static,
    ) -> Self {
        self.customize = Some(Box::new(customize));
        self
    }

    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }

    /// Fail the next `create` with `error`.
    pub fn inject_create_error(&self, error: AdapterError) {
        lock(&self.create_faults).push_back(error);
    }

    /// Adapters created for `queue_id` that are still alive, oldest first.
    pub fn adapters(&self, queue_id: &str) -> Vec<Arc<InMemoryAdapter>> {
        let mut created = lock(&self.created);
        created.retain(|adapter| adapter.strong_count() > 0);
        created
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|adapter| adapter.settings().id == queue_id)
            .collect()
    }

    /// How many adapters were ever created for `queue_id`.
    pub fn created_count(&self, queue_id: &str) -> usize {
        lock(&self.created_counts).get(queue_id).copied().unwrap_or(0)
    }

    /// Most recent adapter created for `queue_id`.
    pub fn latest(&self, queue_id: &str) -> Option<Arc<InMemoryAdapter>> {
        self.adapters(queue_id).pop()
    }
}

impl AdapterFactory for InMemoryAdapterFactory {
    fn create(&self, settings: &QueueSettings) -> Result<Arc<dyn MessageAdapter>, AdapterError> {
        if let Some(error) = lock(&self.create_faults).pop_front() {
            return Err(error);
        }

        let mut adapter = InMemoryAdapter::new(self.broker.clone(), Arc::new(settings.clone()));
        if let Some(customize) = &self.customize {
            adapter = customize(adapter);
        }

        let adapter = Arc::new(adapter);
        {
            let mut created = lock(&self.created);
            created.retain(|adapter| adapter.strong_count() > 0);
            created.push(Arc::downgrade(&adapter));
        }
        *lock(&self.created_counts).entry(settings.id.clone()).or_default() += 1;
        Ok(adapter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ensure_connected;

    fn settings(transacted: bool) -> Arc<QueueSettings> {
        Arc::new(
            QueueSettings::new("orders", "mem://local", "ORDERS")
                .with_reply_queue("ORDERS.REPLY")
                .with_receive_timeout(Duration::from_millis(20))
                .with_transacted(transacted),
        )
    }

    async fn connected(broker: &InMemoryBroker, transacted: bool) -> InMemoryAdapter {
        let adapter = InMemoryAdapter::new(broker.clone(), settings(transacted));
        ensure_connected(&adapter).await.unwrap();
        adapter
    }

    #[tokio::test]
    async fn test_requires_connection() {
        let adapter = InMemoryAdapter::new(InMemoryBroker::new(), settings(false));
        let err = adapter.send(Message::text("x")).await.unwrap_err();
        assert!(matches!(err, AdapterError::NotConnected));
    }

    #[tokio::test]
    async fn test_send_receive_round_trip() {
        let broker = InMemoryBroker::new();
        let adapter = connected(&broker, false).await;

        let body = "héllo wörld";
        let sent = adapter.send(Message::text(body)).await.unwrap();
        assert!(!sent.message_id.is_empty());
        assert!(sent.sent_at.is_some());

        let received = adapter.receive(ReceiveOptions::new()).await.unwrap();
        assert_eq!(received.message_id, sent.message_id);
        assert_eq!(received.body_bytes(), body.as_bytes());
        assert!(received.received_at.is_some());
    }

    #[tokio::test]
    async fn test_empty_queue_conventions() {
        let broker = InMemoryBroker::new();
        let adapter = connected(&broker, false).await;

        let err = adapter.receive(ReceiveOptions::new()).await.unwrap_err();
        assert!(err.is_no_message());
        assert!(adapter.try_receive(ReceiveOptions::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_correlated_receive_skips_others() {
        let broker = InMemoryBroker::new();
        let adapter = connected(&broker, false).await;

        adapter.send(Message::text("first").with_correlation_id("x")).await.unwrap();
        adapter.send(Message::text("second").with_correlation_id("abc")).await.unwrap();

        let options = ReceiveOptions::new().with_correlation_id("abc");
        let received = adapter.receive(options).await.unwrap();
        assert_eq!(received.body_text(), "second");
        assert_eq!(broker.depth("ORDERS"), 1);
    }

    #[tokio::test]
    async fn test_rollback_returns_message_to_head() {
        let broker = InMemoryBroker::new();
        let adapter = connected(&broker, true).await;
        broker.publish("ORDERS", Message::text("a"));
        broker.publish("ORDERS", Message::text("b"));

        let first = adapter.receive(ReceiveOptions::new()).await.unwrap();
        assert_eq!(adapter.in_flight(), 1);
        assert_eq!(first.property(DELIVERY_COUNT_PROPERTY), Some(&PropertyValue::Int(1)));

        adapter.rollback_if_transacted().await.unwrap();
        assert_eq!(adapter.in_flight(), 0);

        let again = adapter.receive(ReceiveOptions::new()).await.unwrap();
        assert_eq!(again.body_text(), "a");
        assert_eq!(again.property(DELIVERY_COUNT_PROPERTY), Some(&PropertyValue::Int(2)));

        adapter.commit_if_transacted(&again).await.unwrap();
        assert_eq!(adapter.in_flight(), 0);
        assert_eq!(broker.depth("ORDERS"), 1);
        assert_eq!(adapter.calls().commit, 1);
        assert_eq!(adapter.calls().rollback, 1);
    }

    #[tokio::test]
    async fn test_backout_threshold() {
        let broker = InMemoryBroker::new();
        let adapter = InMemoryAdapter::new(broker.clone(), settings(true)).with_backout_threshold(1);
        adapter.connect().await.unwrap();
        broker.publish("ORDERS", Message::text("poison"));

        adapter.receive(ReceiveOptions::new()).await.unwrap();
        adapter.rollback_if_transacted().await.unwrap();

        assert_eq!(broker.depth("ORDERS"), 0);
        assert_eq!(broker.depth(&adapter.backout_queue()), 1);
    }

    #[tokio::test]
    async fn test_non_transacted_commit_is_noop() {
        let broker = InMemoryBroker::new();
        let adapter = connected(&broker, false).await;
        broker.publish("ORDERS", Message::text("a"));

        let message = adapter.receive(ReceiveOptions::new()).await.unwrap();
        assert_eq!(adapter.in_flight(), 0);
        adapter.commit_if_transacted(&message).await.unwrap();
        adapter.rollback_if_transacted().await.unwrap();
        assert_eq!(broker.depth("ORDERS"), 0);
    }

    #[tokio::test]
    async fn test_subscribe_pushes_and_reports_faults() {
        let broker = InMemoryBroker::new();
        let adapter = connected(&broker, false).await;
        let (sink, mut deliveries) = mpsc::channel(4);

        adapter.subscribe(sink).await.unwrap();
        broker.publish("ORDERS", Message::text("pushed"));

        let delivery = tokio::time::timeout(Duration::from_secs(5), deliveries.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.unwrap().body_text(), "pushed");

        adapter.inject_receive_error(AdapterError::Connection("lost".into()));
        let delivery = tokio::time::timeout(Duration::from_secs(5), deliveries.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(delivery, Err(AdapterError::Connection(_))));

        adapter.unsubscribe().await.unwrap();
        // Pump dropped its sender
        let closed = tokio::time::timeout(Duration::from_secs(5), deliveries.recv())
            .await
            .unwrap();
        assert!(closed.is_none());
    }

    #[tokio::test]
    async fn test_request_and_reply() {
        let broker = InMemoryBroker::new();
        let client = connected(&broker, false).await;
        let server = connected(&broker, false).await;

        let responder = tokio::spawn(async move {
            let request = server.receive(ReceiveOptions::new().with_timeout(Duration::from_secs(5))).await.unwrap();
            let response = Message::text(format!("re:{}", request.body_text()))
                .with_correlation_id(request.correlation_id.clone().unwrap())
                .with_reply_to(request.reply_to.clone().unwrap());
            server.reply(response).await.unwrap();
            server.calls().reply
        });

        let response = client
            .request_and_wait_response(Message::text("hi").with_correlation_id("abc"))
            .await
            .unwrap();
        assert_eq!(response.body_text(), "re:hi");
        assert_eq!(response.correlation_id.as_deref(), Some("abc"));
        assert_eq!(responder.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_late_reply_is_dropped_after_caller_gives_up() {
        let broker = InMemoryBroker::new();
        let client = connected(&broker, false).await;

        let waited = tokio::time::timeout(
            Duration::from_millis(20),
            client.request_and_wait_response(Message::text("hi").with_correlation_id("late")),
        )
        .await;
        assert!(waited.is_err());

        broker.publish("ORDERS.REPLY", Message::text("re:hi").with_correlation_id("late"));
        broker.publish("ORDERS.REPLY", Message::text("other").with_correlation_id("someone-else"));

        let left = broker.messages("ORDERS.REPLY");
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].correlation_id.as_deref(), Some("someone-else"));

        // Only the one late reply is swallowed
        broker.publish("ORDERS.REPLY", Message::text("again").with_correlation_id("late"));
        assert_eq!(broker.depth("ORDERS.REPLY"), 2);
    }

    #[test]
    fn test_abandon_removes_waiting_reply() {
        let broker = InMemoryBroker::new();
        broker.publish("ORDERS.REPLY", Message::text("re:hi").with_correlation_id("abc"));

        broker.abandon("ORDERS.REPLY", "abc");
        assert_eq!(broker.depth("ORDERS.REPLY"), 0);

        broker.publish("ORDERS.REPLY", Message::text("re:hi").with_correlation_id("abc"));
        assert_eq!(broker.depth("ORDERS.REPLY"), 1);
    }

    #[tokio::test]
    async fn test_factory_tracks_adapters_and_faults() {
        let factory = InMemoryAdapterFactory::new(InMemoryBroker::new())
            .with_customizer(|adapter| adapter.without_transactions());
        let settings = QueueSettings::new("orders", "mem://local", "ORDERS");

        factory.inject_create_error(AdapterError::Connection("down".into()));
        assert!(factory.create(&settings).is_err());

        let adapter = factory.create(&settings).unwrap();
        assert!(adapter.as_transactional().is_none());
        assert!(adapter.as_subscriber().is_some());
        assert_eq!(factory.adapters("orders").len(), 1);
        assert_eq!(factory.created_count("orders"), 1);
        assert!(factory.latest("orders").is_some());
        assert!(factory.latest("other").is_none());
    }

    #[tokio::test]
    async fn test_factory_releases_dropped_adapters() {
        let factory = InMemoryAdapterFactory::new(InMemoryBroker::new());
        let settings = QueueSettings::new("orders", "mem://local", "ORDERS");

        for _ in 0..5 {
            factory.create(&settings).unwrap();
        }
        let current = factory.create(&settings).unwrap();

        assert_eq!(factory.created_count("orders"), 6);
        assert_eq!(factory.adapters("orders").len(), 1);
        assert_eq!(lock(&factory.created).len(), 1);

        drop(current);
        assert!(factory.latest("orders").is_none());
        assert!(lock(&factory.created).is_empty());
        assert_eq!(factory.created_count("orders"), 6);
    }
}
