//! Processor traits and ordered processor chains.
//!
//! Host code implements one of four processor traits. Each call returns
//! `Ok(true)` to claim the message, which ends dispatch for it, or
//! `Ok(false)` to pass it on to the next processor in registration order.
//!
//! | Trait | Invocation | Can reply |
//! |---|---|---|
//! | [`Processor`] | sync | no |
//! | [`AsyncProcessor`] | async | no |
//! | [`ReplyProcessor`] | sync | yes |
//! | [`AsyncReplyProcessor`] | async | yes |
//!
//! Within one chain, sync processors are tried first, then async ones.

use crate::adapter::MessageAdapter;
use crate::context::CallContext;
use crate::error::{AdapterError, ProcessingError};
use crate::message::Message;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Synchronous processor.
///
/// # Example
///
/// ```rust,ignore
/// use queue_reactor::{CallContext, Message, ProcessingError, Processor};
///
/// struct PingProcessor;
///
/// impl Processor for PingProcessor {
///     fn process(&self, message: &Message, _ctx: &CallContext) -> Result<bool, ProcessingError> {
///         Ok(message.body_text() == "ping")
///     }
/// }
/// ```
#[cfg_attr(test, mockall::automock)]
pub trait Processor: Send + Sync {
    /// Handle `message`. `Ok(true)` claims it.
    fn process(&self, message: &Message, context: &CallContext) -> Result<bool, ProcessingError>;
}

/// Asynchronous processor.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AsyncProcessor: Send + Sync {
    /// Handle `message`. `Ok(true)` claims it.
    async fn process(
        &self,
        message: &Message,
        context: &CallContext,
    ) -> Result<bool, ProcessingError>;
}

/// Synchronous processor that may answer the request.
#[cfg_attr(test, mockall::automock)]
pub trait ReplyProcessor: Send + Sync {
    fn process(
        &self,
        message: &Message,
        context: &CallContext,
        reply: &ReplyAction,
    ) -> Result<bool, ProcessingError>;
}

/// Asynchronous processor that may answer the request.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AsyncReplyProcessor: Send + Sync {
    async fn process(
        &self,
        message: &Message,
        context: &CallContext,
        reply: &ReplyAction,
    ) -> Result<bool, ProcessingError>;
}

/// Reply continuation handed to reply processors.
///
/// Responses are stamped with the request's reply-to queue and correlation
/// id, then sent through the adapter once the processor returns.
#[derive(Debug)]
pub struct ReplyAction {
    reply_to: Option<String>,
    correlation_id: Option<String>,
    responses: Mutex<Vec<Message>>,
}

impl ReplyAction {
    /// Reply continuation for `request`.
    pub fn new(request: &Message) -> Self {
        let correlation_id = request.correlation_id.clone().or_else(|| {
            (!request.message_id.is_empty()).then(|| request.message_id.clone())
        });

        Self {
            reply_to: request.reply_to.clone(),
            correlation_id,
            responses: Mutex::new(Vec::new()),
        }
    }

    /// Queue the response will be routed to.
    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Answer the request with `response`.
    pub fn reply(&self, mut response: Message) {
        response.reply_to = self.reply_to.clone();
        if response.correlation_id.is_none() {
            response.correlation_id = self.correlation_id.clone();
        }
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(response);
    }

    /// Number of responses queued so far.
    pub fn pending(&self) -> usize {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn take(&self) -> Vec<Message> {
        std::mem::take(&mut *self.responses.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// A processor together with the label used in logs and metrics.
pub struct Registered<P: ?Sized> {
    pub name: &'static str,
    pub processor: Arc<P>,
}

impl<P: ?Sized> Registered<P> {
    pub fn new(name: &'static str, processor: Arc<P>) -> Self {
        Self { name, processor }
    }
}

impl<P: ?Sized> Clone for Registered<P> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            processor: Arc::clone(&self.processor),
        }
    }
}

/// Result of dispatching one message through a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A processor returned `true`
    Claimed(&'static str),
    /// Every processor returned `false`
    Unhandled,
}

/// Ordered processor chain bound to one queue.
#[async_trait]
pub trait Dispatch: Send + Sync + 'static {
    /// Label of the chain kind, used in configuration errors.
    const KIND: &'static str;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offer `message` to each processor in order until one claims it.
    async fn dispatch(
        &self,
        message: &Message,
        context: &CallContext,
        adapter: &dyn MessageAdapter,
    ) -> Result<DispatchOutcome, ProcessingError>;
}

/// Chain of plain processors.
#[derive(Clone, Default)]
pub struct ProcessorChain {
    sync: Vec<Registered<dyn Processor>>,
    asynchronous: Vec<Registered<dyn AsyncProcessor>>,
}

impl ProcessorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, processor: Registered<dyn Processor>) {
        self.sync.push(processor);
    }

    pub fn push_async(&mut self, processor: Registered<dyn AsyncProcessor>) {
        self.asynchronous.push(processor);
    }

    /// Processor labels in dispatch order.
    pub fn names(&self) -> Vec<&'static str> {
        self.sync
            .iter()
            .map(|p| p.name)
            .chain(self.asynchronous.iter().map(|p| p.name))
            .collect()
    }
}

#[async_trait]
impl Dispatch for ProcessorChain {
    const KIND: &'static str = "plain processors";

    fn len(&self) -> usize {
        self.sync.len() + self.asynchronous.len()
    }

    async fn dispatch(
        &self,
        message: &Message,
        context: &CallContext,
        _adapter: &dyn MessageAdapter,
    ) -> Result<DispatchOutcome, ProcessingError> {
        for entry in &self.sync {
            if entry.processor.process(message, context)? {
                return Ok(DispatchOutcome::Claimed(entry.name));
            }
            debug!(processor = entry.name, "Processor passed on message");
        }

        for entry in &self.asynchronous {
            if entry.processor.process(message, context).await? {
                return Ok(DispatchOutcome::Claimed(entry.name));
            }
            debug!(processor = entry.name, "Processor passed on message");
        }

        Ok(DispatchOutcome::Unhandled)
    }
}

/// Chain of reply-capable processors.
#[derive(Clone, Default)]
pub struct ReplyProcessorChain {
    sync: Vec<Registered<dyn ReplyProcessor>>,
    asynchronous: Vec<Registered<dyn AsyncReplyProcessor>>,
}

impl ReplyProcessorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, processor: Registered<dyn ReplyProcessor>) {
        self.sync.push(processor);
    }

    pub fn push_async(&mut self, processor: Registered<dyn AsyncReplyProcessor>) {
        self.asynchronous.push(processor);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.sync
            .iter()
            .map(|p| p.name)
            .chain(self.asynchronous.iter().map(|p| p.name))
            .collect()
    }
}

/// Send every response queued on `action` through the adapter.
async fn forward_replies(
    processor: &'static str,
    action: &ReplyAction,
    adapter: &dyn MessageAdapter,
) -> Result<(), ProcessingError> {
    let responses = action.take();
    if responses.is_empty() {
        return Ok(());
    }

    let subscriber = adapter
        .as_subscriber()
        .ok_or(ProcessingError::Reply(AdapterError::Unsupported("reply")))?;

    if responses.len() > 1 {
        warn!(processor, replies = responses.len(), "Processor replied more than once");
    }

    for response in responses {
        let sent = subscriber.reply(response).await?;
        debug!(
            processor,
            message_id = %sent.message_id,
            correlation_id = ?sent.correlation_id,
            reply_to = ?sent.reply_to,
            "Reply sent"
        );
    }
    Ok(())
}

#[async_trait]
impl Dispatch for ReplyProcessorChain {
    const KIND: &'static str = "reply processors";

    fn len(&self) -> usize {
        self.sync.len() + self.asynchronous.len()
    }

    async fn dispatch(
        &self,
        message: &Message,
        context: &CallContext,
        adapter: &dyn MessageAdapter,
    ) -> Result<DispatchOutcome, ProcessingError> {
        for entry in &self.sync {
            let action = ReplyAction::new(message);
            let claimed = entry.processor.process(message, context, &action)?;
            forward_replies(entry.name, &action, adapter).await?;
            if claimed {
                return Ok(DispatchOutcome::Claimed(entry.name));
            }
        }

        for entry in &self.asynchronous {
            let action = ReplyAction::new(message);
            let claimed = entry.processor.process(message, context, &action).await?;
            forward_replies(entry.name, &action, adapter).await?;
            if claimed {
                return Ok(DispatchOutcome::Claimed(entry.name));
            }
        }

        Ok(DispatchOutcome::Unhandled)
    }
}

/// A processor that claims every message without doing anything.
#[derive(Debug, Clone, Default)]
pub struct NoOpProcessor;

impl Processor for NoOpProcessor {
    fn process(&self, _message: &Message, _context: &CallContext) -> Result<bool, ProcessingError> {
        Ok(true)
    }
}

/// A processor that always fails (for testing).
#[derive(Debug, Clone)]
pub struct FailingProcessor {
    error_message: String,
}

impl FailingProcessor {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error_message: message.into(),
        }
    }
}

impl Processor for FailingProcessor {
    fn process(&self, _message: &Message, _context: &CallContext) -> Result<bool, ProcessingError> {
        Err(ProcessingError::new(&self.error_message))
    }
}

/// Short type name for processor labels: `my_app::handlers::Ping` -> `Ping`.
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
