//! Demo processors and their registration.
//!
//! | Processing type      | Chain                         |
//! |----------------------|-------------------------------|
//! | `ThreadStrategy`     | `PingProcessor`, `AuditProcessor` |
//! | `Subscribe`          | `AuditProcessor`              |
//! | `SubscribeAndReply`  | `EchoProcessor`               |

use async_trait::async_trait;
use queue_reactor::{
    AsyncProcessor, CallContext, ConfigError, Message, ProcessingError, ProcessingType, Processor,
    ProcessorRegistry, QueuesConfig, ReplyAction, ReplyProcessor,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Counters shared by the demo processors.
#[derive(Debug, Default)]
pub struct ProcessorStats {
    pings: AtomicU64,
    audited: AtomicU64,
    echoed: AtomicU64,
}

impl ProcessorStats {
    pub fn pings(&self) -> u64 {
        self.pings.load(Ordering::Relaxed)
    }

    pub fn audited(&self) -> u64 {
        self.audited.load(Ordering::Relaxed)
    }

    pub fn echoed(&self) -> u64 {
        self.echoed.load(Ordering::Relaxed)
    }
}

/// Claims messages whose body is `ping`.
pub struct PingProcessor {
    stats: Arc<ProcessorStats>,
}

impl PingProcessor {
    pub fn new(stats: Arc<ProcessorStats>) -> Self {
        Self { stats }
    }
}

impl Processor for PingProcessor {
    fn process(&self, message: &Message, context: &CallContext) -> Result<bool, ProcessingError> {
        if message.body_text().trim() != "ping" {
            return Ok(false);
        }

        let total = self.stats.pings.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            message_id = %message.message_id,
            request_id = %context.request_id,
            total,
            "pong"
        );
        Ok(true)
    }
}

/// Records every message it sees; the catch-all at the end of a chain.
pub struct AuditProcessor {
    stats: Arc<ProcessorStats>,
}

impl AuditProcessor {
    pub fn new(stats: Arc<ProcessorStats>) -> Self {
        Self { stats }
    }
}

#[async_trait]
impl AsyncProcessor for AuditProcessor {
    async fn process(&self, message: &Message, context: &CallContext) -> Result<bool, ProcessingError> {
        self.stats.audited.fetch_add(1, Ordering::Relaxed);
        info!(
            message_id = %message.message_id,
            user_id = %context.user_id,
            request_id = %context.request_id,
            body = %message.log_body(),
            "Audited message"
        );
        Ok(true)
    }
}

/// Replies with the request body.
pub struct EchoProcessor {
    stats: Arc<ProcessorStats>,
}

impl EchoProcessor {
    pub fn new(stats: Arc<ProcessorStats>) -> Self {
        Self { stats }
    }
}

impl ReplyProcessor for EchoProcessor {
    fn process(
        &self,
        message: &Message,
        context: &CallContext,
        reply: &ReplyAction,
    ) -> Result<bool, ProcessingError> {
        if reply.reply_to().is_none() {
            return Err(ProcessingError::new("echo request has no reply-to queue"));
        }

        let mut response = Message::text(message.body_text());
        context.apply_to(&mut response.properties);
        reply.reply(response);

        self.stats.echoed.fetch_add(1, Ordering::Relaxed);
        debug!(message_id = %message.message_id, correlation_id = ?reply.correlation_id(), "Echoed");
        Ok(true)
    }
}

/// Register the demo chain for every configured queue.
pub fn register(
    queues: &QueuesConfig,
    stats: &Arc<ProcessorStats>,
) -> Result<ProcessorRegistry, ConfigError> {
    let mut builder = ProcessorRegistry::builder();

    for settings in &queues.queues {
        match settings.processing_type {
            ProcessingType::ThreadStrategy => {
                builder
                    .register(&settings.id)?
                    .processor(PingProcessor::new(Arc::clone(stats)))
                    .async_processor(AuditProcessor::new(Arc::clone(stats)));
            }
            ProcessingType::Subscribe => {
                builder
                    .register(&settings.id)?
                    .async_processor(AuditProcessor::new(Arc::clone(stats)));
            }
            ProcessingType::SubscribeAndReply => {
                builder
                    .register_reply(&settings.id)?
                    .processor(EchoProcessor::new(Arc::clone(stats)));
            }
        }
    }

    Ok(builder.build())
}
