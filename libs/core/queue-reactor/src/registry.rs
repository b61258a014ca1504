//! Startup-time processor registration.
//!
//! Processors are registered per queue id on a [`ProcessorRegistryBuilder`]
//! during startup composition. [`ProcessorRegistryBuilder::build`] freezes
//! the result into a [`ProcessorRegistry`] that is only read afterwards.
//!
//! ```rust,ignore
//! let mut builder = ProcessorRegistry::builder();
//! builder
//!     .register("orders")?
//!     .processor(PriorityOrderProcessor)
//!     .processor(DefaultOrderProcessor);
//! builder.register_reply("pricing")?.async_processor(QuoteProcessor::new(client));
//! let registry = builder.build();
//! ```

use crate::error::ConfigError;
use crate::processor::{
    short_type_name, AsyncProcessor, AsyncReplyProcessor, Dispatch, Processor, ProcessorChain,
    Registered, ReplyProcessor, ReplyProcessorChain,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Processors bound to one queue.
#[derive(Clone)]
pub enum Registration {
    /// For `ThreadStrategy` and `Subscribe` queues
    Plain(Arc<ProcessorChain>),
    /// For `SubscribeAndReply` queues
    Reply(Arc<ReplyProcessorChain>),
}

impl Registration {
    /// Chain kind label, used in configuration errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Registration::Plain(_) => ProcessorChain::KIND,
            Registration::Reply(_) => ReplyProcessorChain::KIND,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Registration::Plain(chain) => chain.len(),
            Registration::Reply(chain) => chain.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Processor labels in dispatch order.
    pub fn names(&self) -> Vec<&'static str> {
        match self {
            Registration::Plain(chain) => chain.names(),
            Registration::Reply(chain) => chain.names(),
        }
    }
}

enum Pending {
    Plain(ProcessorChain),
    Reply(ReplyProcessorChain),
}

/// Mutable registration table used during startup.
#[derive(Default)]
pub struct ProcessorRegistryBuilder {
    order: Vec<String>,
    entries: HashMap<String, Pending>,
}

impl ProcessorRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn claim(&mut self, queue_id: &str, pending: Pending) -> Result<&mut Pending, ConfigError> {
        if self.entries.contains_key(queue_id) {
            return Err(ConfigError::DuplicateRegistration(queue_id.to_string()));
        }
        self.order.push(queue_id.to_string());
        Ok(self.entries.entry(queue_id.to_string()).or_insert(pending))
    }

    /// Start registering plain processors for `queue_id`.
    ///
    /// Fails when `queue_id` already has a registration of either kind.
    pub fn register(&mut self, queue_id: &str) -> Result<ProcessorRegistrar<'_>, ConfigError> {
        match self.claim(queue_id, Pending::Plain(ProcessorChain::new()))? {
            Pending::Plain(chain) => Ok(ProcessorRegistrar { chain }),
            Pending::Reply(_) => Err(ConfigError::DuplicateRegistration(queue_id.to_string())),
        }
    }

    /// Start registering reply processors for `queue_id`.
    pub fn register_reply(&mut self, queue_id: &str) -> Result<ReplyRegistrar<'_>, ConfigError> {
        match self.claim(queue_id, Pending::Reply(ReplyProcessorChain::new()))? {
            Pending::Reply(chain) => Ok(ReplyRegistrar { chain }),
            Pending::Plain(_) => Err(ConfigError::DuplicateRegistration(queue_id.to_string())),
        }
    }

    pub fn is_registered(&self, queue_id: &str) -> bool {
        self.entries.contains_key(queue_id)
    }

    /// Freeze the table.
    pub fn build(mut self) -> ProcessorRegistry {
        let mut entries = HashMap::with_capacity(self.order.len());
        for queue_id in &self.order {
            if let Some(pending) = self.entries.remove(queue_id) {
                let registration = match pending {
                    Pending::Plain(chain) => Registration::Plain(Arc::new(chain)),
                    Pending::Reply(chain) => Registration::Reply(Arc::new(chain)),
                };
                entries.insert(queue_id.clone(), registration);
            }
        }

        ProcessorRegistry {
            order: self.order,
            entries,
        }
    }
}

/// Adds plain processors to one queue, in dispatch order.
pub struct ProcessorRegistrar<'a> {
    chain: &'a mut ProcessorChain,
}

impl ProcessorRegistrar<'_> {
    pub fn processor<P: Processor + 'static>(self, processor: P) -> Self {
        self.shared_processor(Arc::new(processor))
    }

    pub fn shared_processor<P: Processor + 'static>(self, processor: Arc<P>) -> Self {
        let processor: Arc<dyn Processor> = processor;
        self.chain.push(Registered::new(short_type_name::<P>(), processor));
        self
    }

    pub fn async_processor<P: AsyncProcessor + 'static>(self, processor: P) -> Self {
        self.shared_async_processor(Arc::new(processor))
    }

    pub fn shared_async_processor<P: AsyncProcessor + 'static>(self, processor: Arc<P>) -> Self {
        let processor: Arc<dyn AsyncProcessor> = processor;
        self.chain.push_async(Registered::new(short_type_name::<P>(), processor));
        self
    }
}

/// Adds reply processors to one queue, in dispatch order.
pub struct ReplyRegistrar<'a> {
    chain: &'a mut ReplyProcessorChain,
}

impl ReplyRegistrar<'_> {
    pub fn processor<P: ReplyProcessor + 'static>(self, processor: P) -> Self {
        self.shared_processor(Arc::new(processor))
    }

    pub fn shared_processor<P: ReplyProcessor + 'static>(self, processor: Arc<P>) -> Self {
        let processor: Arc<dyn ReplyProcessor> = processor;
        self.chain.push(Registered::new(short_type_name::<P>(), processor));
        self
    }

    pub fn async_processor<P: AsyncReplyProcessor + 'static>(self, processor: P) -> Self {
        self.shared_async_processor(Arc::new(processor))
    }

    pub fn shared_async_processor<P: AsyncReplyProcessor + 'static>(
        self,
        processor: Arc<P>,
    ) -> Self {
        let processor: Arc<dyn AsyncReplyProcessor> = processor;
        self.chain.push_async(Registered::new(short_type_name::<P>(), processor));
        self
    }
}

/// Immutable queue id -> processor chain mapping.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    order: Vec<String>,
    entries: HashMap<String, Registration>,
}

impl ProcessorRegistry {
    pub fn builder() -> ProcessorRegistryBuilder {
        ProcessorRegistryBuilder::new()
    }

    pub fn get(&self, queue_id: &str) -> Option<&Registration> {
        self.entries.get(queue_id)
    }

    /// Registered queue ids in registration order.
    pub fn queue_ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for queue_id in &self.order {
            if let Some(registration) = self.entries.get(queue_id) {
                map.entry(queue_id, &registration.names());
            }
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CallContext;
    use crate::error::ProcessingError;
    use crate::message::Message;
    use crate::processor::{NoOpProcessor, ReplyAction};
    use async_trait::async_trait;

    struct Echo;

    impl ReplyProcessor for Echo {
        fn process(
            &self,
            message: &Message,
            _context: &CallContext,
            reply: &ReplyAction,
        ) -> Result<bool, ProcessingError> {
            reply.reply(Message::text(message.body_text()));
            Ok(true)
        }
    }

    struct Audit;

    #[async_trait]
    impl AsyncProcessor for Audit {
        async fn process(
            &self,
            _message: &Message,
            _context: &CallContext,
        ) -> Result<bool, ProcessingError> {
            Ok(false)
        }
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut builder = ProcessorRegistry::builder();
        builder.register("orders").unwrap().processor(NoOpProcessor);

        let err = builder.register("orders").err().unwrap();
        assert!(matches!(err, ConfigError::DuplicateRegistration(ref id) if id == "orders"));

        // Different kind, same id
        let err = builder.register_reply("orders").err().unwrap();
        assert!(matches!(err, ConfigError::DuplicateRegistration(_)));
    }

    #[test]
    fn test_build_preserves_order_and_kinds() {
        let mut builder = ProcessorRegistry::builder();
        builder
            .register("orders")
            .unwrap()
            .async_processor(Audit)
            .processor(NoOpProcessor);
        builder.register_reply("rpc").unwrap().processor(Echo);
        assert!(builder.is_registered("rpc"));

        let registry = builder.build();
        assert_eq!(registry.queue_ids().collect::<Vec<_>>(), vec!["orders", "rpc"]);

        let orders = registry.get("orders").unwrap();
        assert_eq!(orders.kind(), ProcessorChain::KIND);
        assert_eq!(orders.names(), vec!["NoOpProcessor", "Audit"]);

        let rpc = registry.get("rpc").unwrap();
        assert!(matches!(rpc, Registration::Reply(_)));
        assert_eq!(rpc.len(), 1);

        assert!(registry.get("missing").is_none());
        assert!(format!("{:?}", registry).contains("NoOpProcessor"));
    }

    #[test]
    fn test_shared_processor_instances() {
        let shared = Arc::new(NoOpProcessor);
        let mut builder = ProcessorRegistry::builder();
        builder.register("a").unwrap().shared_processor(Arc::clone(&shared));
        builder.register("b").unwrap().shared_processor(Arc::clone(&shared));

        let registry = builder.build();
        assert_eq!(registry.len(), 2);
        assert_eq!(Arc::strong_count(&shared), 3);
    }
}
