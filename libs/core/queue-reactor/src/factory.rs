//! Reactor and façade construction.
//!
//! [`ReactorFactory`] joins the queue configuration, the frozen processor
//! registry and an [`AdapterFactory`]. Mismatches between them are rejected
//! in [`ReactorFactory::new`], before any adapter exists.

use crate::adapter::{AdapterFactory, MessageAdapter};
use crate::config::{QueueSettings, QueuesConfig};
use crate::error::{ConfigError, MessagingError};
use crate::reactor::{Reactor, SubscribeAndReplyReactor, SubscribeReactor};
use crate::receiver::MessageReceiver;
use crate::registry::{ProcessorRegistry, Registration};
use crate::rpc::RpcSender;
use crate::sender::MessageSender;
use crate::serializer::SerializerRegistry;
use std::sync::Arc;
use tracing::{debug, info};

/// Builds reactors and typed façades for configured queues.
pub struct ReactorFactory {
    config: QueuesConfig,
    registry: ProcessorRegistry,
    adapters: Arc<dyn AdapterFactory>,
}

impl ReactorFactory {
    /// Validate the configuration against the registry.
    ///
    /// Every registered queue must be configured, and its processor kind
    /// must match the queue's processing type.
    pub fn new(
        config: QueuesConfig,
        registry: ProcessorRegistry,
        adapters: Arc<dyn AdapterFactory>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        for queue_id in registry.queue_ids() {
            let settings = config
                .get(queue_id)
                .ok_or_else(|| ConfigError::UnknownQueue(queue_id.to_string()))?;
            if let Some(registration) = registry.get(queue_id) {
                check_kind(settings, registration)?;
            }
        }

        let unbound: Vec<&str> = config
            .ids()
            .filter(|id| registry.get(id).is_none())
            .collect();
        if !unbound.is_empty() {
            debug!(queues = ?unbound, "Configured queues without processors");
        }

        Ok(Self {
            config,
            registry,
            adapters,
        })
    }

    /// Queues with registered processors, in registration order.
    pub fn queue_ids(&self) -> impl Iterator<Item = &str> {
        self.registry.queue_ids()
    }

    pub fn config(&self) -> &QueuesConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    pub fn settings(&self, queue_id: &str) -> Result<&QueueSettings, ConfigError> {
        self.config
            .get(queue_id)
            .ok_or_else(|| ConfigError::UnknownQueue(queue_id.to_string()))
    }

    /// Fresh adapter for `queue_id`. Adapters are never shared.
    pub fn create_adapter(&self, queue_id: &str) -> Result<Arc<dyn MessageAdapter>, MessagingError> {
        let settings = self.settings(queue_id)?;
        Ok(self.adapters.create(settings)?)
    }

    /// Build the reactor for `queue_id` with a fresh adapter.
    ///
    /// The reactor is returned stopped.
    pub fn create_queue_reactor(&self, queue_id: &str) -> Result<Arc<dyn Reactor>, MessagingError> {
        let settings = self.settings(queue_id)?;
        let registration = self
            .registry
            .get(queue_id)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| ConfigError::NotRegistered(queue_id.to_string()))?;
        check_kind(settings, registration)?;

        let adapter = self.adapters.create(settings)?;
        if !adapter.supports_processing_type(settings.processing_type) {
            return Err(ConfigError::UnsupportedProcessingType {
                queue_id: queue_id.to_string(),
                processing_type: settings.processing_type,
            }
            .into());
        }
        if settings.processing_type.is_push() && adapter.as_subscriber().is_none() {
            return Err(ConfigError::MissingCapability {
                queue_id: queue_id.to_string(),
                capability: "subscribe",
            }
            .into());
        }

        let shared = Arc::new(settings.clone());
        let reactor: Arc<dyn Reactor> = match registration {
            Registration::Plain(chain) => {
                Arc::new(SubscribeReactor::new(shared, adapter, Arc::clone(chain)))
            }
            Registration::Reply(chain) => {
                Arc::new(SubscribeAndReplyReactor::new(shared, adapter, Arc::clone(chain)))
            }
        };

        info!(
            queue_id,
            processing_type = %settings.processing_type,
            processors = ?registration.names(),
            "Reactor created"
        );
        Ok(reactor)
    }

    /// Sender for `queue_id`, with the serializer registered for `T`.
    pub fn sender<T: Send + Sync + 'static>(
        &self,
        queue_id: &str,
        serializers: &SerializerRegistry,
    ) -> Result<MessageSender<T>, MessagingError> {
        let serializer = serializers.resolve::<T>()?;
        let settings = Arc::new(self.settings(queue_id)?.clone());
        let adapter = self.adapters.create(&settings)?;
        Ok(MessageSender::new(settings, adapter, serializer))
    }

    /// Receiver for `queue_id`, with the serializer registered for `T`.
    pub fn receiver<T: Send + 'static>(
        &self,
        queue_id: &str,
        serializers: &SerializerRegistry,
    ) -> Result<MessageReceiver<T>, MessagingError> {
        let serializer = serializers.resolve::<T>()?;
        let settings = Arc::new(self.settings(queue_id)?.clone());
        let adapter = self.adapters.create(&settings)?;
        Ok(MessageReceiver::new(settings, adapter, serializer))
    }

    /// RPC client for `queue_id`.
    ///
    /// When the driver has no request/reply support, replies are read from
    /// the configured reply queue through a second adapter.
    pub fn rpc_sender<Req, Resp>(
        &self,
        queue_id: &str,
        serializers: &SerializerRegistry,
    ) -> Result<RpcSender<Req, Resp>, MessagingError>
    where
        Req: Send + Sync + 'static,
        Resp: Send + 'static,
    {
        let response = serializers.resolve::<Resp>()?;
        let sender = self.sender::<Req>(queue_id, serializers)?;

        let rpc = match (&sender.settings().reply_queue, sender.adapter().as_subscriber()) {
            (Some(reply_queue), None) => {
                let mut reply_settings = sender.settings().clone();
                reply_settings.id = format!("{}.reply", reply_settings.id);
                reply_settings.queue_name = reply_queue.clone();
                reply_settings.reply_queue = None;
                let reply = self.adapters.create(&reply_settings)?;
                RpcSender::new(sender, response).with_reply_adapter(reply)
            }
            _ => RpcSender::new(sender, response),
        };
        Ok(rpc)
    }
}

fn check_kind(settings: &QueueSettings, registration: &Registration) -> Result<(), ConfigError> {
    let expects_reply = settings.processing_type.requires_reply();
    let has_reply = matches!(registration, Registration::Reply(_));

    if expects_reply != has_reply {
        return Err(ConfigError::ProcessingTypeMismatch {
            queue_id: settings.id.clone(),
            processing_type: settings.processing_type,
            registered: registration.kind(),
        });
    }
    Ok(())
}
