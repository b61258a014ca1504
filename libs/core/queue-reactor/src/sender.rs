//! Typed outbound façade.

use crate::adapter::{self, MessageAdapter};
use crate::config::QueueSettings;
use crate::context::CallContext;
use crate::error::MessagingError;
use crate::message::{Message, Properties, PropertyValue};
use crate::serializer::Serializer;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Per-call overrides for a send.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub correlation_id: Option<String>,

    /// Extra properties, merged over the context headers
    pub properties: Properties,

    /// Context to stamp; defaults to the ambient one, then a fresh one
    pub context: Option<CallContext>,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_context(mut self, context: CallContext) -> Self {
        self.context = Some(context);
        self
    }
}

/// Serializes values of `T` and sends them to one queue.
pub struct MessageSender<T> {
    settings: Arc<QueueSettings>,
    adapter: Arc<dyn MessageAdapter>,
    serializer: Arc<dyn Serializer<T>>,
}

impl<T: Send + Sync + 'static> MessageSender<T> {
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

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    pub fn adapter(&self) -> &Arc<dyn MessageAdapter> {
        &self.adapter
    }

    pub async fn send(&self, value: &T) -> Result<Message, MessagingError> {
        self.send_with(value, SendOptions::default()).await
    }

    /// Send `value`; the returned envelope carries the broker-assigned id.
    #[instrument(skip_all, fields(queue_id = %self.settings.id))]
    pub async fn send_with(&self, value: &T, options: SendOptions) -> Result<Message, MessagingError> {
        let message = self.prepare(value, options)?;

        adapter::ensure_connected(self.adapter.as_ref()).await?;
        let sent = self.adapter.send(message).await?;
        adapter::commit_if_transacted(self.adapter.as_ref(), &sent).await?;

        debug!(
            message_id = %sent.message_id,
            correlation_id = ?sent.correlation_id,
            body = %sent.log_body(),
            "Message sent"
        );
        Ok(sent)
    }

    /// Serialize and stamp headers, reply-to and lifetime.
    pub(crate) fn prepare(&self, value: &T, options: SendOptions) -> Result<Message, MessagingError> {
        let mut message = self.serializer.serialize(value)?;

        let context = options
            .context
            .or_else(CallContext::current)
            .unwrap_or_default();
        context.apply_to(&mut message.properties);
        message.properties.extend(options.properties);

        if let Some(id) = options.correlation_id {
            message.correlation_id = Some(id);
        }
        if message.reply_to.is_none() {
            message.reply_to = self.settings.reply_queue.clone();
        }
        if message.time_to_live.is_none() {
            message.time_to_live = self.settings.lifetime();
        }

        Ok(message)
    }
}
