//! Transport-agnostic queue reactors.
//!
//! This library binds message-queue endpoints to application processors:
//! - **Adapters**: broker drivers behind a base contract plus optional
//!   subscribe and transaction capabilities
//! - **Reactors**: one per queue, polling or push driven, dispatching each
//!   message through an ordered processor chain
//! - **Façades**: typed sender, receiver and RPC sender for call sites that
//!   do not need a reactor
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐    ┌───────────────────┐    ┌──────────────────────┐
//! │  QueuesConfig    │    │ ProcessorRegistry │    │   AdapterFactory     │
//! └────────┬─────────┘    └─────────┬─────────┘    └──────────┬───────────┘
//!          └───────────────┬────────┴─────────────────────────┘
//!                          ▼
//!                  ┌───────────────┐  NeedReconnect  ┌──────────────┐
//!                  │ ReactorFactory│◀────────────────│ ReactorHost  │
//!                  └───────┬───────┘                 └──────────────┘
//!                          ▼
//!                  ┌───────────────┐   dispatch   ┌────────────────────┐
//!                  │ QueueReactor  │─────────────▶│ processors (order) │
//!                  └───────┬───────┘              └────────────────────┘
//!                          ▼
//!                  ┌───────────────┐
//!                  │ MessageAdapter│  (in-memory, or any broker driver)
//!                  └───────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use queue_reactor::{
//!     memory::{InMemoryAdapterFactory, InMemoryBroker},
//!     ProcessorRegistry, QueuesConfig, ReactorFactory, ReactorHost,
//! };
//!
//! let mut builder = ProcessorRegistry::builder();
//! builder.register("orders")?.processor(OrderProcessor::new(repo));
//! builder.register_reply("pricing")?.async_processor(QuoteProcessor);
//!
//! let adapters = Arc::new(InMemoryAdapterFactory::new(InMemoryBroker::new()));
//! let factory = ReactorFactory::new(QueuesConfig::from_env()?, builder.build(), adapters)?;
//!
//! let host = ReactorHost::new(factory);
//! host.run_until(shutdown_signal()).await?;
//! ```

pub mod adapter;
pub mod config;
pub mod context;
pub mod error;
pub mod factory;
pub mod host;
pub mod memory;
pub mod message;
pub mod metrics;
pub mod polling;
pub mod processor;
pub mod reactor;
pub mod receiver;
pub mod registry;
pub mod rpc;
pub mod sender;
pub mod serializer;

pub use adapter::{
    AdapterFactory, Delivery, MessageAdapter, ReceiveOptions, SubscribingAdapter,
    TransactionalAdapter,
};
pub use config::{
    Credentials, HealthCheckFlags, ProcessingType, QueueDef, QueueSettings, QueuesConfig,
};
pub use context::{CallContext, ContextHeader};
pub use error::{
    AdapterError, ConfigError, ErrorCategory, MessagingError, ProcessingError, SerializationError,
};
pub use factory::ReactorFactory;
pub use host::{HealthStatus, ReactorHost};
pub use message::{Body, Message, Properties, PropertyValue};
pub use polling::{CancelHandle, PollingEngine, UnitOfWork};
pub use processor::{
    AsyncProcessor, AsyncReplyProcessor, FailingProcessor, NoOpProcessor, Processor,
    ReplyAction, ReplyProcessor,
};
pub use reactor::{
    QueueHealth, QueueReactor, Reactor, ReactorEvent, SubscribeAndReplyReactor, SubscribeReactor,
};
pub use receiver::{MessageReceiver, Received};
pub use registry::{ProcessorRegistry, ProcessorRegistryBuilder};
pub use rpc::RpcSender;
pub use sender::{MessageSender, SendOptions};
pub use serializer::{
    BytesSerializer, JsonSerializer, Serializer, SerializerRegistry, TextSerializer,
};
