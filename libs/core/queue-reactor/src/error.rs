//! Error types for adapters, configuration, serialization and processing.

use crate::config::ProcessingType;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Error categories determine how a failure is handled.
///
/// # Categories
///
/// - **Configuration**: detected at startup, never recovered, surfaced to the caller
/// - **Transport**: broker unavailable or timed out, the reactor reconnects
/// - **Empty**: no message within the receive timeout, not a failure
/// - **Serialization**: payload could not be mapped to or from a type
/// - **Processing**: a processor failed, contained at the reactor boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Duplicate registration, mismatched processing type, missing fields
    Configuration,

    /// Connection timeouts, broker unavailability during receive
    Transport,

    /// No message available within a receive timeout
    Empty,

    /// Payload problem rather than broker problem
    Serialization,

    /// A processor raised an error during dispatch
    Processing,
}

impl ErrorCategory {
    /// Whether the surrounding loop should keep going after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Transport | ErrorCategory::Empty)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Transport => write!(f, "transport"),
            ErrorCategory::Empty => write!(f, "empty"),
            ErrorCategory::Serialization => write!(f, "serialization"),
            ErrorCategory::Processing => write!(f, "processing"),
        }
    }
}

/// Error raised by a broker driver.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Operation timed out (connect, send, request/reply)
    #[error("timeout: {0}")]
    Timeout(String),

    /// No message arrived within the receive timeout
    #[error("no message available")]
    NoMessage,

    /// Network or broker connection failure
    #[error("connection error: {0}")]
    Connection(String),

    /// Credentials rejected by the broker
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Operation requires a connected adapter
    #[error("adapter is not connected")]
    NotConnected,

    /// Capability or processing type not provided by this driver
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Any other driver failure
    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl AdapterError {
    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transport error with a source.
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Timeout-shaped failures are transient and retried in place.
    pub fn is_timeout(&self) -> bool {
        matches!(self, AdapterError::Timeout(_))
    }

    /// The "nothing to read" condition, never a transport failure.
    pub fn is_no_message(&self) -> bool {
        matches!(self, AdapterError::NoMessage)
    }

    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            AdapterError::NoMessage => ErrorCategory::Empty,
            AdapterError::Unsupported(_) => ErrorCategory::Configuration,
            _ => ErrorCategory::Transport,
        }
    }
}

/// Startup configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("processor already registered for queue '{0}'")]
    DuplicateRegistration(String),

    #[error("queue id '{0}' is configured more than once")]
    DuplicateQueue(String),

    #[error("queue '{0}' is not configured")]
    UnknownQueue(String),

    #[error("no processors registered for queue '{0}'")]
    NotRegistered(String),

    #[error("queue '{queue_id}' is configured as {processing_type} but its processors are {registered}")]
    ProcessingTypeMismatch {
        queue_id: String,
        processing_type: ProcessingType,
        registered: &'static str,
    },

    #[error("adapter for queue '{queue_id}' does not support {processing_type}")]
    UnsupportedProcessingType {
        queue_id: String,
        processing_type: ProcessingType,
    },

    #[error("adapter for queue '{queue_id}' lacks the {capability} capability")]
    MissingCapability {
        queue_id: String,
        capability: &'static str,
    },

    #[error("no serializer registered for type {0}")]
    MissingSerializer(&'static str),

    #[error("invalid queue configuration '{queue_id}': {field} {reason}")]
    InvalidField {
        queue_id: String,
        field: &'static str,
        reason: String,
    },

    #[error("failed to read queue configuration from {origin}: {details}")]
    Source { origin: String, details: String },
}

/// Direction of a failed serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializationDirection {
    Serialize,
    Deserialize,
}

impl fmt::Display for SerializationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializationDirection::Serialize => write!(f, "serialize"),
            SerializationDirection::Deserialize => write!(f, "deserialize"),
        }
    }
}

/// Payload could not be mapped to or from a typed message.
#[derive(Debug, Error)]
#[error("failed to {direction} {type_name}: {source}")]
pub struct SerializationError {
    pub type_name: &'static str,
    pub direction: SerializationDirection,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl SerializationError {
    pub fn serialize<T: ?Sized>(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            direction: SerializationDirection::Serialize,
            source: source.into(),
        }
    }

    pub fn deserialize<T: ?Sized>(
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            direction: SerializationDirection::Deserialize,
            source: source.into(),
        }
    }
}

/// Error returned by a processor while handling a message.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("processing failed: {message}")]
    Failed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("processor panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error("reply failed: {0}")]
    Reply(#[from] AdapterError),
}

impl ProcessingError {
    /// Create a processing error.
    pub fn new(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a processing error with a source.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Failed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::Panicked(message)
    }
}

/// Umbrella error returned by the façades, the factory and the host.
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error(transparent)]
    Processing(#[from] ProcessingError),

    /// Blocking receive found nothing
    #[error("no message available on queue '{queue}'")]
    Empty { queue: String },

    /// No correlated reply arrived in time
    #[error("no reply for correlation id '{correlation_id}' within {timeout:?}")]
    Timeout {
        correlation_id: String,
        timeout: Duration,
    },
}

impl MessagingError {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            MessagingError::Config(_) => ErrorCategory::Configuration,
            MessagingError::Adapter(e) => e.category(),
            MessagingError::Serialization(_) => ErrorCategory::Serialization,
            MessagingError::Processing(_) => ErrorCategory::Processing,
            MessagingError::Empty { .. } => ErrorCategory::Empty,
            MessagingError::Timeout { .. } => ErrorCategory::Transport,
        }
    }

    /// True for the blocking-receive empty condition.
    pub fn is_empty(&self) -> bool {
        matches!(self, MessagingError::Empty { .. })
    }

    /// True when a correlated reply did not arrive in time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, MessagingError::Timeout { .. })
            || matches!(self, MessagingError::Adapter(e) if e.is_timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_error_classification() {
        assert!(AdapterError::Timeout("connect".into()).is_timeout());
        assert!(!AdapterError::Connection("refused".into()).is_timeout());
        assert!(AdapterError::NoMessage.is_no_message());

        assert_eq!(AdapterError::NoMessage.category(), ErrorCategory::Empty);
        assert_eq!(
            AdapterError::Connection("refused".into()).category(),
            ErrorCategory::Transport
        );
        assert_eq!(
            AdapterError::Unsupported("subscribe").category(),
            ErrorCategory::Configuration
        );
    }

    #[test]
    fn test_retryable_categories() {
        assert!(ErrorCategory::Transport.is_retryable());
        assert!(ErrorCategory::Empty.is_retryable());
        assert!(!ErrorCategory::Configuration.is_retryable());
        assert!(!ErrorCategory::Serialization.is_retryable());
    }

    #[test]
    fn test_messaging_error_category() {
        let err = MessagingError::from(ConfigError::DuplicateRegistration("orders".into()));
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert!(err.to_string().contains("orders"));

        let err = MessagingError::Empty {
            queue: "orders".into(),
        };
        assert!(err.is_empty());
        assert_eq!(err.category(), ErrorCategory::Empty);

        let err = MessagingError::Timeout {
            correlation_id: "abc".into(),
            timeout: Duration::from_secs(5),
        };
        assert!(err.is_timeout());
    }

    #[test]
    fn test_serialization_error_carries_type_and_cause() {
        let cause = serde_json::from_str::<u32>("nope").unwrap_err();
        let err = SerializationError::deserialize::<u32>(cause);
        assert_eq!(err.type_name, "u32");
        assert_eq!(err.direction, SerializationDirection::Deserialize);
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().starts_with("failed to deserialize u32"));
    }

    #[test]
    fn test_processing_error_from_panic() {
        let err = ProcessingError::from_panic(Box::new("boom"));
        assert!(matches!(err, ProcessingError::Panicked(ref m) if m == "boom"));

        let err = ProcessingError::from_panic(Box::new(String::from("bang")));
        assert!(err.to_string().contains("bang"));
    }
}
