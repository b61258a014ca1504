//! Queue configuration.
//!
//! One [`QueueSettings`] per logical queue endpoint, collected into a
//! [`QueuesConfig`] by the external configuration loader. Everything is
//! validated eagerly at startup; a malformed or duplicate entry is a
//! [`ConfigError`], never a first-message surprise.

use crate::error::ConfigError;
use core_config::{env_required, FromEnv};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Env var holding a path to a JSON queue configuration file.
pub const QUEUES_FILE_ENV: &str = "MQ_QUEUES_FILE";

/// Env var holding inline JSON queue configuration.
pub const QUEUES_ENV: &str = "MQ_QUEUES";

/// Declared consumption mode of a queue.
///
/// Determines which reactor specialization may be bound to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, AsRefStr, EnumString, EnumIter)]
pub enum ProcessingType {
    /// Background polling loop over a blocking/non-blocking receive
    #[default]
    ThreadStrategy,
    /// Driver pushes messages to the reactor
    Subscribe,
    /// Driver pushes requests; processors answer through a reply action
    SubscribeAndReply,
}

impl ProcessingType {
    /// Whether the driver pushes messages rather than being polled.
    pub fn is_push(&self) -> bool {
        !matches!(self, ProcessingType::ThreadStrategy)
    }

    /// Whether processors for this queue must be reply-capable.
    pub fn requires_reply(&self) -> bool {
        matches!(self, ProcessingType::SubscribeAndReply)
    }
}

/// Broker credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Health-check participation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckFlags {
    /// Report this queue to the health aggregator
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// An unhealthy queue makes the whole host unhealthy
    #[serde(default = "default_true")]
    pub critical: bool,
}

impl Default for HealthCheckFlags {
    fn default() -> Self {
        Self {
            enabled: true,
            critical: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_polling_interval_ms() -> u64 {
    1000
}

fn default_receive_timeout_ms() -> u64 {
    1000
}

fn default_connect_attempts() -> u32 {
    3
}

fn default_push_buffer() -> usize {
    64
}

/// Configuration of one logical queue endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Logical identifier processors are registered under
    pub id: String,

    /// Broker address
    pub server: String,

    /// Physical queue name on the broker
    pub queue_name: String,

    /// Consumption mode
    #[serde(default)]
    pub processing_type: ProcessingType,

    /// Broker credentials
    #[serde(default)]
    pub credentials: Option<Credentials>,

    /// Queue replies are expected on
    #[serde(default)]
    pub reply_queue: Option<String>,

    /// Default time-to-live of sent messages
    #[serde(default)]
    pub lifetime_ms: Option<u64>,

    /// Idle wait between empty polls, and reconnect interval
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,

    /// How long one receive call may block
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,

    /// Connect attempts on timeout before a start is reported as failed
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    /// Capacity of the push channel between driver and reactor
    #[serde(default = "default_push_buffer")]
    pub push_buffer: usize,

    /// Commit/rollback around each dispatched message
    #[serde(default)]
    pub transacted: bool,

    /// Health-check participation
    #[serde(default)]
    pub health_check: HealthCheckFlags,
}

impl QueueSettings {
    /// Create settings with defaults for everything but identity and address.
    pub fn new(
        id: impl Into<String>,
        server: impl Into<String>,
        queue_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            server: server.into(),
            queue_name: queue_name.into(),
            processing_type: ProcessingType::default(),
            credentials: None,
            reply_queue: None,
            lifetime_ms: None,
            polling_interval_ms: default_polling_interval_ms(),
            receive_timeout_ms: default_receive_timeout_ms(),
            connect_attempts: default_connect_attempts(),
            push_buffer: default_push_buffer(),
            transacted: false,
            health_check: HealthCheckFlags::default(),
        }
    }

    /// Create from queue definition trait constants.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let settings = QueueSettings::from_def::<OrdersQueue>();
    /// ```
    pub fn from_def<D: QueueDef>() -> Self {
        Self::new(D::ID, D::SERVER, D::QUEUE_NAME)
            .with_processing_type(D::PROCESSING_TYPE)
            .with_polling_interval(Duration::from_millis(D::POLLING_INTERVAL_MS))
    }

    pub fn with_processing_type(mut self, processing_type: ProcessingType) -> Self {
        self.processing_type = processing_type;
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_reply_queue(mut self, queue: impl Into<String>) -> Self {
        self.reply_queue = Some(queue.into());
        self
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime_ms = Some(lifetime.as_millis() as u64);
        self
    }

    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_connect_attempts(mut self, attempts: u32) -> Self {
        self.connect_attempts = attempts.max(1);
        self
    }

    pub fn with_push_buffer(mut self, capacity: usize) -> Self {
        self.push_buffer = capacity;
        self
    }

    pub fn with_transacted(mut self, transacted: bool) -> Self {
        self.transacted = transacted;
        self
    }

    pub fn with_health_check(mut self, flags: HealthCheckFlags) -> Self {
        self.health_check = flags;
        self
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn lifetime(&self) -> Option<Duration> {
        self.lifetime_ms.map(Duration::from_millis)
    }

    /// Check required fields and value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: &str| ConfigError::InvalidField {
            queue_id: self.id.clone(),
            field,
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id", "must not be empty"));
        }
        if self.server.trim().is_empty() {
            return Err(invalid("server", "must not be empty"));
        }
        if self.queue_name.trim().is_empty() {
            return Err(invalid("queue_name", "must not be empty"));
        }
        if self.polling_interval_ms == 0 {
            return Err(invalid("polling_interval_ms", "must be greater than zero"));
        }
        if self.connect_attempts == 0 {
            return Err(invalid("connect_attempts", "must be at least 1"));
        }
        if self.processing_type.is_push() && self.push_buffer == 0 {
            return Err(invalid("push_buffer", "must be greater than zero for push queues"));
        }
        if let Some(reply_queue) = &self.reply_queue {
            if reply_queue.trim().is_empty() {
                return Err(invalid("reply_queue", "must not be blank when set"));
            }
        }
        if let Some(credentials) = &self.credentials {
            if credentials.user.trim().is_empty() {
                return Err(invalid("credentials.user", "must not be empty"));
            }
        }

        Ok(())
    }
}

/// Queue definition trait (for type-safe constants).
///
/// Implement this trait to define a queue's configuration constants.
pub trait QueueDef {
    /// Logical queue identifier
    const ID: &'static str;

    /// Broker address
    const SERVER: &'static str;

    /// Physical queue name
    const QUEUE_NAME: &'static str;

    /// Consumption mode (default: ThreadStrategy)
    const PROCESSING_TYPE: ProcessingType = ProcessingType::ThreadStrategy;

    /// Poll interval in milliseconds (default: 1000)
    const POLLING_INTERVAL_MS: u64 = 1000;
}

/// All queue endpoints known to the process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuesConfig {
    pub queues: Vec<QueueSettings>,
}

impl QueuesConfig {
    /// Build and validate from a list of settings.
    pub fn new(queues: Vec<QueueSettings>) -> Result<Self, ConfigError> {
        let config = Self { queues };
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate JSON of the form `{"queues": [...]}`.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Source {
            origin: "inline JSON".to_string(),
            details: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let origin = path.display().to_string();

        let json = std::fs::read_to_string(path).map_err(|e| ConfigError::Source {
            origin: origin.clone(),
            details: e.to_string(),
        })?;
        let config: Self = serde_json::from_str(&json).map_err(|e| ConfigError::Source {
            origin,
            details: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every entry and reject duplicate ids.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for settings in &self.queues {
            settings.validate()?;
            if !seen.insert(settings.id.as_str()) {
                return Err(ConfigError::DuplicateQueue(settings.id.clone()));
            }
        }
        Ok(())
    }

    /// Look up a queue by id.
    pub fn get(&self, id: &str) -> Option<&QueueSettings> {
        self.queues.iter().find(|q| q.id == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.queues.iter().map(|q| q.id.as_str())
    }
}

impl FromEnv for QueuesConfig {
    /// Reads `MQ_QUEUES_FILE` (path) first, then inline `MQ_QUEUES` JSON.
    fn from_env() -> Result<Self, core_config::ConfigError> {
        let to_env_error = |key: &str, e: ConfigError| core_config::ConfigError::ParseError {
            key: key.to_string(),
            details: e.to_string(),
        };

        if let Ok(path) = std::env::var(QUEUES_FILE_ENV) {
            return Self::from_file(path).map_err(|e| to_env_error(QUEUES_FILE_ENV, e));
        }

        let json = env_required(QUEUES_ENV)?;
        Self::from_json_str(&json).map_err(|e| to_env_error(QUEUES_ENV, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OrdersQueue;

    impl QueueDef for OrdersQueue {
        const ID: &'static str = "orders";
        const SERVER: &'static str = "mq://broker:1414";
        const QUEUE_NAME: &'static str = "ORDERS.IN";
        const PROCESSING_TYPE: ProcessingType = ProcessingType::Subscribe;
    }

    #[test]
    fn test_settings_from_def() {
        let settings = QueueSettings::from_def::<OrdersQueue>();
        assert_eq!(settings.id, "orders");
        assert_eq!(settings.queue_name, "ORDERS.IN");
        assert_eq!(settings.processing_type, ProcessingType::Subscribe);
        assert_eq!(settings.polling_interval(), Duration::from_secs(1));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let settings = QueueSettings::new("rpc", "mq://broker", "RPC.IN")
            .with_processing_type(ProcessingType::SubscribeAndReply)
            .with_reply_queue("RPC.OUT")
            .with_lifetime(Duration::from_secs(30))
            .with_polling_interval(Duration::from_millis(250))
            .with_transacted(true);

        assert_eq!(settings.reply_queue.as_deref(), Some("RPC.OUT"));
        assert_eq!(settings.lifetime(), Some(Duration::from_secs(30)));
        assert_eq!(settings.polling_interval(), Duration::from_millis(250));
        assert!(settings.transacted);
        assert!(settings.processing_type.requires_reply());
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        let err = QueueSettings::new("orders", "", "ORDERS.IN")
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("server"));

        let err = QueueSettings::new("orders", "mq://broker", "ORDERS.IN")
            .with_polling_interval(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("polling_interval_ms"));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = QueuesConfig::new(vec![
            QueueSettings::new("orders", "mq://a", "A"),
            QueueSettings::new("orders", "mq://b", "B"),
        ]);
        assert!(matches!(result, Err(ConfigError::DuplicateQueue(id)) if id == "orders"));
    }

    #[test]
    fn test_from_json_applies_defaults() {
        let config = QueuesConfig::from_json_str(
            r#"{"queues": [
                {"id": "orders", "server": "mq://broker", "queue_name": "ORDERS.IN"},
                {"id": "rpc", "server": "mq://broker", "queue_name": "RPC.IN",
                 "processing_type": "SubscribeAndReply", "reply_queue": "RPC.OUT",
                 "credentials": {"user": "svc", "password": "pw"}}
            ]}"#,
        )
        .unwrap();

        let orders = config.get("orders").unwrap();
        assert_eq!(orders.processing_type, ProcessingType::ThreadStrategy);
        assert_eq!(orders.polling_interval_ms, 1000);
        assert_eq!(orders.connect_attempts, 3);
        assert!(orders.health_check.enabled);

        let rpc = config.get("rpc").unwrap();
        assert_eq!(rpc.processing_type, ProcessingType::SubscribeAndReply);
        assert!(!format!("{:?}", rpc.credentials).contains("pw"));
        assert_eq!(config.ids().collect::<Vec<_>>(), vec!["orders", "rpc"]);
    }

    #[test]
    fn test_from_json_malformed() {
        let err = QueuesConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::Source { .. }));
    }

    #[test]
    fn test_from_env_inline() {
        temp_env::with_vars(
            [
                (QUEUES_FILE_ENV, None),
                (
                    QUEUES_ENV,
                    Some(r#"{"queues": [{"id": "q", "server": "mq://s", "queue_name": "Q"}]}"#),
                ),
            ],
            || {
                let config = QueuesConfig::from_env().unwrap();
                assert_eq!(config.queues.len(), 1);
            },
        );
    }

    #[test]
    fn test_from_env_missing() {
        temp_env::with_vars_unset([QUEUES_FILE_ENV, QUEUES_ENV], || {
            let err = QueuesConfig::from_env().unwrap_err();
            assert!(err.to_string().contains(QUEUES_ENV));
        });
    }
}
