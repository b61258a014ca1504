//! Message envelope exchanged with adapters.
//!
//! A [`Message`] carries exactly one body shape (text or binary), routing
//! and identity metadata, and a string-keyed property bag. Properties are
//! edited while the message is owned by the caller; once it is handed to an
//! adapter (`send` takes it by value) or delivered to processors (by shared
//! reference) it is read-mostly.

use crate::context::ContextHeader;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Maximum number of characters rendered by [`Message::log_body`].
pub const LOG_BODY_LIMIT: usize = 256;

/// Message payload. Exactly one shape per message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Body {
    /// UTF-8 text payload
    Text(String),
    /// Raw byte payload
    Binary(Vec<u8>),
}

impl Body {
    pub fn len(&self) -> usize {
        match self {
            Body::Text(text) => text.len(),
            Body::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Body::Text(_))
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::Text(String::new())
    }
}

/// Scalar value stored in the property bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl PropertyValue {
    /// String view of the value, if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(v) => write!(f, "{}", v),
            PropertyValue::Int(v) => write!(f, "{}", v),
            PropertyValue::Float(v) => write!(f, "{}", v),
            PropertyValue::String(v) => f.write_str(v),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

/// Unordered property bag.
pub type Properties = HashMap<String, PropertyValue>;

/// Message envelope.
///
/// `Debug` output hides the value of the `Authorization` property.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Assigned by the adapter on send; empty before that
    pub message_id: String,

    /// Caller-supplied or generated token used to match replies
    pub correlation_id: Option<String>,

    /// Queue the answering side should reply to
    pub reply_to: Option<String>,

    /// Stamped by the adapter on send
    pub sent_at: Option<DateTime<Utc>>,

    /// Stamped by the adapter on receive
    pub received_at: Option<DateTime<Utc>>,

    /// How long the broker should keep the message
    pub time_to_live: Option<Duration>,

    /// Payload
    pub body: Body,

    /// User metadata and propagated call-context headers
    pub properties: Properties,
}

impl Message {
    /// Create a message with a text body.
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: Body::Text(body.into()),
            ..Default::default()
        }
    }

    /// Create a message with a binary body.
    pub fn binary(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: Body::Binary(body.into()),
            ..Default::default()
        }
    }

    /// Set the correlation id.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Set the reply-to queue.
    pub fn with_reply_to(mut self, queue: impl Into<String>) -> Self {
        self.reply_to = Some(queue.into());
        self
    }

    /// Set the time-to-live.
    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    /// Set a property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Get a property.
    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    /// Get a string property.
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(PropertyValue::as_str)
    }

    /// Body as text. Binary bodies are decoded lossily; empty bodies are "".
    pub fn body_text(&self) -> Cow<'_, str> {
        match &self.body {
            Body::Text(text) => Cow::Borrowed(text.as_str()),
            Body::Binary(bytes) => String::from_utf8_lossy(bytes),
        }
    }

    /// Body as bytes. Empty bodies are a zero-length slice.
    pub fn body_bytes(&self) -> &[u8] {
        match &self.body {
            Body::Text(text) => text.as_bytes(),
            Body::Binary(bytes) => bytes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Body rendered for logs: `<empty>` for zero-length bodies,
    /// truncated after [`LOG_BODY_LIMIT`] characters.
    pub fn log_body(&self) -> String {
        if self.is_empty() {
            return "<empty>".to_string();
        }

        let text = match &self.body {
            Body::Text(text) => Cow::Borrowed(text.as_str()),
            Body::Binary(bytes) => Cow::Owned(format!("<{} bytes>", bytes.len())),
        };

        if text.chars().count() > LOG_BODY_LIMIT {
            let truncated: String = text.chars().take(LOG_BODY_LIMIT).collect();
            format!("{}...", truncated)
        } else {
            text.into_owned()
        }
    }

    /// Whether the time-to-live has elapsed since the message was sent.
    ///
    /// A TTL that runs past the representable date range never expires.
    pub fn is_expired(&self) -> bool {
        match (self.sent_at, self.time_to_live) {
            (Some(sent_at), Some(ttl)) => chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|ttl| sent_at.checked_add_signed(ttl))
                .is_some_and(|expires_at| expires_at < Utc::now()),
            _ => false,
        }
    }

    /// Stamp identity on send. Adapters call this.
    pub fn mark_sent(&mut self, message_id: impl Into<String>) {
        self.message_id = message_id.into();
        self.sent_at = Some(Utc::now());
    }

    /// Stamp receive time. Adapters call this.
    pub fn mark_received(&mut self) {
        self.received_at = Some(Utc::now());
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("message_id", &self.message_id)
            .field("correlation_id", &self.correlation_id)
            .field("reply_to", &self.reply_to)
            .field("sent_at", &self.sent_at)
            .field("received_at", &self.received_at)
            .field("time_to_live", &self.time_to_live)
            .field("body", &self.body)
            .field("properties", &RedactedProperties(&self.properties))
            .finish()
    }
}

struct RedactedProperties<'a>(&'a Properties);

impl fmt::Debug for RedactedProperties<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secret = ContextHeader::Authorization.as_ref();
        let mut map = f.debug_map();
        for (key, value) in self.0 {
            if key.eq_ignore_ascii_case(secret) {
                map.entry(key, &"<redacted>");
            } else {
                map.entry(key, value);
            }
        }
        map.finish()
    }
}
