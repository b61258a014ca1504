//! Typed payload mapping.
//!
//! A [`Serializer`] turns a value into a [`Message`] and back. The
//! [`SerializerRegistry`] resolves one by Rust type so façades can be built
//! without naming the serializer at every call site.

use crate::error::{ConfigError, SerializationError};
use crate::message::{Body, Message};
use serde::{de::DeserializeOwned, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Maps a typed value to and from a message envelope.
pub trait Serializer<T>: Send + Sync {
    /// Build an envelope carrying `value`.
    fn serialize(&self, value: &T) -> Result<Message, SerializationError>;

    /// Read a value back out of an envelope.
    fn deserialize(&self, message: &Message) -> Result<T, SerializationError>;
}

/// JSON over a text body.
pub struct JsonSerializer<T> {
    _phantom: PhantomData<fn() -> T>,
}

impl<T> JsonSerializer<T> {
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T> Default for JsonSerializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonSerializer<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonSerializer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JsonSerializer<{}>", std::any::type_name::<T>())
    }
}

impl<T> Serializer<T> for JsonSerializer<T>
where
    T: Serialize + DeserializeOwned,
{
    fn serialize(&self, value: &T) -> Result<Message, SerializationError> {
        let json =
            serde_json::to_string(value).map_err(|e| SerializationError::serialize::<T>(e))?;
        Ok(Message::text(json))
    }

    fn deserialize(&self, message: &Message) -> Result<T, SerializationError> {
        serde_json::from_slice(message.body_bytes())
            .map_err(|e| SerializationError::deserialize::<T>(e))
    }
}

/// Plain `String` over a text body.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextSerializer;

impl Serializer<String> for TextSerializer {
    fn serialize(&self, value: &String) -> Result<Message, SerializationError> {
        Ok(Message::text(value.as_str()))
    }

    fn deserialize(&self, message: &Message) -> Result<String, SerializationError> {
        match &message.body {
            Body::Text(text) => Ok(text.clone()),
            Body::Binary(bytes) => String::from_utf8(bytes.clone())
                .map_err(|e| SerializationError::deserialize::<String>(e)),
        }
    }
}

/// Raw bytes over a binary body.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesSerializer;

impl Serializer<Vec<u8>> for BytesSerializer {
    fn serialize(&self, value: &Vec<u8>) -> Result<Message, SerializationError> {
        Ok(Message::binary(value.clone()))
    }

    fn deserialize(&self, message: &Message) -> Result<Vec<u8>, SerializationError> {
        Ok(message.body_bytes().to_vec())
    }
}

/// Serializers keyed by the type they handle.
///
/// Built once at startup and shared read-only afterwards.
#[derive(Clone, Default)]
pub struct SerializerRegistry {
    entries: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl SerializerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with [`TextSerializer`] and [`BytesSerializer`].
    pub fn with_defaults() -> Self {
        Self::new()
            .with_serializer::<String, _>(TextSerializer)
            .with_serializer::<Vec<u8>, _>(BytesSerializer)
    }

    /// Register `serializer` for `T`, replacing any previous one.
    pub fn register<T, S>(&mut self, serializer: S)
    where
        T: 'static,
        S: Serializer<T> + 'static,
    {
        let serializer: Arc<dyn Serializer<T>> = Arc::new(serializer);
        self.entries.insert(TypeId::of::<T>(), Arc::new(serializer));
    }

    pub fn with_serializer<T, S>(mut self, serializer: S) -> Self
    where
        T: 'static,
        S: Serializer<T> + 'static,
    {
        self.register::<T, S>(serializer);
        self
    }

    /// Register a [`JsonSerializer`] for `T`.
    pub fn with_json<T>(self) -> Self
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        self.with_serializer::<T, _>(JsonSerializer::<T>::new())
    }

    /// Serializer registered for `T`.
    pub fn resolve<T: 'static>(&self) -> Result<Arc<dyn Serializer<T>>, ConfigError> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.downcast_ref::<Arc<dyn Serializer<T>>>())
            .cloned()
            .ok_or(ConfigError::MissingSerializer(std::any::type_name::<T>()))
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for SerializerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializerRegistry")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: u32,
        sku: String,
    }

    #[test]
    fn test_json_serializer() {
        let serializer = JsonSerializer::<Order>::new();
        let order = Order {
            id: 7,
            sku: "A-1".into(),
        };

        let message = serializer.serialize(&order).unwrap();
        assert!(message.body.is_text());
        assert_eq!(message.body_text(), r#"{"id":7,"sku":"A-1"}"#);
        assert_eq!(serializer.deserialize(&message).unwrap(), order);
    }

    #[test]
    fn test_json_deserialize_failure_names_type() {
        let serializer = JsonSerializer::<Order>::new();
        let err = serializer.deserialize(&Message::text("not json")).unwrap_err();
        assert!(err.type_name.ends_with("Order"));
        assert!(err.to_string().contains("deserialize"));
    }

    #[test]
    fn test_text_serializer_rejects_invalid_utf8() {
        let err = TextSerializer
            .deserialize(&Message::binary(vec![0xff, 0xfe]))
            .unwrap_err();
        assert_eq!(err.type_name, "alloc::string::String");

        let text = TextSerializer.deserialize(&Message::binary(b"ok".to_vec())).unwrap();
        assert_eq!(text, "ok");
    }

    #[test]
    fn test_bytes_serializer_uses_binary_body() {
        let message = BytesSerializer.serialize(&vec![1, 2, 3]).unwrap();
        assert!(!message.body.is_text());
        assert_eq!(BytesSerializer.deserialize(&message).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_registry_resolves_by_type() {
        let registry = SerializerRegistry::with_defaults().with_json::<Order>();
        assert_eq!(registry.len(), 3);
        assert!(registry.contains::<Order>());

        let serializer = registry.resolve::<Order>().unwrap();
        let message = serializer
            .serialize(&Order {
                id: 1,
                sku: "B".into(),
            })
            .unwrap();
        assert!(message.body_text().contains("\"sku\":\"B\""));

        let text = registry.resolve::<String>().unwrap();
        assert_eq!(text.deserialize(&Message::text("hi")).unwrap(), "hi");
    }

    #[test]
    fn test_registry_missing_type() {
        let registry = SerializerRegistry::new();
        let err = registry.resolve::<Order>().err().unwrap();
        assert!(matches!(err, ConfigError::MissingSerializer(name) if name.ends_with("Order")));
    }
}
