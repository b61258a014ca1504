//! Per-message call context.
//!
//! The context is built once per inbound message from its properties, passed
//! explicitly down the dispatch chain, and also exposed through a task-local
//! scope so code that only has the message can still reach it. The scope
//! ends with the dispatch future, so nothing leaks between messages or
//! between reactors running on different tasks.

use crate::message::{Message, Properties, PropertyValue};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};
use uuid::Uuid;

tokio::task_local! {
    static CURRENT_CONTEXT: CallContext;
}

/// Property keys used to propagate the call context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Display, AsRefStr, EnumString, EnumIter)]
pub enum ContextHeader {
    RequestId,
    UserId,
    UserDomain,
    CallerIp,
    Authorization,
}

impl ContextHeader {
    /// All header keys.
    pub fn all() -> impl Iterator<Item = Self> {
        Self::iter()
    }
}

/// Identity and tracing data of the message being processed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    pub request_id: String,
    pub user_id: String,
    pub user_domain: Option<String>,
    pub caller_ip: Option<String>,
    pub authorization: Option<String>,
}

impl CallContext {
    /// Fresh context for the current process: new request id, process identity.
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            user_id: process_identity(),
            user_domain: None,
            caller_ip: None,
            authorization: None,
        }
    }

    /// Build the context from message properties.
    ///
    /// A missing request id gets a freshly generated one; a missing user id
    /// falls back to the identity of the current process.
    pub fn from_properties(properties: &Properties) -> Self {
        let get = |header: ContextHeader| {
            properties
                .get(header.as_ref())
                .map(|v| v.to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            request_id: get(ContextHeader::RequestId).unwrap_or_else(|| Uuid::new_v4().to_string()),
            user_id: get(ContextHeader::UserId).unwrap_or_else(process_identity),
            user_domain: get(ContextHeader::UserDomain),
            caller_ip: get(ContextHeader::CallerIp),
            authorization: get(ContextHeader::Authorization),
        }
    }

    /// Build the context from an inbound message.
    pub fn from_message(message: &Message) -> Self {
        Self::from_properties(&message.properties)
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>, domain: Option<String>) -> Self {
        self.user_id = user_id.into();
        self.user_domain = domain;
        self
    }

    pub fn with_caller_ip(mut self, caller_ip: impl Into<String>) -> Self {
        self.caller_ip = Some(caller_ip.into());
        self
    }

    pub fn with_authorization(mut self, token: impl Into<String>) -> Self {
        self.authorization = Some(token.into());
        self
    }

    /// Write the context headers into a property bag.
    pub fn apply_to(&self, properties: &mut Properties) {
        let mut put = |header: ContextHeader, value: &str| {
            properties.insert(header.to_string(), PropertyValue::from(value));
        };

        put(ContextHeader::RequestId, self.request_id.as_str());
        put(ContextHeader::UserId, self.user_id.as_str());
        if let Some(domain) = &self.user_domain {
            put(ContextHeader::UserDomain, domain.as_str());
        }
        if let Some(ip) = &self.caller_ip {
            put(ContextHeader::CallerIp, ip.as_str());
        }
        if let Some(token) = &self.authorization {
            put(ContextHeader::Authorization, token.as_str());
        }
    }

    /// Run `fut` with this context installed as the current one.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        CURRENT_CONTEXT.scope(self, fut).await
    }

    /// Context of the message currently being dispatched on this task.
    pub fn current() -> Option<CallContext> {
        CURRENT_CONTEXT.try_with(|ctx| ctx.clone()).ok()
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("request_id", &self.request_id)
            .field("user_id", &self.user_id)
            .field("user_domain", &self.user_domain)
            .field("caller_ip", &self.caller_ip)
            .field("authorization", &self.authorization.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Identity of the running process, used when a message carries no user.
pub fn process_identity() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "system".to_string())
}
