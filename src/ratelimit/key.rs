//! Counting key generation and parsing.
//!
//! The string forms are shared with external inspection tooling:
//! `agent:{id}:{operation}`, `human:{id}:{operation}`,
//! `apikey:{key_id}:{operation}` and `registration:ip:{ip}`.

use std::fmt;

use super::policy::{EntityClass, Identity, Operation};

/// A key that uniquely identifies one counter in the window store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateLimitKey {
    /// Per-identity counting
    Entity {
        class: EntityClass,
        id: String,
        operation: Operation,
    },
    /// Per-API-key counting, shared by every identity using the key
    ApiKey { key_id: String, operation: Operation },
    /// Registration attempts from one client IP
    RegistrationIp(String),
}

impl RateLimitKey {
    /// Build the key for an identity performing `operation`.
    ///
    /// An API key id supersedes the identity.
    pub fn for_identity(identity: &Identity, operation: Operation) -> Self {
        match identity.api_key_id() {
            Some(key_id) => RateLimitKey::ApiKey {
                key_id: key_id.to_string(),
                operation,
            },
            None => RateLimitKey::Entity {
                class: identity.class,
                id: identity.id.clone(),
                operation,
            },
        }
    }

    pub fn registration(ip: &str) -> Self {
        RateLimitKey::RegistrationIp(ip.to_string())
    }

    /// Parse a key from its string form.
    ///
    /// Identifiers may themselves contain `:`, so the operation is taken
    /// from the right and the namespace from the left.
    pub fn parse(key: &str) -> Option<Self> {
        if let Some(ip) = key.strip_prefix("registration:ip:") {
            return (!ip.is_empty()).then(|| RateLimitKey::RegistrationIp(ip.to_string()));
        }

        let (namespace, rest) = key.split_once(':')?;
        let (id, operation) = rest.rsplit_once(':')?;
        if id.is_empty() {
            return None;
        }
        let operation = parse_operation(operation)?;

        match namespace {
            "agent" => Some(RateLimitKey::Entity {
                class: EntityClass::Agent,
                id: id.to_string(),
                operation,
            }),
            "human" => Some(RateLimitKey::Entity {
                class: EntityClass::Human,
                id: id.to_string(),
                operation,
            }),
            "apikey" => Some(RateLimitKey::ApiKey {
                key_id: id.to_string(),
                operation,
            }),
            _ => None,
        }
    }
}

fn parse_operation(s: &str) -> Option<Operation> {
    match s {
        "general" => Some(Operation::General),
        "search" => Some(Operation::Search),
        "posts" => Some(Operation::Posts),
        "answers" => Some(Operation::Answers),
        _ => None,
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitKey::Entity {
                class,
                id,
                operation,
            } => write!(f, "{}:{}:{}", class, id, operation),
            RateLimitKey::ApiKey { key_id, operation } => {
                write!(f, "apikey:{}:{}", key_id, operation)
            }
            RateLimitKey::RegistrationIp(ip) => write!(f, "registration:ip:{}", ip),
        }
    }
}
