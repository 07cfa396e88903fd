//! Limit policy resolution.
//!
//! Maps a caller identity and an operation class to the counting key and the
//! `(limit, window)` pair that applies to it.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::key::RateLimitKey;
use super::store::elapsed_since;

/// Paths whose `POST` creates a new post.
const POST_CREATION_PATHS: [&str; 4] = ["/v1/posts", "/v1/problems", "/v1/questions", "/v1/ideas"];

/// Class of operation a request performs, each with its own quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    General,
    Search,
    Posts,
    Answers,
}

impl Operation {
    /// Classify a request by method and path. The first matching rule wins.
    pub fn classify(method: &str, path: &str) -> Self {
        if path.starts_with("/v1/search") {
            return Operation::Search;
        }

        if method.eq_ignore_ascii_case("POST") {
            if POST_CREATION_PATHS.contains(&path) {
                return Operation::Posts;
            }
            if path.contains("/answers") {
                return Operation::Answers;
            }
        }

        Operation::General
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::General => "general",
            Operation::Search => "search",
            Operation::Posts => "posts",
            Operation::Answers => "answers",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityClass {
    Agent,
    Human,
}

impl EntityClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityClass::Agent => "agent",
            EntityClass::Human => "human",
        }
    }
}

impl fmt::Display for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// API key attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKey {
    pub id: String,
    pub tier: Option<String>,
}

/// Caller identity derived for a single request. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub class: EntityClass,
    /// Stable agent or user identifier
    pub id: String,
    /// Account creation time, if known
    pub created_at: Option<DateTime<Utc>>,
    pub api_key: Option<ApiKey>,
}

impl Identity {
    pub fn agent(id: impl Into<String>) -> Self {
        Self {
            class: EntityClass::Agent,
            id: id.into(),
            created_at: None,
            api_key: None,
        }
    }

    pub fn human(id: impl Into<String>) -> Self {
        Self {
            class: EntityClass::Human,
            id: id.into(),
            created_at: None,
            api_key: None,
        }
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn with_api_key(mut self, id: impl Into<String>, tier: Option<&str>) -> Self {
        self.api_key = Some(ApiKey {
            id: id.into(),
            tier: tier.map(str::to_string),
        });
        self
    }

    pub fn is_agent(&self) -> bool {
        self.class == EntityClass::Agent
    }

    /// API key id, ignoring empty ids.
    pub(crate) fn api_key_id(&self) -> Option<&str> {
        self.api_key
            .as_ref()
            .map(|k| k.id.as_str())
            .filter(|id| !id.is_empty())
    }

    fn api_key_tier(&self) -> Option<&str> {
        self.api_key
            .as_ref()
            .and_then(|k| k.tier.as_deref())
            .filter(|tier| !tier.is_empty())
    }

    /// Counting key for `operation`.
    pub fn rate_limit_key(&self, operation: Operation) -> RateLimitKey {
        RateLimitKey::for_identity(self, operation)
    }
}

/// Per-operation ceilings for one entity class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLimits {
    pub general: u64,
    pub search: u64,
    pub posts: u64,
    pub answers: u64,
}

impl EntityLimits {
    pub fn for_operation(&self, operation: Operation) -> u64 {
        match operation {
            Operation::General => self.general,
            Operation::Search => self.search,
            Operation::Posts => self.posts,
            Operation::Answers => self.answers,
        }
    }
}

/// Window lengths per operation class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Windows {
    pub general: Duration,
    pub search: Duration,
    pub posts: Duration,
    pub answers: Duration,
}

impl Windows {
    pub fn for_operation(&self, operation: Operation) -> Duration {
        match operation {
            Operation::General => self.general,
            Operation::Search => self.search,
            Operation::Posts => self.posts,
            Operation::Answers => self.answers,
        }
    }
}

/// Immutable limit configuration shared by all requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitPolicy {
    pub agent: EntityLimits,
    pub human: EntityLimits,
    pub windows: Windows,
    /// Accounts younger than this get half their limit
    pub new_account_threshold: Duration,
    /// Limit for human API keys without a tier override; 0 disables it
    pub api_key_default_limit: u64,
    /// Tier name to limit, e.g. `"premium" => 180`
    pub api_key_tier_limits: HashMap<String, u64>,
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self {
            agent: EntityLimits {
                general: 60,
                search: 30,
                posts: 5,
                answers: 15,
            },
            human: EntityLimits {
                general: 30,
                search: 30,
                posts: 3,
                answers: 10,
            },
            windows: Windows {
                general: Duration::from_secs(60),
                search: Duration::from_secs(60),
                posts: Duration::from_secs(3600),
                answers: Duration::from_secs(3600),
            },
            new_account_threshold: Duration::from_secs(24 * 3600),
            api_key_default_limit: 0,
            api_key_tier_limits: HashMap::new(),
        }
    }
}

impl LimitPolicy {
    /// Resolve the `(limit, window)` pair for `identity` performing
    /// `operation`, as seen at `now`.
    pub fn resolve(
        &self,
        identity: &Identity,
        operation: Operation,
        now: DateTime<Utc>,
    ) -> (u64, Duration) {
        let (limit, window) = self.base_limit(identity, operation);
        (self.apply_new_account_discount(limit, identity, now), window)
    }

    fn base_limit(&self, identity: &Identity, operation: Operation) -> (u64, Duration) {
        if identity.is_agent() {
            return (
                self.agent.for_operation(operation),
                self.windows.for_operation(operation),
            );
        }

        if identity.api_key_id().is_some() {
            if let Some(limit) = identity
                .api_key_tier()
                .and_then(|tier| self.api_key_tier_limits.get(tier))
            {
                return (*limit, self.windows.general);
            }

            if self.api_key_default_limit > 0 {
                return (self.api_key_default_limit, self.windows.general);
            }
        }

        (
            self.human.for_operation(operation),
            self.windows.for_operation(operation),
        )
    }

    /// Halve the limit for young accounts. Integer division rounds down.
    fn apply_new_account_discount(
        &self,
        limit: u64,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> u64 {
        match identity.created_at {
            Some(created_at) if elapsed_since(created_at, now) < self.new_account_threshold => {
                limit / 2
            }
            _ => limit,
        }
    }
}
