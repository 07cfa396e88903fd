//! Configuration management for Turnstile.
//!
//! Settings are layered: built-in defaults, then an optional YAML file, then
//! environment variables prefixed with `TURNSTILE` and separated by `__`,
//! e.g. `TURNSTILE__RATE_LIMITING__AGENT_GENERAL=120`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::{EntityLimits, LimitPolicy, RegistrationPolicy, Windows};

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Identity-based rate limits
    #[serde(default)]
    pub rate_limiting: RateLimitSettings,

    /// IP-based registration limits
    #[serde(default)]
    pub registration: RegistrationSettings,
}

/// Which window store backs the limiters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Single map behind a read/write lock
    #[default]
    Memory,
    /// Sharded concurrent map
    Sharded,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    #[serde(default)]
    pub store: StoreKind,

    /// Seconds between sweeps of stale window records
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Records whose window started longer ago than this are swept
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            store: StoreKind::default(),
            sweep_interval_secs: default_sweep_interval(),
            retention_secs: default_retention(),
        }
    }
}

impl ServerConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_retention() -> u64 {
    3600
}

/// Identity-based limits as stored in configuration.
///
/// Windows are whole seconds and the new-account threshold whole hours.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub agent_general: u64,
    pub human_general: u64,
    pub agent_search: u64,
    pub human_search: u64,
    pub agent_posts: u64,
    pub human_posts: u64,
    pub agent_answers: u64,
    pub human_answers: u64,

    pub general_window_secs: u64,
    pub search_window_secs: u64,
    pub posts_window_secs: u64,
    pub answers_window_secs: u64,

    pub new_account_hours: u64,

    /// 0 means human API keys fall back to the human limits
    pub api_key_default: u64,
    pub api_key_tiers: HashMap<String, u64>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            agent_general: 60,
            human_general: 30,
            agent_search: 30,
            human_search: 30,
            agent_posts: 5,
            human_posts: 3,
            agent_answers: 15,
            human_answers: 10,
            general_window_secs: 60,
            search_window_secs: 60,
            posts_window_secs: 3600,
            answers_window_secs: 3600,
            new_account_hours: 24,
            api_key_default: 0,
            api_key_tiers: HashMap::new(),
        }
    }
}

impl From<RateLimitSettings> for LimitPolicy {
    fn from(settings: RateLimitSettings) -> Self {
        LimitPolicy {
            agent: EntityLimits {
                general: settings.agent_general,
                search: settings.agent_search,
                posts: settings.agent_posts,
                answers: settings.agent_answers,
            },
            human: EntityLimits {
                general: settings.human_general,
                search: settings.human_search,
                posts: settings.human_posts,
                answers: settings.human_answers,
            },
            windows: Windows {
                general: Duration::from_secs(settings.general_window_secs),
                search: Duration::from_secs(settings.search_window_secs),
                posts: Duration::from_secs(settings.posts_window_secs),
                answers: Duration::from_secs(settings.answers_window_secs),
            },
            new_account_threshold: Duration::from_secs(
                settings.new_account_hours.saturating_mul(3600),
            ),
            api_key_default_limit: settings.api_key_default,
            api_key_tier_limits: settings.api_key_tiers,
        }
    }
}

/// Registration limits as stored in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationSettings {
    pub max_per_ip: u64,
    pub window_secs: u64,
    pub suspicious_threshold: u64,
    pub log_prefix: String,
}

impl Default for RegistrationSettings {
    fn default() -> Self {
        Self {
            max_per_ip: 5,
            window_secs: 3600,
            suspicious_threshold: 10,
            log_prefix: "registration".to_string(),
        }
    }
}

impl From<RegistrationSettings> for RegistrationPolicy {
    fn from(settings: RegistrationSettings) -> Self {
        RegistrationPolicy {
            max_per_ip: settings.max_per_ip,
            window: Duration::from_secs(settings.window_secs),
            suspicious_threshold: settings.suspicious_threshold,
            log_prefix: settings.log_prefix,
        }
    }
}

impl TurnstileConfig {
    /// Load configuration from defaults, an optional file, and the
    /// environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            info!(path = %path, "Loading configuration file");
            builder = builder.add_source(::config::File::with_name(path).required(true));
        }

        let layered = builder
            .add_source(
                ::config::Environment::with_prefix("TURNSTILE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        layered.try_deserialize().map_err(TurnstileError::from)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse configuration: {}", e)))
    }

    pub fn limit_policy(&self) -> LimitPolicy {
        self.rate_limiting.clone().into()
    }

    pub fn registration_policy(&self) -> RegistrationPolicy {
        self.registration.clone().into()
    }
}
