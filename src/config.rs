//! Configuration management for docflow-guard.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::ratelimit::{spawn_sweeper, PolicySet, RateLimitBackend, RateLimitPolicy};
use crate::realtime::{RealtimeConnection, RealtimeConnectionBuilder, ReconnectPolicy};

/// Prefix for environment overrides, e.g. `DOCFLOW_GUARD__REALTIME__URL`.
pub const ENV_PREFIX: &str = "DOCFLOW_GUARD";

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Realtime connection configuration
    #[serde(default)]
    pub realtime: RealtimeConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON log lines
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Path to a YAML file of named policies
    #[serde(default)]
    pub policies_path: Option<String>,

    /// How often expired windows are swept, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Inline policies, applied after `policies_path`
    #[serde(default)]
    pub policies: BTreeMap<String, RateLimitPolicy>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            policies_path: None,
            sweep_interval_secs: default_sweep_interval(),
            policies: BTreeMap::new(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    300
}

impl RateLimitingConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Presets, then the policy file, then inline policies.
    pub fn policy_set(&self) -> Result<PolicySet> {
        let mut set = match &self.policies_path {
            Some(path) => PolicySet::from_file(path)?,
            None => PolicySet::default(),
        };
        for (name, policy) in &self.policies {
            set.insert(name, policy.clone());
        }
        Ok(set)
    }

    /// Start the expired-window sweeper on the configured interval.
    pub fn spawn_sweeper<B>(&self, backend: Arc<B>, shutdown: watch::Receiver<()>) -> JoinHandle<()>
    where
        B: RateLimitBackend + ?Sized + 'static,
    {
        spawn_sweeper(backend, self.sweep_interval(), shutdown)
    }
}

/// Realtime connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// WebSocket endpoint (`ws://` or `wss://`)
    #[serde(default)]
    pub url: Option<String>,

    /// Connect as soon as the connection is created
    #[serde(default = "default_true")]
    pub auto_connect: bool,

    /// Reconnect behavior
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: None,
            auto_connect: true,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl RealtimeConfig {
    /// Connection builder for `url` carrying the configured auto-connect
    /// flag and reconnect policy.
    pub fn connection_builder(&self, url: impl Into<String>) -> RealtimeConnectionBuilder {
        RealtimeConnection::builder(url)
            .auto_connect(self.auto_connect)
            .reconnect_policy(self.reconnect.policy())
    }
}

fn default_true() -> bool {
    true
}

/// Reconnect delay strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectStrategy {
    #[default]
    Fixed,
    Exponential,
}

/// Reconnect configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default)]
    pub strategy: ReconnectStrategy,

    /// Fixed delay, or the first delay for exponential backoff
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Upper bound for exponential backoff
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default)]
    pub jitter: bool,

    /// Stop retrying after this many attempts (exponential only)
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            strategy: ReconnectStrategy::Fixed,
            interval_ms: default_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            multiplier: default_multiplier(),
            jitter: false,
            max_attempts: None,
        }
    }
}

fn default_interval_ms() -> u64 {
    5000
}

fn default_max_interval_ms() -> u64 {
    10000
}

fn default_multiplier() -> f64 {
    2.0
}

impl ReconnectConfig {
    /// Build the reconnect policy this configuration describes.
    pub fn policy(&self) -> ReconnectPolicy {
        let interval = Duration::from_millis(self.interval_ms);
        match self.strategy {
            ReconnectStrategy::Fixed => ReconnectPolicy::fixed(interval),
            ReconnectStrategy::Exponential => {
                let max = Duration::from_millis(self.max_interval_ms.max(self.interval_ms));
                let policy = ReconnectPolicy::exponential(interval, max)
                    .with_multiplier(self.multiplier)
                    .with_jitter(self.jitter);
                match self.max_attempts {
                    Some(attempts) => policy.with_max_attempts(attempts),
                    None => policy,
                }
            }
        }
    }
}

impl GuardConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Layer an optional YAML file and `DOCFLOW_GUARD__*` environment
    /// variables over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Yaml));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
