//! Named rate limit policies.
//!
//! A policy pairs a limit with a window length and an optional scope label
//! used when building keys. The three presets used by the web routes
//! (`tenant`, `user`, `ip`) are always present; configuration can override
//! them or add new ones.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use super::key::RateLimitKey;
use super::window::MAX_WINDOW_MS;
use crate::error::{GuardError, Result};

/// Name of the per-tenant preset (60 requests per minute).
pub const TENANT: &str = "tenant";
/// Name of the per-user preset (10 requests per second).
pub const USER: &str = "user";
/// Name of the per-IP preset (100 requests per minute).
pub const IP: &str = "ip";

/// A single rate limit rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PolicySpec")]
pub struct RateLimitPolicy {
    /// Scope label prefixed to identifiers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Maximum requests per window
    pub limit: u64,
    /// Window length in milliseconds
    pub window_ms: u64,
}

/// Time unit shorthand accepted in policy files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Length of one unit in milliseconds.
    pub fn as_millis(&self) -> u64 {
        match self {
            TimeUnit::Second => 1_000,
            TimeUnit::Minute => 60_000,
            TimeUnit::Hour => 3_600_000,
            TimeUnit::Day => 86_400_000,
        }
    }
}

/// On-disk form of a policy: either `window_ms` or `unit` must be given.
#[derive(Debug, Deserialize)]
struct PolicySpec {
    #[serde(default)]
    scope: Option<String>,
    limit: u64,
    #[serde(default)]
    window_ms: Option<u64>,
    #[serde(default)]
    unit: Option<TimeUnit>,
}

impl TryFrom<PolicySpec> for RateLimitPolicy {
    type Error = String;

    fn try_from(spec: PolicySpec) -> std::result::Result<Self, Self::Error> {
        let window_ms = match (spec.window_ms, spec.unit) {
            (Some(ms), None) => ms,
            (None, Some(unit)) => unit.as_millis(),
            (Some(_), Some(_)) => return Err("specify either window_ms or unit, not both".into()),
            (None, None) => return Err("one of window_ms or unit is required".into()),
        };

        let policy = RateLimitPolicy {
            scope: spec.scope,
            limit: spec.limit,
            window_ms,
        };
        policy.validate().map_err(|e| e.to_string())?;
        Ok(policy)
    }
}

impl RateLimitPolicy {
    /// Create a policy, rejecting a zero limit or an out-of-range window.
    pub fn new(scope: Option<&str>, limit: u64, window_ms: u64) -> Result<Self> {
        let policy = Self {
            scope: scope.map(str::to_string),
            limit,
            window_ms,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Check that limit and window are positive and the window is at most
    /// [`MAX_WINDOW_MS`].
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(GuardError::InvalidArgument("limit must be positive".into()));
        }
        if self.window_ms == 0 {
            return Err(GuardError::InvalidArgument("window must be positive".into()));
        }
        if self.window_ms > MAX_WINDOW_MS {
            return Err(GuardError::InvalidArgument(format!(
                "window must not exceed {} ms",
                MAX_WINDOW_MS
            )));
        }
        Ok(())
    }

    /// Key for `identifier` under this policy's scope.
    pub fn key_for(&self, identifier: &str) -> RateLimitKey {
        RateLimitKey::with_scope(self.scope.as_deref(), identifier)
    }

    /// 60 requests per minute per tenant.
    pub fn tenant() -> Self {
        Self::preset(TENANT, 60, TimeUnit::Minute)
    }

    /// 10 requests per second per user.
    pub fn user() -> Self {
        Self::preset(USER, 10, TimeUnit::Second)
    }

    /// 100 requests per minute per IP.
    pub fn ip() -> Self {
        Self::preset(IP, 100, TimeUnit::Minute)
    }

    fn preset(scope: &str, limit: u64, unit: TimeUnit) -> Self {
        Self {
            scope: Some(scope.to_string()),
            limit,
            window_ms: unit.as_millis(),
        }
    }
}

/// A set of named policies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PolicySet {
    policies: BTreeMap<String, RateLimitPolicy>,
}

impl Default for PolicySet {
    fn default() -> Self {
        let mut policies = BTreeMap::new();
        policies.insert(TENANT.to_string(), RateLimitPolicy::tenant());
        policies.insert(USER.to_string(), RateLimitPolicy::user());
        policies.insert(IP.to_string(), RateLimitPolicy::ip());
        Self { policies }
    }
}

impl PolicySet {
    /// The presets, with `overrides` layered on top.
    pub fn with_overrides(overrides: BTreeMap<String, RateLimitPolicy>) -> Self {
        let mut set = Self::default();
        set.policies.extend(overrides);
        set
    }

    /// Load policies from a YAML file of `name: {limit, window_ms|unit, scope}` entries.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit policies");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load policies from a YAML string, merged over the presets.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let overrides: BTreeMap<String, RateLimitPolicy> = serde_yaml::from_str(yaml)
            .map_err(|e| GuardError::Config(format!("Failed to parse rate limit policies: {}", e)))?;
        Ok(Self::with_overrides(overrides))
    }

    /// Look up a policy by name.
    pub fn get(&self, name: &str) -> Option<&RateLimitPolicy> {
        self.policies.get(name)
    }

    /// Add or replace a policy.
    pub fn insert(&mut self, name: &str, policy: RateLimitPolicy) {
        self.policies.insert(name.to_string(), policy);
    }

    /// Iterate policies in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RateLimitPolicy)> {
        self.policies.iter().map(|(name, policy)| (name.as_str(), policy))
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
