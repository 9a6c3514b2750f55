//! Rate limit key generation.

/// A key that identifies one rate limit window.
///
/// The key is an optional scope label (`tenant`, `user`, `ip`, ...) plus the
/// identifier being limited.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// Optional scope label
    pub scope: Option<String>,
    /// The tenant id, user id, IP address, ...
    pub identifier: String,
}

impl RateLimitKey {
    /// Create a scoped key.
    pub fn new(scope: &str, identifier: &str) -> Self {
        Self {
            scope: Some(scope.to_string()),
            identifier: identifier.to_string(),
        }
    }

    /// Create a key with no scope label.
    pub fn unscoped(identifier: &str) -> Self {
        Self {
            scope: None,
            identifier: identifier.to_string(),
        }
    }

    /// Create a key from an optional scope.
    pub fn with_scope(scope: Option<&str>, identifier: &str) -> Self {
        match scope {
            Some(scope) => Self::new(scope, identifier),
            None => Self::unscoped(identifier),
        }
    }

    /// Render the key the way it is stored in the window table.
    pub fn to_string_key(&self) -> String {
        match &self.scope {
            Some(scope) => format!("{}:{}", scope, self.identifier),
            None => self.identifier.clone(),
        }
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}
