//! User-facing connection notifications.

use tracing::{error, info};

/// Shown when a connection opens.
pub const CONNECTED_MESSAGE: &str = "Connected to real-time updates";
/// Shown when a connection attempt fails.
pub const ERROR_MESSAGE: &str = "Connection error";
/// Detail line for [`ERROR_MESSAGE`].
pub const ERROR_DETAILS: &str = "Failed to connect to real-time updates";

/// Sink for toast-style notifications about the connection.
pub trait Notifier: Send + Sync {
    fn success(&self, message: &str);
    fn error(&self, message: &str, details: Option<&str>);
}

/// Notifier that writes to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn success(&self, message: &str) {
        info!(notification = "success", "{}", message);
    }

    fn error(&self, message: &str, details: Option<&str>) {
        error!(notification = "error", details = details.unwrap_or_default(), "{}", message);
    }
}
