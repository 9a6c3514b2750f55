// tests/realtime/fixtures/recording_notifier.rs

use docflow_guard::realtime::Notifier;
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Success(String),
    Error(String, Option<String>),
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn notifications(&self) -> Vec<Notification> {
        self.seen.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn success(&self, message: &str) {
        self.seen.lock().push(Notification::Success(message.to_string()));
    }

    fn error(&self, message: &str, details: Option<&str>) {
        self.seen
            .lock()
            .push(Notification::Error(message.to_string(), details.map(str::to_string)));
    }
}
