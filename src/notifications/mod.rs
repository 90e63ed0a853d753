use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::{ErrorCategory, ServiceError};

/// Severity of a transient user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Success,
    Error,
}

/// A transient message shown to the user (toast).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub level: NotificationLevel,
    pub message: String,
    pub category: Option<ErrorCategory>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            level,
            message: message.into(),
            category: None,
            created_at: Utc::now(),
        }
    }
}

/// Fan-out channel for user-facing notifications.
///
/// Sending never fails: with no subscriber attached the notification is only
/// logged.
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    pub fn send(&self, notification: Notification) {
        // No receivers is fine; the log line below still records it.
        let _ = self.sender.send(notification);
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        info!(%message, "notification");
        self.send(Notification::new(NotificationLevel::Info, message));
    }

    pub fn success(&self, message: impl Into<String>) {
        let message = message.into();
        info!(%message, "notification");
        self.send(Notification::new(NotificationLevel::Success, message));
    }

    /// Publishes an error with `context` prefixed to its user-facing message.
    pub fn error(&self, context: &str, error: &ServiceError) {
        warn!(error = %error, context, "operation failed");
        let mut notification = Notification::new(
            NotificationLevel::Error,
            format!("{}: {}", context, error.response_message()),
        );
        notification.category = Some(error.category());
        self.send(notification);
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(64)
    }
}
