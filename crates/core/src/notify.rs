use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::staff::StaffId;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub link: Option<String>,
}

impl Notification {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self { title: title.into(), message: message.into(), link: None }
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }
}

/// Fire-and-forget from the engine's perspective: delivery failures are
/// logged by the caller and never block a transition.
pub trait Notifier: Send + Sync {
    fn notify(&self, user: &StaffId, notification: Notification) -> Result<(), NotifyError>;
}

#[derive(Clone, Default)]
pub struct InMemoryNotifier {
    sent: Arc<Mutex<Vec<(StaffId, Notification)>>>,
}

impl InMemoryNotifier {
    pub fn sent(&self) -> Vec<(StaffId, Notification)> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Notifier for InMemoryNotifier {
    fn notify(&self, user: &StaffId, notification: Notification) -> Result<(), NotifyError> {
        match self.sent.lock() {
            Ok(mut sent) => sent.push((user.clone(), notification)),
            Err(poisoned) => poisoned.into_inner().push((user.clone(), notification)),
        }
        Ok(())
    }
}

/// Notifier that only logs; useful for tooling where no transport exists.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingNotifier;

impl Notifier for LoggingNotifier {
    fn notify(&self, user: &StaffId, notification: Notification) -> Result<(), NotifyError> {
        tracing::info!(
            event_name = "notify.delivered",
            user = %user,
            title = %notification.title,
            "notification"
        );
        Ok(())
    }
}
