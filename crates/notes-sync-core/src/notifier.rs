//! Notification sink for changes made on other devices.
//!
//! Delivery is fire-and-forget: the session never waits on or retries an `emit`.

use crate::record::EntityKind;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Presentation-layer hook for toast/system notifications.
pub trait Notifier: Send + Sync {
    fn emit(&self, kind: EntityKind, title: &str, message: &str);
}

impl<T: Notifier + ?Sized> Notifier for Arc<T> {
    fn emit(&self, kind: EntityKind, title: &str, message: &str) {
        (**self).emit(kind, title, message)
    }
}

/// Title for a notification about a record of `kind`.
pub fn notification_title(kind: EntityKind, is_new: bool) -> String {
    match (kind, is_new) {
        (EntityKind::Note, true) => "New note".to_string(),
        (EntityKind::Note, false) => "Note updated".to_string(),
        (EntityKind::TodoList, true) => "New to-do list".to_string(),
        (EntityKind::TodoList, false) => "To-do list updated".to_string(),
    }
}

/// Writes notifications to the log. Used by headless hosts.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn emit(&self, kind: EntityKind, title: &str, message: &str) {
        info!("[{}] {}: {}", kind, title, message);
    }
}

/// A notification captured by `RecordingNotifier`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: EntityKind,
    pub title: String,
    pub message: String,
}

/// Keeps every emitted notification in memory, for testing.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    emitted: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.emitted.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self) -> usize {
        self.emitted.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Notifier for RecordingNotifier {
    fn emit(&self, kind: EntityKind, title: &str, message: &str) {
        self.emitted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Notification {
                kind,
                title: title.to_string(),
                message: message.to_string(),
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_notifier_keeps_order() {
        let notifier = Arc::new(RecordingNotifier::new());
        let shared: Arc<dyn Notifier> = notifier.clone();

        shared.emit(EntityKind::Note, "New note", "Groceries");
        shared.emit(EntityKind::TodoList, "To-do list updated", "Chores");

        let seen = notifier.notifications();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].message, "Groceries");
        assert_eq!(seen[1].kind, EntityKind::TodoList);
    }

    #[test]
    fn test_titles_distinguish_new_and_updated() {
        assert_eq!(notification_title(EntityKind::Note, true), "New note");
        assert_eq!(notification_title(EntityKind::TodoList, false), "To-do list updated");
    }
}
