//! User-visible notices (toasts)
//!
//! The engine produces at most one notice per failed action. How a notice is
//! shown is up to the [`Notifier`] implementation.

use engage_common::{Action, EntityRef};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub entity: Option<EntityRef>,
    pub action: Option<Action>,
}

impl Notice {
    pub fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            entity: None,
            action: None,
        }
    }

    /// Attach the entity and action the notice is about
    pub fn about(mut self, entity: EntityRef, action: Action) -> Self {
        self.entity = Some(entity);
        self.action = Some(action);
        self
    }
}

/// Notification presenter
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Presents notices through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        let entity = notice.entity.map(|e| e.to_string()).unwrap_or_default();
        let action = notice.action.map(|a| a.as_str()).unwrap_or_default();
        match notice.level {
            NoticeLevel::Info => tracing::info!(entity = %entity, action = %action, "{}", notice.message),
            NoticeLevel::Warning => tracing::warn!(entity = %entity, action = %action, "{}", notice.message),
            NoticeLevel::Error => tracing::error!(entity = %entity, action = %action, "{}", notice.message),
        }
    }
}

/// Keeps every notice in memory, for headless front ends and tests
#[derive(Debug, Default)]
pub struct CollectingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl CollectingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove and return all collected notices
    pub fn take(&self) -> Vec<Notice> {
        std::mem::take(&mut *self.notices.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Notifier for CollectingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notice);
    }
}
