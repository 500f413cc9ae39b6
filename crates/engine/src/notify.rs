//! User-facing notifications.
//!
//! The engine reports outcomes (stage saved, validation rejected, fetch
//! failed) through a [`Notifier`]. Presentation is up to the host; the default
//! writes to the tracing log.

use std::{fmt, sync::Mutex};

use tracing::{error, info};

pub trait Notifier: Send + Sync + fmt::Debug {
    fn success(&self, message: &str);
    fn error(&self, message: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn success(&self, message: &str) {
        info!(target: "formflow::notify", "{message}");
    }

    fn error(&self, message: &str) {
        error!(target: "formflow::notify", "{message}");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Success(String),
    Error(String),
}

/// Keeps every notice in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().expect("notices lock").clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.notices()
            .into_iter()
            .filter_map(|notice| match notice {
                Notice::Error(message) => Some(message),
                Notice::Success(_) => None,
            })
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn success(&self, message: &str) {
        self.notices.lock().expect("notices lock").push(Notice::Success(message.to_string()));
    }

    fn error(&self, message: &str) {
        self.notices.lock().expect("notices lock").push(Notice::Error(message.to_string()));
    }
}
