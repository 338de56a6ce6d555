//! Simple logging module.

use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Log level for filtering messages.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::Info => write!(f, "INFO"),
            Level::Warn => write!(f, "WARN"),
            Level::Error => write!(f, "ERROR"),
        }
    }
}

static LOG_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);

/// Initialize the logger with the given level.
pub fn init(level: Level) {
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Returns true if the given level should be logged.
#[inline]
fn enabled(level: Level) -> bool {
    level as u8 >= LOG_LEVEL.load(Ordering::Relaxed)
}

fn log_with_id(level: Level, id: &str, message: &str) {
    if enabled(level) {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        eprintln!(
            "{}.{:03} [{:5}] [{}] {}",
            now.as_secs(),
            now.subsec_millis(),
            level,
            id,
            message
        );
    }
}

/// Thread-safe logger instance with an identifier prefix.
///
/// Each logger carries an ID that is prepended to all messages, allowing
/// differentiation between multiple VM instances.
#[derive(Clone)]
pub struct Logger {
    pub id: Arc<str>,
}

impl Logger {
    /// Creates a new logger with the given identifier.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self { id: id.into() }
    }

    /// Logs an info-level message.
    pub fn info(&self, message: &str) {
        log_with_id(Level::Info, &self.id, message);
    }

    /// Logs a warning-level message.
    pub fn warn(&self, message: &str) {
        log_with_id(Level::Warn, &self.id, message);
    }

    /// Logs an error-level message.
    pub fn error(&self, message: &str) {
        log_with_id(Level::Error, &self.id, message);
    }
}
