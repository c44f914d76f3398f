//! Logging capability injected into the output session.
//!
//! The session never calls the `log` macros directly. [`LogFacade`] forwards to
//! them for production use and [`MemoryLog`] keeps the messages so tests can
//! assert on warnings.

use std::sync::{Arc, Mutex};

use log::Level;

pub trait SessionLog: Send {
    fn log(&self, level: Level, message: &str);

    /// Lets callers skip formatting messages nobody will see.
    fn enabled(&self, _level: Level) -> bool {
        true
    }

    fn debug(&self, message: &str) {
        self.log(Level::Debug, message);
    }

    fn info(&self, message: &str) {
        self.log(Level::Info, message);
    }

    fn warn(&self, message: &str) {
        self.log(Level::Warn, message);
    }

    fn error(&self, message: &str) {
        self.log(Level::Error, message);
    }
}

/// Forwards to the `log` facade under the `ffmpeg_writer` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogFacade;

impl SessionLog for LogFacade {
    fn log(&self, level: Level, message: &str) {
        log::log!(target: "ffmpeg_writer", level, "{}", message);
    }

    fn enabled(&self, level: Level) -> bool {
        log::log_enabled!(target: "ffmpeg_writer", level)
    }
}

/// Collects messages in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    entries: Arc<Mutex<Vec<(Level, String)>>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(Level, String)> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Messages logged at exactly `level`.
    pub fn messages(&self, level: Level) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m)
            .collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.messages(Level::Warn)
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

impl SessionLog for MemoryLog {
    fn log(&self, level: Level, message: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((level, message.to_string()));
        }
    }
}
