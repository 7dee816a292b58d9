//! Leveled print sink used by KaRL `#print` and the context `print` calls.
//!
//! The logger is an explicitly constructed object shared through `Arc`.
//! Crate-internal diagnostics go straight to `tracing`; this type only
//! carries the messages a knowledge base is asked to print.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};

/// Print severity. Lower is more important.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum LogLevel {
    /// Always printed.
    Emergency = 0,
    /// Errors.
    Error = 1,
    /// Warnings.
    Warning = 2,
    /// Major events.
    Major = 3,
    /// Minor events.
    Minor = 4,
    /// Tracing output.
    Trace = 5,
    /// Everything.
    Detailed = 6,
}

impl LogLevel {
    /// Alias for [`LogLevel::Emergency`].
    pub const ALWAYS: Self = Self::Emergency;

    /// Clamps an arbitrary integer into the level range.
    #[must_use]
    pub fn from_integer(level: i64) -> Self {
        match level {
            i64::MIN..=0 => Self::Emergency,
            1 => Self::Error,
            2 => Self::Warning,
            3 => Self::Major,
            4 => Self::Minor,
            5 => Self::Trace,
            _ => Self::Detailed,
        }
    }

    /// Numeric value of the level.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Emergency => "EMERGENCY",
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
            Self::Major => "MAJOR",
            Self::Minor => "MINOR",
            Self::Trace => "TRACE",
            Self::Detailed => "DETAILED",
        };
        f.write_str(name)
    }
}

/// Destination for printed messages.
pub trait PrintSink: Send + Sync {
    /// Writes one message at the given level.
    fn write(&self, level: LogLevel, message: &str);
}

/// Forwards printed messages to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl PrintSink for TracingSink {
    fn write(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Emergency | LogLevel::Error => tracing::error!(target: "madara::print", severity = %level, "{message}"),
            LogLevel::Warning => tracing::warn!(target: "madara::print", "{message}"),
            LogLevel::Major | LogLevel::Minor => tracing::info!(target: "madara::print", severity = %level, "{message}"),
            LogLevel::Trace => tracing::debug!(target: "madara::print", "{message}"),
            LogLevel::Detailed => tracing::trace!(target: "madara::print", "{message}"),
        }
    }
}

/// Buffers printed messages in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<(LogLevel, String)>>,
}

impl MemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every buffered message.
    #[must_use]
    pub fn lines(&self) -> Vec<(LogLevel, String)> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Returns the buffered messages joined into one string.
    #[must_use]
    pub fn contents(&self) -> String {
        self.lines()
            .into_iter()
            .map(|(_, line)| line)
            .collect::<Vec<_>>()
            .concat()
    }

    /// Drops every buffered message.
    pub fn clear(&self) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.clear();
        }
    }
}

impl PrintSink for MemorySink {
    fn write(&self, level: LogLevel, message: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push((level, message.to_string()));
        }
    }
}

/// Leveled logger with pluggable sinks.
pub struct Logger {
    level: AtomicU8,
    sinks: RwLock<Vec<Arc<dyn PrintSink>>>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("level", &self.level())
            .field("sinks", &self.sinks.read().map(|s| s.len()).unwrap_or(0))
            .finish()
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(LogLevel::Error)
    }
}

impl Logger {
    /// Creates a logger at `level` writing to a [`TracingSink`].
    #[must_use]
    pub fn new(level: LogLevel) -> Self {
        Self {
            level: AtomicU8::new(level.as_u8()),
            sinks: RwLock::new(vec![Arc::new(TracingSink)]),
        }
    }

    /// Creates a logger at `level` writing only to `sink`.
    #[must_use]
    pub fn with_sink(level: LogLevel, sink: Arc<dyn PrintSink>) -> Self {
        Self {
            level: AtomicU8::new(level.as_u8()),
            sinks: RwLock::new(vec![sink]),
        }
    }

    /// Current level.
    #[must_use]
    pub fn level(&self) -> LogLevel {
        LogLevel::from_integer(i64::from(self.level.load(Ordering::Relaxed)))
    }

    /// Sets the level.
    pub fn set_level(&self, level: LogLevel) {
        self.level.store(level.as_u8(), Ordering::Relaxed);
    }

    /// Adds a sink.
    pub fn add_sink(&self, sink: Arc<dyn PrintSink>) {
        if let Ok(mut sinks) = self.sinks.write() {
            sinks.push(sink);
        }
    }

    /// Removes every sink.
    pub fn clear_sinks(&self) {
        if let Ok(mut sinks) = self.sinks.write() {
            sinks.clear();
        }
    }

    /// Returns true if a message at `level` would be written.
    #[must_use]
    pub fn enabled(&self, level: LogLevel) -> bool {
        level <= self.level()
    }

    /// Writes `message` to every sink if `level` is enabled.
    pub fn log(&self, level: LogLevel, message: &str) {
        if !self.enabled(level) {
            return;
        }
        let Ok(sinks) = self.sinks.read() else {
            tracing::error!("logger sinks lock poisoned, dropping message");
            return;
        };
        for sink in sinks.iter() {
            sink.write(level, message);
        }
    }
}
