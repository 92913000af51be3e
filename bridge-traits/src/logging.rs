//! Host Log Forwarding
//!
//! `core-runtime` mirrors the tracing events emitted by the auth providers and
//! the roaming store into a host-supplied [`LoggerSink`], so apps can route
//! sign-in and sync diagnostics into their own pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::Result;

/// Severity of a forwarded event, ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One forwarded event.
///
/// `target` is the emitting module (`core_auth::flow`, `core_roaming::store`)
/// and `fields` carries the event's structured values such as `provider` or
/// `store_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub timestamp: DateTime<Utc>,
    pub target: String,
    pub message: String,
    pub fields: HashMap<String, String>,
    /// Name of the innermost span the event was recorded in.
    pub span_id: Option<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            timestamp: Utc::now(),
            target: target.into(),
            message: message.into(),
            fields: HashMap::new(),
            span_id: None,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_span_id(mut self, span_id: impl Into<String>) -> Self {
        self.span_id = Some(span_id.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

/// Receives core diagnostics on behalf of the host.
///
/// Entries reach the sink after the subscriber's own level filter and, unless
/// disabled in `LoggingConfig`, after token and account values were redacted.
/// Sinks must not block; buffer and flush instead.
///
/// # Example
///
/// ```
/// use bridge_traits::logging::{LogEntry, LogLevel, LoggerSink};
///
/// async fn report_sync_failure(sink: &dyn LoggerSink, store_id: &str, status: u16) {
///     let entry = LogEntry::new(LogLevel::Warn, "core_roaming::store", "Roaming sync failed")
///         .with_field("store_id", store_id)
///         .with_field("status", status.to_string());
///     if entry.level >= sink.min_level() {
///         let _ = sink.log(entry).await;
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait LoggerSink: Send + Sync {
    async fn log(&self, entry: LogEntry) -> Result<()>;

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Entries below this level are dropped before they are built.
    fn min_level(&self) -> LogLevel {
        LogLevel::Info
    }
}

/// Sink that writes one line per entry to stderr. Used by the demo host.
#[derive(Debug, Clone)]
pub struct ConsoleLogger {
    pub min_level: LogLevel,
}

impl ConsoleLogger {
    pub fn new(min_level: LogLevel) -> Self {
        Self { min_level }
    }

    /// Renders `entry` as `time LEVEL target: message key=value...`, with
    /// fields sorted by key.
    pub fn format(entry: &LogEntry) -> String {
        let mut line = format!(
            "{} {:<5} {}: {}",
            entry.timestamp.format("%H:%M:%S%.3f"),
            entry.level,
            entry.target,
            entry.message
        );

        let mut fields: Vec<_> = entry.fields.iter().collect();
        fields.sort();
        for (key, value) in fields {
            line.push_str(&format!(" {}={}", key, value));
        }
        line
    }
}

impl Default for ConsoleLogger {
    fn default() -> Self {
        Self::new(LogLevel::Info)
    }
}

#[async_trait::async_trait]
impl LoggerSink for ConsoleLogger {
    async fn log(&self, entry: LogEntry) -> Result<()> {
        if entry.level >= self.min_level {
            eprintln!("{}", Self::format(&entry));
        }
        Ok(())
    }

    fn min_level(&self) -> LogLevel {
        self.min_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_event_fields() {
        let entry = LogEntry::new(LogLevel::Info, "core_auth::flow", "Signed in")
            .with_field("provider", "msal")
            .with_span_id("get_token");

        assert_eq!(entry.field("provider"), Some("msal"));
        assert_eq!(entry.field("account_id"), None);
        assert_eq!(entry.span_id.as_deref(), Some("get_token"));
    }

    #[test]
    fn test_levels_order_by_severity() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert_eq!(LogLevel::Warn.to_string(), "WARN");
    }

    #[test]
    fn test_console_format_sorts_fields() {
        let entry = LogEntry::new(LogLevel::Warn, "core_roaming::store", "Roaming sync failed")
            .with_field("store_id", "com.contoso.settings")
            .with_field("status", "503");

        let line = ConsoleLogger::format(&entry);

        assert!(line.ends_with(
            "WARN  core_roaming::store: Roaming sync failed status=503 store_id=com.contoso.settings"
        ));
    }

    #[tokio::test]
    async fn test_console_logger_respects_min_level() {
        let logger = ConsoleLogger::new(LogLevel::Warn);
        assert_eq!(LoggerSink::min_level(&logger), LogLevel::Warn);

        let below = LogEntry::new(LogLevel::Debug, "core_auth::manager", "Provider replaced");
        logger.log(below).await.unwrap();
        logger.flush().await.unwrap();
    }
}
