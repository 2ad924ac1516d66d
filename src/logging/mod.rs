//! Logging and telemetry.
//!
//! The core talks to a [`Log`]: fire-and-forget calls that never fail.
//! [`TracingLog`] forwards to `tracing`; [`MemoryLog`] additionally records
//! every entry so tests (and hosts) can inspect what happened.

mod setup;

pub use setup::{parse_log_level, setup_logging, LoggingConfig};

use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Key/value parameters attached to errors and telemetry events.
pub type Params<'a> = &'a [(&'a str, &'a str)];

/// Logger and telemetry sink used throughout the bus.
pub trait Log: Send + Sync {
    fn trace(&self, message: &str);
    fn debug(&self, message: &str);
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str, params: Params<'_>);

    /// Log an error value (its `Display`) with parameters.
    fn exception(&self, error: &(dyn Error + 'static), params: Params<'_>);

    /// Record a named telemetry event.
    fn event(&self, name: &str, params: Params<'_>);

    /// Record a completed request.
    fn request(&self, trace: &RequestTrace);

    /// Log `error` and every nested cause, innermost first.
    fn error_chain(&self, error: &(dyn Error + 'static), params: Params<'_>) {
        if let Some(inner) = error.source() {
            self.trace("logging inner error");
            self.error_chain(inner, params);
        }
        self.exception(error, params);
    }
}

/// A completed request, for request telemetry.
#[derive(Debug, Clone)]
pub struct RequestTrace {
    pub route: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub response_code: String,
    pub successful: bool,
    pub properties: Vec<(String, String)>,
}

impl RequestTrace {
    pub fn duration(&self) -> Duration {
        (self.end_time - self.start_time).to_std().unwrap_or_default()
    }
}

struct Fields<'a>(Params<'a>);

impl fmt::Display for Fields<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}={:?}", key, value)?;
        }
        Ok(())
    }
}

/// [`Log`] backed by `tracing`. Telemetry goes to the `topic_bus::telemetry` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl Log for TracingLog {
    fn trace(&self, message: &str) {
        tracing::trace!("{}", message);
    }

    fn debug(&self, message: &str) {
        tracing::debug!("{}", message);
    }

    fn info(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!("{}", message);
    }

    fn error(&self, message: &str, params: Params<'_>) {
        tracing::error!(params = %Fields(params), "{}", message);
    }

    fn exception(&self, error: &(dyn Error + 'static), params: Params<'_>) {
        tracing::error!(error = %error, params = %Fields(params), "exception");
    }

    fn event(&self, name: &str, params: Params<'_>) {
        tracing::info!(target: "topic_bus::telemetry", params = %Fields(params), "{}", name);
    }

    fn request(&self, trace: &RequestTrace) {
        tracing::info!(
            target: "topic_bus::telemetry",
            route = %trace.route,
            response_code = %trace.response_code,
            successful = trace.successful,
            duration_ms = trace.duration().as_millis() as u64,
            "request"
        );
    }
}

/// Severity of a recorded entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Event,
    Request,
}

/// One recorded log call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub params: Vec<(String, String)>,
}

impl LogEntry {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A [`Log`] that records entries in a shared buffer and forwards them to
/// [`TracingLog`]. Clones share the buffer.
#[derive(Debug, Default, Clone)]
pub struct MemoryLog {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Entries of `level` whose message contains `fragment`.
    pub fn matching(&self, level: LogLevel, fragment: &str) -> Vec<LogEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.level == level && e.message.contains(fragment))
            .collect()
    }

    pub fn contains(&self, level: LogLevel, fragment: &str) -> bool {
        !self.matching(level, fragment).is_empty()
    }

    pub fn count(&self, level: LogLevel) -> usize {
        self.entries().iter().filter(|e| e.level == level).count()
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    fn record(&self, level: LogLevel, message: String, params: Params<'_>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(LogEntry {
                level,
                message,
                params: params
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            });
        }
    }
}

impl Log for MemoryLog {
    fn trace(&self, message: &str) {
        TracingLog.trace(message);
        self.record(LogLevel::Trace, message.to_string(), &[]);
    }

    fn debug(&self, message: &str) {
        TracingLog.debug(message);
        self.record(LogLevel::Debug, message.to_string(), &[]);
    }

    fn info(&self, message: &str) {
        TracingLog.info(message);
        self.record(LogLevel::Info, message.to_string(), &[]);
    }

    fn warn(&self, message: &str) {
        TracingLog.warn(message);
        self.record(LogLevel::Warn, message.to_string(), &[]);
    }

    fn error(&self, message: &str, params: Params<'_>) {
        TracingLog.error(message, params);
        self.record(LogLevel::Error, message.to_string(), params);
    }

    fn exception(&self, error: &(dyn Error + 'static), params: Params<'_>) {
        TracingLog.exception(error, params);
        self.record(LogLevel::Error, error.to_string(), params);
    }

    fn event(&self, name: &str, params: Params<'_>) {
        TracingLog.event(name, params);
        self.record(LogLevel::Event, name.to_string(), params);
    }

    fn request(&self, trace: &RequestTrace) {
        TracingLog.request(trace);
        let code = trace.response_code.as_str();
        self.record(
            LogLevel::Request,
            trace.route.clone(),
            &[("ResponseCode", code)],
        );
    }
}
