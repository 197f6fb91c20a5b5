//! Structured logging with trace correlation.
//!
//! # Responsibilities
//! - Build one JSON record per call and write it as one line to a sink
//! - Enrich records with the active span's `trace_id`/`span_id`
//! - Bind fixed field sets into derived loggers
//! - Initialize the `tracing` subscriber for the crate's own diagnostics
//!
//! # Design Decisions
//! - Records below the threshold return before any formatting
//! - Caller fields override bound fields, which override correlation and base fields
//! - Sink failures go to diagnostics, never to the caller
//! - Diagnostics print to stderr so stdout carries only JSON records

use std::error::Error;
use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;
use crate::observability::trace;

/// Caller-supplied fields of a log record.
pub type Fields = serde_json::Map<String, Value>;

/// Builds a [`Fields`] map from `key => value` pairs.
///
/// ```
/// use golden_path::fields;
///
/// let fields = fields! { "order_id" => "o-1", "items" => 3 };
/// assert_eq!(fields["items"], 3);
/// ```
#[macro_export]
macro_rules! fields {
    () => {
        $crate::observability::logging::Fields::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::observability::logging::Fields::new();
        $(
            let key = ::std::string::String::from($key);
            let value = $crate::observability::logging::field_value(&key, &$value);
            map.insert(key, value);
        )+
        map
    }};
}

/// Serialize one field value for [`fields!`]. Unserializable values become `null`.
#[doc(hidden)]
pub fn field_value<T: Serialize + ?Sized>(key: &str, value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        tracing::warn!(field = %key, error = %e, "Log field not serializable, recorded as null");
        Value::Null
    })
}

/// Severity of a structured record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unrecognized level name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level `{0}`, expected debug, info, warning, error or critical")]
pub struct ParseLevelError(String);

impl FromStr for LogLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, ParseLevelError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            "critical" | "fatal" => Ok(LogLevel::Critical),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = ParseLevelError;

    fn try_from(value: String) -> Result<Self, ParseLevelError> {
        value.parse()
    }
}

impl From<LogLevel> for String {
    fn from(level: LogLevel) -> Self {
        level.as_str().to_ascii_lowercase()
    }
}

/// Destination for serialized records, one line per call.
pub trait LogSink: Send + Sync {
    fn write_line(&self, line: &str) -> io::Result<()>;
}

/// Writes records to the process's standard output.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl LogSink for StdoutSink {
    fn write_line(&self, line: &str) -> io::Result<()> {
        let mut out = io::stdout().lock();
        out.write_all(line.as_bytes())?;
        out.write_all(b"\n")?;
        out.flush()
    }
}

/// Keeps records in memory. Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw lines written so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    /// Written lines parsed back into JSON objects. Unparseable lines are skipped.
    pub fn records(&self) -> Vec<Fields> {
        self.lines()
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.clear();
        }
    }
}

impl LogSink for MemorySink {
    fn write_line(&self, line: &str) -> io::Result<()> {
        self.lines
            .lock()
            .map_err(|_| io::Error::other("memory sink poisoned"))?
            .push(line.to_string());
        Ok(())
    }
}

struct LoggerInner {
    service: String,
    environment: String,
    version: String,
    level: LogLevel,
    trace_correlation: bool,
    sink: Arc<dyn LogSink>,
}

/// JSON logger whose records carry service identity and trace correlation.
///
/// Cheap to clone; clones share the sink.
#[derive(Clone)]
pub struct StructuredLogger {
    inner: Arc<LoggerInner>,
}

impl fmt::Debug for StructuredLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructuredLogger")
            .field("service", &self.inner.service)
            .field("environment", &self.inner.environment)
            .field("version", &self.inner.version)
            .field("level", &self.inner.level)
            .field("trace_correlation", &self.inner.trace_correlation)
            .finish()
    }
}

/// Builder for [`StructuredLogger`].
pub struct LoggerBuilder {
    service: String,
    environment: String,
    version: String,
    level: LogLevel,
    trace_correlation: bool,
    sink: Arc<dyn LogSink>,
}

impl LoggerBuilder {
    pub fn new(service: impl Into<String>) -> Self {
        let defaults = ObservabilityConfig::default();
        Self {
            service: service.into(),
            environment: defaults.environment,
            version: defaults.version,
            level: defaults.log_level,
            trace_correlation: defaults.trace_correlation,
            sink: Arc::new(StdoutSink),
        }
    }

    /// Builder preset from `config`, writing to stdout.
    pub fn from_config(config: &ObservabilityConfig) -> Self {
        Self::new(config.service_name.clone())
            .environment(config.environment.clone())
            .version(config.version.clone())
            .level(config.log_level)
            .trace_correlation(config.trace_correlation)
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn trace_correlation(mut self, enabled: bool) -> Self {
        self.trace_correlation = enabled;
        self
    }

    /// Replace the stdout sink.
    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn build(self) -> StructuredLogger {
        StructuredLogger {
            inner: Arc::new(LoggerInner {
                service: self.service,
                environment: self.environment,
                version: self.version,
                level: self.level,
                trace_correlation: self.trace_correlation,
                sink: self.sink,
            }),
        }
    }
}

impl StructuredLogger {
    pub fn builder(service: impl Into<String>) -> LoggerBuilder {
        LoggerBuilder::new(service)
    }

    /// Logger configured from `config`, writing to stdout.
    pub fn from_config(config: &ObservabilityConfig) -> Self {
        LoggerBuilder::from_config(config).build()
    }

    pub fn level(&self) -> LogLevel {
        self.inner.level
    }

    /// Whether a record at `level` would be written.
    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.inner.level
    }

    pub fn log(&self, level: LogLevel, message: &str, fields: Fields) {
        self.emit(level, message, None, fields);
    }

    pub fn debug(&self, message: &str, fields: Fields) {
        self.emit(LogLevel::Debug, message, None, fields);
    }

    pub fn info(&self, message: &str, fields: Fields) {
        self.emit(LogLevel::Info, message, None, fields);
    }

    pub fn warning(&self, message: &str, fields: Fields) {
        self.emit(LogLevel::Warning, message, None, fields);
    }

    pub fn error(&self, message: &str, fields: Fields) {
        self.emit(LogLevel::Error, message, None, fields);
    }

    pub fn critical(&self, message: &str, fields: Fields) {
        self.emit(LogLevel::Critical, message, None, fields);
    }

    /// Error record carrying `err` and its source chain under `exception`.
    pub fn error_with(&self, message: &str, err: &(dyn Error + 'static), fields: Fields) {
        self.emit(LogLevel::Error, message, Some(err), fields);
    }

    /// Critical record carrying `err` and its source chain under `exception`.
    pub fn critical_with(&self, message: &str, err: &(dyn Error + 'static), fields: Fields) {
        self.emit(LogLevel::Critical, message, Some(err), fields);
    }

    /// Derived logger that merges `fields` into every record.
    pub fn with_fields(&self, fields: Fields) -> BoundLogger {
        BoundLogger {
            logger: self.clone(),
            fields,
        }
    }

    fn emit(&self, level: LogLevel, message: &str, err: Option<&(dyn Error + 'static)>, fields: Fields) {
        if !self.enabled(level) {
            return;
        }

        let record = self.build_record(level, message, err, fields);
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize log record");
                return;
            }
        };

        if let Err(e) = self.inner.sink.write_line(&line) {
            tracing::warn!(error = %e, "Failed to write log record");
        }
    }

    fn build_record(
        &self,
        level: LogLevel,
        message: &str,
        err: Option<&(dyn Error + 'static)>,
        fields: Fields,
    ) -> Fields {
        let inner = &self.inner;
        let mut record = Fields::new();
        record.insert(
            "timestamp".into(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true).into(),
        );
        record.insert("level".into(), level.as_str().into());
        record.insert("service".into(), inner.service.clone().into());
        record.insert("environment".into(), inner.environment.clone().into());
        record.insert("version".into(), inner.version.clone().into());
        record.insert("message".into(), message.into());

        if inner.trace_correlation {
            if let Some(ids) = trace::current_ids() {
                record.insert("trace_id".into(), ids.trace_id.into());
                record.insert("span_id".into(), ids.span_id.into());
            }
        }

        if let Some(err) = err {
            record.insert("exception".into(), exception_value(err));
        }

        record.extend(fields);
        record
    }
}

fn exception_value(err: &(dyn Error + 'static)) -> Value {
    let mut exception = Fields::new();
    exception.insert("message".into(), err.to_string().into());

    let chain: Vec<Value> = std::iter::successors(err.source(), |&e| e.source())
        .map(|e| Value::String(e.to_string()))
        .collect();
    if !chain.is_empty() {
        exception.insert("chain".into(), Value::Array(chain));
    }

    let backtrace = std::backtrace::Backtrace::capture();
    if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
        exception.insert("stack".into(), backtrace.to_string().into());
    }

    Value::Object(exception)
}

/// Logger with a pre-bound field set, from [`StructuredLogger::with_fields`].
#[derive(Clone, Debug)]
pub struct BoundLogger {
    logger: StructuredLogger,
    fields: Fields,
}

impl BoundLogger {
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Further derived logger; `fields` override the ones already bound.
    pub fn with_fields(&self, fields: Fields) -> BoundLogger {
        BoundLogger {
            logger: self.logger.clone(),
            fields: self.merged(fields),
        }
    }

    pub fn log(&self, level: LogLevel, message: &str, fields: Fields) {
        if self.logger.enabled(level) {
            self.logger.emit(level, message, None, self.merged(fields));
        }
    }

    pub fn debug(&self, message: &str, fields: Fields) {
        self.log(LogLevel::Debug, message, fields);
    }

    pub fn info(&self, message: &str, fields: Fields) {
        self.log(LogLevel::Info, message, fields);
    }

    pub fn warning(&self, message: &str, fields: Fields) {
        self.log(LogLevel::Warning, message, fields);
    }

    pub fn error(&self, message: &str, fields: Fields) {
        self.log(LogLevel::Error, message, fields);
    }

    pub fn critical(&self, message: &str, fields: Fields) {
        self.log(LogLevel::Critical, message, fields);
    }

    pub fn error_with(&self, message: &str, err: &(dyn Error + 'static), fields: Fields) {
        if self.logger.enabled(LogLevel::Error) {
            self.logger
                .emit(LogLevel::Error, message, Some(err), self.merged(fields));
        }
    }

    pub fn critical_with(&self, message: &str, err: &(dyn Error + 'static), fields: Fields) {
        if self.logger.enabled(LogLevel::Critical) {
            self.logger
                .emit(LogLevel::Critical, message, Some(err), self.merged(fields));
        }
    }

    fn merged(&self, fields: Fields) -> Fields {
        let mut merged = self.fields.clone();
        merged.extend(fields);
        merged
    }
}

/// Install the `tracing` subscriber used for the crate's own diagnostics.
///
/// `RUST_LOG` wins over `default_filter`. Output goes to stderr.
pub fn init_diagnostics(default_filter: &str) -> Result<(), tracing_subscriber::util::TryInitError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warning);
        assert!(LogLevel::Warning < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::Critical);
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!("INFO".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert_eq!(" Critical ".parse::<LogLevel>().unwrap(), LogLevel::Critical);
        assert!("trace".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_unserializable_field_becomes_null() {
        let mut by_pair = std::collections::HashMap::new();
        by_pair.insert((1, 2), "pair");

        let fields = fields! { "ok" => 1, "by_pair" => by_pair };
        assert_eq!(fields["ok"], 1);
        assert!(fields["by_pair"].is_null());
    }

    #[test]
    fn test_fields_macro() {
        let duration_ms = 12.5;
        let fields = fields! { "a" => 1, "b" => "two", "duration_ms" => duration_ms };
        assert_eq!(fields["a"], 1);
        assert_eq!(fields["b"], "two");
        assert_eq!(fields["duration_ms"], 12.5);
        assert!(fields!().is_empty());
    }

    #[test]
    fn test_record_key_order() {
        let sink = MemorySink::new();
        let logger = StructuredLogger::builder("svc")
            .sink(Arc::new(sink.clone()))
            .build();

        logger.info("hello", fields! { "extra" => true });

        let keys: Vec<String> = sink.records()[0].keys().cloned().collect();
        assert_eq!(
            keys,
            vec!["timestamp", "level", "service", "environment", "version", "message", "extra"]
        );
    }

    #[test]
    fn test_memory_sink_clear() {
        let sink = MemorySink::new();
        sink.write_line("{}").unwrap();
        assert_eq!(sink.lines().len(), 1);
        sink.clear();
        assert!(sink.lines().is_empty());
    }
}
