//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::observability::logging::LogLevel;

/// Buckets for `http_request_duration_seconds`, in seconds.
pub const DEFAULT_HTTP_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Root configuration for the demo service binary.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP listener settings.
    pub server: ServerConfig,

    /// Observability settings shared by all collectors.
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8000").
    pub bind_address: String,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Name of the service. Required.
    pub service_name: String,

    /// Deployment environment (production, staging, development).
    pub environment: String,

    /// Service version.
    pub version: String,

    /// Threshold for structured log records.
    pub log_level: LogLevel,

    /// Add `trace_id`/`span_id` of the active span to log records.
    pub trace_correlation: bool,

    /// OTLP/gRPC trace receiver.
    pub otlp_endpoint: String,

    /// Timeout for a single export batch, in seconds.
    pub export_timeout_secs: u64,

    /// Buckets for the HTTP request duration histogram.
    pub http_buckets: Vec<f64>,
}

impl ObservabilityConfig {
    /// Default configuration for the named service.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Self::default()
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            environment: "production".to_string(),
            version: "unknown".to_string(),
            log_level: LogLevel::Info,
            trace_correlation: true,
            otlp_endpoint: "http://localhost:4317".to_string(),
            export_timeout_secs: 10,
            http_buckets: DEFAULT_HTTP_BUCKETS.to_vec(),
        }
    }
}
