//! Observability facade for axum services.
//!
//! Metrics (Prometheus), traces (OpenTelemetry over OTLP) and structured JSON
//! logs behind one handle, plus request middleware and function wrappers that
//! keep the three consistent.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use config::{ObservabilityConfig, ServiceConfig};
pub use error::{ObservabilityError, Result};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use observability::{
    LogLevel, MetricsCollector, ObservabilityMiddleware, StructuredLogger, TraceCollector,
};
