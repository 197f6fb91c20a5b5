//! Error types for setting up and driving the observability stack.
//!
//! Only setup-time failures surface here. Exporter and log-sink problems at
//! runtime belong to the external pipeline and are reported through `tracing`
//! diagnostics instead.

use crate::config::loader::ConfigError;

/// Error returned by collector construction and instrument registration.
#[derive(Debug, thiserror::Error)]
pub enum ObservabilityError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("metric `{0}` is already registered")]
    DuplicateMetric(String),

    #[error("metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("failed to build OTLP span exporter: {0}")]
    Exporter(#[from] opentelemetry_otlp::ExporterBuildError),

    #[error("tracer provider error: {0}")]
    Provider(#[from] opentelemetry_sdk::error::OTelSdkError),
}

impl ObservabilityError {
    /// Maps a registry error for `name`, turning collisions into [`ObservabilityError::DuplicateMetric`].
    pub(crate) fn registration(name: &str, err: prometheus::Error) -> Self {
        match err {
            prometheus::Error::AlreadyReg => Self::DuplicateMetric(name.to_string()),
            // Same name registered with other labels or help text.
            prometheus::Error::Msg(msg) if msg.contains("previously registered") => {
                Self::DuplicateMetric(name.to_string())
            }
            other => Self::Metrics(other),
        }
    }
}

pub type Result<T, E = ObservabilityError> = std::result::Result<T, E>;
