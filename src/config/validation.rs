//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, buckets increasing)
//! - Check the exporter endpoint is a usable URL
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Pure function: ObservabilityConfig → Result<(), Vec<ValidationError>>

use std::fmt;

use url::Url;

use crate::config::schema::ObservabilityConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate an observability configuration.
pub fn validate_config(config: &ObservabilityConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.service_name.trim().is_empty() {
        errors.push(ValidationError::new("service_name", "is required"));
    }

    match Url::parse(&config.otlp_endpoint) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => {}
        Ok(url) => errors.push(ValidationError::new(
            "otlp_endpoint",
            format!("unsupported endpoint `{url}`, expected http(s)://host:port"),
        )),
        Err(e) => errors.push(ValidationError::new(
            "otlp_endpoint",
            format!("`{}` is not a valid URL: {e}", config.otlp_endpoint),
        )),
    }

    if config.export_timeout_secs == 0 {
        errors.push(ValidationError::new("export_timeout_secs", "must be greater than 0"));
    }

    if config.http_buckets.is_empty() {
        errors.push(ValidationError::new("http_buckets", "must not be empty"));
    } else if config
        .http_buckets
        .windows(2)
        .any(|pair| !(pair[0] < pair[1]))
    {
        errors.push(ValidationError::new("http_buckets", "must be strictly increasing"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
