//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::{ObservabilityConfig, ServiceConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable overriding `service_name`.
pub const ENV_SERVICE_NAME: &str = "OTEL_SERVICE_NAME";
/// Environment variable overriding `otlp_endpoint`.
pub const ENV_OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
///
/// Environment overrides are applied between parsing and validation.
pub fn load_config(path: &Path) -> Result<ServiceConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config = parse_config(&content)?;

    apply_env_overrides_from_process(&mut config.observability);
    validate_config(&config.observability).map_err(ConfigError::Validation)?;

    tracing::debug!(
        path = %path.display(),
        service = %config.observability.service_name,
        "Configuration loaded"
    );

    Ok(config)
}

/// Parse a TOML document without validating it.
pub fn parse_config(content: &str) -> Result<ServiceConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Apply the overrides present in the process environment.
pub fn apply_env_overrides_from_process(config: &mut ObservabilityConfig) {
    apply_env_overrides(config, |key| std::env::var(key).ok());
}

/// Apply the standard OpenTelemetry environment overrides.
///
/// `lookup` resolves a variable name; empty values are ignored.
pub fn apply_env_overrides<F>(config: &mut ObservabilityConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(name) = non_empty(ENV_SERVICE_NAME) {
        config.service_name = name;
    }
    if let Some(endpoint) = non_empty(ENV_OTLP_ENDPOINT) {
        config.otlp_endpoint = endpoint;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::logging::LogLevel;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_parse_minimal_config_uses_defaults() {
        let config = parse_config(
            r#"
            [observability]
            service_name = "orders"
            "#,
        )
        .unwrap();

        assert_eq!(config.observability.service_name, "orders");
        assert_eq!(config.observability.environment, "production");
        assert_eq!(config.observability.version, "unknown");
        assert_eq!(config.observability.log_level, LogLevel::Info);
        assert!(config.observability.trace_correlation);
        assert_eq!(config.observability.otlp_endpoint, "http://localhost:4317");
        assert_eq!(config.server.bind_address, "0.0.0.0:8000");
    }

    #[test]
    fn test_parse_full_config() {
        let config = parse_config(
            r#"
            [server]
            bind_address = "127.0.0.1:9000"

            [observability]
            service_name = "billing"
            environment = "staging"
            version = "2.3.1"
            log_level = "warning"
            trace_correlation = false
            otlp_endpoint = "http://tempo:4317"
            http_buckets = [0.1, 0.5, 1.0]
            "#,
        )
        .unwrap();

        assert_eq!(config.server.bind_address, "127.0.0.1:9000");
        assert_eq!(config.observability.environment, "staging");
        assert_eq!(config.observability.log_level, LogLevel::Warning);
        assert!(!config.observability.trace_correlation);
        assert_eq!(config.observability.http_buckets, vec![0.1, 0.5, 1.0]);
    }

    #[test]
    fn test_parse_rejects_unknown_log_level() {
        let err = parse_config(
            r#"
            [observability]
            service_name = "x"
            log_level = "verbose"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_SERVICE_NAME, "from-env"),
            (ENV_OTLP_ENDPOINT, "http://collector:4317"),
        ]
        .into_iter()
        .collect();

        let mut config = ObservabilityConfig::new("from-file");
        apply_env_overrides(&mut config, |k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.service_name, "from-env");
        assert_eq!(config.otlp_endpoint, "http://collector:4317");
    }

    #[test]
    fn test_empty_env_value_is_ignored() {
        let mut config = ObservabilityConfig::new("from-file");
        apply_env_overrides(&mut config, |_| Some("  ".to_string()));
        assert_eq!(config.service_name, "from-file");
    }

    #[test]
    fn test_load_config_reports_validation_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[observability]\nenvironment = \"dev\"").unwrap();

        // Only fails when the env does not supply a service name.
        if std::env::var(ENV_SERVICE_NAME).is_ok() {
            return;
        }
        let err = load_config(file.path()).unwrap_err();
        match err {
            ConfigError::Validation(errors) => {
                assert!(errors.iter().any(|e| e.field == "service_name"));
            }
            other => panic!("expected validation error, got {other}"),
        }
    }
}
