//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use golden_path::observability::logging::{Fields, LogLevel, MemorySink};
use golden_path::{ObservabilityConfig, ObservabilityMiddleware};
use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider, SpanData};

/// Middleware wired to in-memory span and log capture.
pub struct Harness {
    pub observability: ObservabilityMiddleware,
    pub spans: InMemorySpanExporter,
    pub logs: MemorySink,
}

impl Harness {
    pub fn new(service: &str) -> Self {
        Self::with_config(ObservabilityConfig::new(service))
    }

    /// Harness whose logger also writes debug records.
    pub fn verbose(service: &str) -> Self {
        Self::with_config(ObservabilityConfig {
            log_level: LogLevel::Debug,
            ..ObservabilityConfig::new(service)
        })
    }

    pub fn with_config(config: ObservabilityConfig) -> Self {
        let spans = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(spans.clone())
            .build();
        let logs = MemorySink::new();

        let observability = ObservabilityMiddleware::builder(config)
            .tracer_provider(provider)
            .log_sink(Arc::new(logs.clone()))
            .build()
            .expect("middleware builds");

        Self {
            observability,
            spans,
            logs,
        }
    }

    pub fn finished_spans(&self) -> Vec<SpanData> {
        self.spans.get_finished_spans().expect("span exporter readable")
    }

    pub fn span_named(&self, name: &str) -> SpanData {
        self.finished_spans()
            .into_iter()
            .find(|span| span.name == name)
            .unwrap_or_else(|| panic!("no finished span named `{name}`"))
    }

    pub fn records(&self) -> Vec<Fields> {
        self.logs.records()
    }

    /// Records whose message equals `message`.
    pub fn records_with_message(&self, message: &str) -> Vec<Fields> {
        self.records()
            .into_iter()
            .filter(|record| record["message"] == message)
            .collect()
    }

    pub fn http_count(&self, method: &str, endpoint: &str, status: &str) -> f64 {
        self.observability
            .metrics()
            .http_requests_total()
            .with_label_values(&[method, endpoint, status])
            .get()
    }

    pub fn http_observations(&self, method: &str, endpoint: &str, status: &str) -> u64 {
        self.observability
            .metrics()
            .http_request_duration_seconds()
            .with_label_values(&[method, endpoint, status])
            .get_sample_count()
    }

    pub fn operation_count(&self, operation: &str, status: &str) -> f64 {
        self.observability
            .metrics()
            .business_operations_total()
            .with_label_values(&[operation, status])
            .get()
    }
}

/// Attribute value of `key` on `span`, rendered as a string.
pub fn attribute(span: &SpanData, key: &str) -> Option<String> {
    span.attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| kv.value.to_string())
}
