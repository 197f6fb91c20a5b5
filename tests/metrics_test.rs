//! Metrics collector tests against shared and concurrent use.

use std::sync::Arc;

use golden_path::observability::metrics::{HTTP_REQUESTS_TOTAL, QUEUE_SIZE};
use golden_path::{MetricsCollector, ObservabilityConfig, ObservabilityError};
use prometheus::Registry;

#[test]
fn test_concurrent_recording_is_lossless() {
    let metrics = Arc::new(MetricsCollector::new("orders").unwrap());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let metrics = metrics.clone();
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    metrics.record_http_request("GET", "/orders/{id}", 200, 0.001);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let labels = ["GET", "/orders/{id}", "200"];
    assert_eq!(metrics.http_requests_total().with_label_values(&labels).get(), 8000.0);
    assert_eq!(
        metrics
            .http_request_duration_seconds()
            .with_label_values(&labels)
            .get_sample_count(),
        8000
    );
}

#[test]
fn test_supplied_registry_is_used() {
    let registry = Registry::new();
    let metrics =
        MetricsCollector::with_registry(registry.clone(), &ObservabilityConfig::new("orders"))
            .unwrap();

    metrics.set_queue_size("emails", 4);

    let names: Vec<String> = registry
        .gather()
        .iter()
        .map(|family| family.name().to_string())
        .collect();
    assert!(names.iter().any(|n| n == QUEUE_SIZE));
}

#[test]
fn test_custom_metric_colliding_with_builtin() {
    let metrics = MetricsCollector::new("orders").unwrap();

    let err = metrics
        .create_counter(HTTP_REQUESTS_TOTAL, "Shadow", &["method"])
        .unwrap_err();
    assert!(matches!(err, ObservabilityError::DuplicateMetric(name) if name == HTTP_REQUESTS_TOTAL));
}

#[test]
fn test_custom_buckets_follow_config() {
    let config = ObservabilityConfig {
        http_buckets: vec![0.1, 1.0],
        ..ObservabilityConfig::new("orders")
    };
    let metrics = MetricsCollector::from_config(&config).unwrap();
    metrics.record_http_request("GET", "/", 200, 0.5);

    let snapshot = metrics.snapshot().unwrap();
    assert!(snapshot.contains(
        r#"http_request_duration_seconds_bucket{endpoint="/",method="GET",status_code="200",le="1"} 1"#
    ));
    assert!(!snapshot.contains(r#"le="0.005""#));
}

#[test]
fn test_business_operation_with_duration() {
    let metrics = MetricsCollector::new("orders").unwrap();
    metrics.record_business_operation("refund", "error", Some(0.25));

    let histogram = metrics
        .business_operation_duration_seconds()
        .with_label_values(&["refund"]);
    assert_eq!(histogram.get_sample_count(), 1);
    assert_eq!(histogram.get_sample_sum(), 0.25);
}
