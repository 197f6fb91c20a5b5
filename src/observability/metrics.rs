//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define the built-in HTTP and business-operation instruments
//! - Register caller-defined instruments on the same registry
//! - Render the registry in Prometheus text exposition format
//!
//! # Metrics
//! - `http_requests_total` (counter): requests by method, endpoint, status_code
//! - `http_request_duration_seconds` (histogram): latency by the same labels
//! - `business_operations_total` (counter): operations by operation, status
//! - `business_operation_duration_seconds` (histogram): latency by operation
//! - `active_connections` (gauge): current connection count
//! - `queue_size` (gauge): depth by queue_name
//! - `service_info` (gauge): always 1, labeled service, environment, version
//!
//! # Design Decisions
//! - Instruments are created once at construction; recording is a label lookup
//!   plus an atomic update
//! - The registry may be supplied by the host so several collectors or other
//!   libraries share one scrape endpoint

use prometheus::{
    CounterVec, GaugeVec, HistogramOpts, HistogramVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder, TEXT_FORMAT,
};

use crate::config::ObservabilityConfig;
use crate::error::{ObservabilityError, Result};

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub const BUSINESS_OPERATIONS_TOTAL: &str = "business_operations_total";
pub const BUSINESS_OPERATION_DURATION_SECONDS: &str = "business_operation_duration_seconds";
pub const ACTIVE_CONNECTIONS: &str = "active_connections";
pub const QUEUE_SIZE: &str = "queue_size";
pub const SERVICE_INFO: &str = "service_info";

/// Owns the service's instruments and the registry they live on.
///
/// Cheap to clone; clones record into the same instruments.
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Registry,
    http_requests_total: CounterVec,
    http_request_duration_seconds: HistogramVec,
    business_operations_total: CounterVec,
    business_operation_duration_seconds: HistogramVec,
    active_connections: IntGauge,
    queue_size: IntGaugeVec,
}

impl MetricsCollector {
    /// Collector with default settings on a fresh registry.
    pub fn new(service_name: impl Into<String>) -> Result<Self> {
        Self::from_config(&ObservabilityConfig::new(service_name))
    }

    /// Collector on a fresh registry.
    pub fn from_config(config: &ObservabilityConfig) -> Result<Self> {
        Self::with_registry(Registry::new(), config)
    }

    /// Collector registering into `registry`.
    ///
    /// Fails with [`ObservabilityError::DuplicateMetric`] if a built-in name is
    /// already taken on that registry.
    pub fn with_registry(registry: Registry, config: &ObservabilityConfig) -> Result<Self> {
        let http_requests_total = CounterVec::new(
            Opts::new(HTTP_REQUESTS_TOTAL, "Total HTTP requests"),
            &["method", "endpoint", "status_code"],
        )?;
        register(&registry, HTTP_REQUESTS_TOTAL, &http_requests_total)?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                HTTP_REQUEST_DURATION_SECONDS,
                "HTTP request duration in seconds",
            )
            .buckets(config.http_buckets.clone()),
            &["method", "endpoint", "status_code"],
        )?;
        register(
            &registry,
            HTTP_REQUEST_DURATION_SECONDS,
            &http_request_duration_seconds,
        )?;

        let business_operations_total = CounterVec::new(
            Opts::new(BUSINESS_OPERATIONS_TOTAL, "Total business operations"),
            &["operation", "status"],
        )?;
        register(&registry, BUSINESS_OPERATIONS_TOTAL, &business_operations_total)?;

        let business_operation_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                BUSINESS_OPERATION_DURATION_SECONDS,
                "Business operation duration in seconds",
            ),
            &["operation"],
        )?;
        register(
            &registry,
            BUSINESS_OPERATION_DURATION_SECONDS,
            &business_operation_duration_seconds,
        )?;

        let active_connections =
            IntGauge::with_opts(Opts::new(ACTIVE_CONNECTIONS, "Number of active connections"))?;
        register(&registry, ACTIVE_CONNECTIONS, &active_connections)?;

        let queue_size = IntGaugeVec::new(
            Opts::new(QUEUE_SIZE, "Current queue size"),
            &["queue_name"],
        )?;
        register(&registry, QUEUE_SIZE, &queue_size)?;

        let service_info = IntGaugeVec::new(
            Opts::new(SERVICE_INFO, "Service information"),
            &["service", "environment", "version"],
        )?;
        register(&registry, SERVICE_INFO, &service_info)?;
        service_info
            .with_label_values(&[
                config.service_name.as_str(),
                config.environment.as_str(),
                config.version.as_str(),
            ])
            .set(1);

        tracing::debug!(service = %config.service_name, "Metrics registered");

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            business_operations_total,
            business_operation_duration_seconds,
            active_connections,
            queue_size,
        })
    }

    /// Count one HTTP request and observe its duration.
    pub fn record_http_request(
        &self,
        method: &str,
        endpoint: &str,
        status_code: u16,
        duration_seconds: f64,
    ) {
        let status = status_code.to_string();
        let labels = [method, endpoint, status.as_str()];
        self.http_requests_total.with_label_values(&labels).inc();
        self.http_request_duration_seconds
            .with_label_values(&labels)
            .observe(duration_seconds);
    }

    /// Count one business operation; observe its duration when known.
    pub fn record_business_operation(
        &self,
        operation: &str,
        status: &str,
        duration_seconds: Option<f64>,
    ) {
        self.business_operations_total
            .with_label_values(&[operation, status])
            .inc();
        if let Some(duration) = duration_seconds {
            self.business_operation_duration_seconds
                .with_label_values(&[operation])
                .observe(duration);
        }
    }

    pub fn set_active_connections(&self, count: i64) {
        self.active_connections.set(count);
    }

    pub fn set_queue_size(&self, queue_name: &str, size: i64) {
        self.queue_size.with_label_values(&[queue_name]).set(size);
    }

    /// Register a counter family on the collector's registry.
    pub fn create_counter(&self, name: &str, help: &str, labels: &[&str]) -> Result<CounterVec> {
        let counter = CounterVec::new(Opts::new(name, help), labels)?;
        register(&self.registry, name, &counter)?;
        Ok(counter)
    }

    /// Register a histogram family; `buckets` defaults to the Prometheus defaults.
    pub fn create_histogram(
        &self,
        name: &str,
        help: &str,
        labels: &[&str],
        buckets: Option<Vec<f64>>,
    ) -> Result<HistogramVec> {
        let mut opts = HistogramOpts::new(name, help);
        if let Some(buckets) = buckets {
            opts = opts.buckets(buckets);
        }
        let histogram = HistogramVec::new(opts, labels)?;
        register(&self.registry, name, &histogram)?;
        Ok(histogram)
    }

    /// Register a gauge family on the collector's registry.
    pub fn create_gauge(&self, name: &str, help: &str, labels: &[&str]) -> Result<GaugeVec> {
        let gauge = GaugeVec::new(Opts::new(name, help), labels)?;
        register(&self.registry, name, &gauge)?;
        Ok(gauge)
    }

    /// Text exposition of every family in the registry.
    pub fn snapshot(&self) -> Result<String> {
        Ok(TextEncoder::new().encode_to_string(&self.registry.gather())?)
    }

    /// Content type of [`MetricsCollector::snapshot`].
    pub fn content_type(&self) -> &'static str {
        TEXT_FORMAT
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn http_requests_total(&self) -> &CounterVec {
        &self.http_requests_total
    }

    pub fn http_request_duration_seconds(&self) -> &HistogramVec {
        &self.http_request_duration_seconds
    }

    pub fn business_operations_total(&self) -> &CounterVec {
        &self.business_operations_total
    }

    pub fn business_operation_duration_seconds(&self) -> &HistogramVec {
        &self.business_operation_duration_seconds
    }

    pub fn active_connections(&self) -> &IntGauge {
        &self.active_connections
    }

    pub fn queue_size(&self) -> &IntGaugeVec {
        &self.queue_size
    }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector").finish_non_exhaustive()
    }
}

fn register<C>(registry: &Registry, name: &str, collector: &C) -> Result<()>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|e| ObservabilityError::registration(name, e))
}
