//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request / instrumented call
//!     → middleware.rs (timing, outcome, request context)
//!         → metrics.rs (counters, histograms, gauges on a Prometheus registry)
//!         → trace.rs (spans, exported over OTLP)
//!         → logging.rs (one JSON line per record, trace-correlated)
//!
//! Consumers:
//!     → Prometheus scrape of the text exposition
//!     → OTLP collector (Tempo, Jaeger, ...)
//!     → Log aggregation reading stdout
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Trace context flows in through `traceparent` and out through log records
//! - Metrics are cheap (atomic increments)
//! - Export and log transport failures never reach the instrumented code

pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod propagation;
pub mod trace;

pub use logging::{BoundLogger, Fields, LogLevel, LogSink, MemorySink, StdoutSink, StructuredLogger};
pub use metrics::MetricsCollector;
pub use middleware::{ObservabilityMiddleware, ObservabilityMiddlewareBuilder, RequestContext};
pub use trace::{ActiveSpan, SpanIds, SpanOptions, TraceCollector};
