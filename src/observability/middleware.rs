//! Request and function instrumentation over the three collectors.
//!
//! # Responsibilities
//! - Bind metrics, traces and logs together for each inbound request
//! - Provide the pre/post-hook lifecycle (`on_request_start`/`on_request_end`)
//!   and the server-span lifecycle used by the dispatch layer
//! - Wrap arbitrary operations in a span plus business-operation metric
//!
//! # Request outcomes
//! ```text
//! response returned   → status of the response, info  "HTTP request completed"
//! Err / panic         → 500,                    error "HTTP request failed"
//! future dropped      → 499,                    warn  "HTTP request cancelled"
//! ```
//! Each outcome writes exactly one metric sample and one log record with the
//! same status and duration. Errors and panics are passed on unchanged.
//!
//! # Design Decisions
//! - `RequestContext` owns the per-request state; dropping it unfinished is
//!   treated as cancellation, so no exit path goes unrecorded
//! - The duration is measured once and shared by the metric and the log record

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{Request, StatusCode};
use axum::Router;
use futures_util::FutureExt as _;
use opentelemetry::context::FutureExt as _;
use opentelemetry::trace::{SpanKind, Status, TraceContextExt};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::SdkTracerProvider;
use prometheus::Registry;

use crate::config::{validate_config, ConfigError, ObservabilityConfig};
use crate::error::Result;
use crate::fields;
use crate::http::middleware::{hooks, ObservabilityLayer};
use crate::http::request::RequestInfo;
use crate::observability::logging::{Fields, LogSink, LoggerBuilder, StructuredLogger};
use crate::observability::metrics::MetricsCollector;
use crate::observability::propagation::{extract_context, propagated_trace_id};
use crate::observability::trace::{
    self, context_ids, panic_message, record_failure, SpanEnd, SpanOptions, TraceCollector,
};

pub const HTTP_METHOD: &str = "http.method";
pub const HTTP_URL: &str = "http.url";
pub const HTTP_ROUTE: &str = "http.route";
pub const HTTP_STATUS_CODE: &str = "http.status_code";
pub const FUNCTION_NAME: &str = "function.name";

/// Status recorded for requests whose future was dropped before completing.
pub const STATUS_CLIENT_CLOSED: u16 = 499;

const OPERATION_SUCCESS: &str = "success";
const OPERATION_ERROR: &str = "error";

/// The metrics, trace and log collectors of one service.
///
/// Cheap to clone; clones share the collectors.
#[derive(Clone)]
pub struct ObservabilityMiddleware {
    inner: Arc<Inner>,
}

struct Inner {
    config: ObservabilityConfig,
    metrics: MetricsCollector,
    tracing: TraceCollector,
    logger: StructuredLogger,
}

impl fmt::Debug for ObservabilityMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservabilityMiddleware")
            .field("service", &self.inner.config.service_name)
            .field("logger", &self.inner.logger)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ObservabilityMiddleware`] accepting pre-built collaborators.
pub struct ObservabilityMiddlewareBuilder {
    config: ObservabilityConfig,
    registry: Option<Registry>,
    tracer_provider: Option<SdkTracerProvider>,
    logger: Option<StructuredLogger>,
    log_sink: Option<Arc<dyn LogSink>>,
}

impl ObservabilityMiddlewareBuilder {
    /// Register the built-in instruments on `registry` instead of a fresh one.
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Create spans on `provider` instead of building an OTLP pipeline.
    pub fn tracer_provider(mut self, provider: SdkTracerProvider) -> Self {
        self.tracer_provider = Some(provider);
        self
    }

    /// Use `logger` as is. Takes precedence over [`Self::log_sink`].
    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Write log records to `sink` instead of stdout.
    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<ObservabilityMiddleware> {
        let config = self.config;
        validate_config(&config).map_err(ConfigError::Validation)?;

        let metrics = MetricsCollector::with_registry(self.registry.unwrap_or_default(), &config)?;

        let tracing = match self.tracer_provider {
            Some(provider) => TraceCollector::with_provider(provider),
            None => TraceCollector::from_config(&config)?,
        };

        let logger = match (self.logger, self.log_sink) {
            (Some(logger), _) => logger,
            (None, Some(sink)) => LoggerBuilder::from_config(&config).sink(sink).build(),
            (None, None) => StructuredLogger::from_config(&config),
        };

        tracing::info!(
            service = %config.service_name,
            environment = %config.environment,
            version = %config.version,
            "Observability initialized"
        );

        Ok(ObservabilityMiddleware {
            inner: Arc::new(Inner {
                config,
                metrics,
                tracing,
                logger,
            }),
        })
    }
}

impl ObservabilityMiddleware {
    /// Middleware with its own registry, OTLP pipeline and stdout logger.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: ObservabilityConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: ObservabilityConfig) -> ObservabilityMiddlewareBuilder {
        ObservabilityMiddlewareBuilder {
            config,
            registry: None,
            tracer_provider: None,
            logger: None,
            log_sink: None,
        }
    }

    pub fn config(&self) -> &ObservabilityConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.inner.metrics
    }

    pub fn tracing(&self) -> &TraceCollector {
        &self.inner.tracing
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.inner.logger
    }

    /// Start timing `request`, capturing its propagated trace id.
    ///
    /// Falls back to the trace id of the active span when the request carries none.
    pub fn on_request_start<B>(&self, request: &Request<B>) -> RequestContext {
        let trace_id = propagated_trace_id(request.headers())
            .or_else(|| trace::current_ids().map(|ids| ids.trace_id));

        RequestContext {
            middleware: self.clone(),
            info: RequestInfo::from_request(request),
            start: Instant::now(),
            trace_id,
            span: None,
            finished: false,
        }
    }

    /// Record the final status of a request started with [`Self::on_request_start`].
    pub fn on_request_end(&self, ctx: RequestContext, status: StatusCode) {
        ctx.finish(Outcome::Completed(status));
    }

    /// Record a request whose handler failed without producing a response.
    pub fn on_request_failed(&self, ctx: RequestContext, error: impl fmt::Display) {
        ctx.finish(Outcome::Failed(error.to_string()));
    }

    /// Start a SERVER span for `request`, child of its propagated context.
    ///
    /// The span is ended by the returned context, on finish or on drop.
    pub fn start_server_span<B>(&self, request: &Request<B>) -> RequestContext {
        let info = RequestInfo::from_request(request);
        let parent = extract_context(request.headers());

        let options = SpanOptions::new().kind(SpanKind::Server).attributes([
            KeyValue::new(HTTP_METHOD, info.method.clone()),
            KeyValue::new(HTTP_URL, info.url.clone()),
            KeyValue::new(HTTP_ROUTE, info.endpoint.clone()),
        ]);
        let name = format!("{} {}", info.method, info.endpoint);
        let cx = self.tracing().start_span_with_parent(name, options, &parent);

        RequestContext {
            middleware: self.clone(),
            trace_id: context_ids(&cx).map(|ids| ids.trace_id),
            info,
            start: Instant::now(),
            span: Some(cx),
            finished: false,
        }
    }

    /// Run `f` as the named business operation.
    ///
    /// The error is returned unchanged after being recorded; a panic is
    /// recorded and resumed.
    pub fn instrument<T, E, F>(&self, operation: &str, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: fmt::Display,
    {
        let span = self.tracing().span(operation.to_string(), operation_options(operation));
        self.logger().debug(
            &format!("Calling {operation}"),
            fields! { "function" => operation },
        );

        let start = Instant::now();
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(f));
        let elapsed = start.elapsed();

        match outcome {
            Ok(Ok(value)) => {
                self.operation_succeeded(operation, elapsed);
                Ok(value)
            }
            Ok(Err(e)) => {
                span.record_failure(&e);
                self.operation_failed(operation, elapsed, &e.to_string());
                Err(e)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                span.record_failure(&message);
                self.operation_failed(operation, elapsed, &message);
                drop(span);
                std::panic::resume_unwind(payload)
            }
        }
    }

    /// Drive `future` as the named business operation.
    ///
    /// Same recording as [`Self::instrument`]; the span is current only while
    /// the future is polled and ends even if the returned future is dropped.
    pub async fn instrument_async<T, E, Fut>(&self, operation: &str, future: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let cx = self.tracing().start_span_with_parent(
            operation.to_string(),
            operation_options(operation),
            &Context::current(),
        );
        let _end = SpanEnd::new(cx.clone());

        in_context(&cx, || {
            self.logger().debug(
                &format!("Calling {operation}"),
                fields! { "function" => operation },
            )
        });

        let start = Instant::now();
        let outcome = AssertUnwindSafe(future.with_context(cx.clone()))
            .catch_unwind()
            .await;
        let elapsed = start.elapsed();

        match outcome {
            Ok(Ok(value)) => {
                in_context(&cx, || self.operation_succeeded(operation, elapsed));
                Ok(value)
            }
            Ok(Err(e)) => {
                let message = e.to_string();
                record_failure(&cx.span(), message.clone());
                in_context(&cx, || self.operation_failed(operation, elapsed, &message));
                Err(e)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                record_failure(&cx.span(), message.clone());
                in_context(&cx, || self.operation_failed(operation, elapsed, &message));
                std::panic::resume_unwind(payload)
            }
        }
    }

    /// Attach the start/end hooks to every route of `router`.
    pub fn register_hooks<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.layer(axum::middleware::from_fn_with_state(
            self.clone(),
            hooks::observe_request,
        ))
    }

    /// Tower layer wrapping each request in a SERVER span.
    pub fn layer(&self) -> ObservabilityLayer {
        ObservabilityLayer::new(self.clone())
    }

    /// Install [`Self::layer`] on every route of `router`.
    pub fn wrap_router<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.layer(self.layer())
    }

    /// Flush pending spans and stop the trace pipeline.
    pub fn shutdown(&self) -> Result<()> {
        self.tracing().shutdown()?;
        tracing::info!(service = %self.inner.config.service_name, "Observability shut down");
        Ok(())
    }

    fn operation_succeeded(&self, operation: &str, elapsed: Duration) {
        self.metrics().record_business_operation(
            operation,
            OPERATION_SUCCESS,
            Some(elapsed.as_secs_f64()),
        );
        self.logger().debug(
            &format!("{operation} completed"),
            fields! { "function" => operation, "duration_ms" => millis(elapsed) },
        );
    }

    fn operation_failed(&self, operation: &str, elapsed: Duration, error: &str) {
        self.metrics().record_business_operation(
            operation,
            OPERATION_ERROR,
            Some(elapsed.as_secs_f64()),
        );
        self.logger().error(
            &format!("{operation} failed"),
            fields! {
                "function" => operation,
                "error" => error,
                "duration_ms" => millis(elapsed),
            },
        );
    }
}

fn operation_options(operation: &str) -> SpanOptions {
    SpanOptions::new().attribute(KeyValue::new(FUNCTION_NAME, operation.to_string()))
}

fn in_context<R>(cx: &Context, f: impl FnOnce() -> R) -> R {
    let _attached = cx.clone().attach();
    f()
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// How a request left the middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outcome {
    Completed(StatusCode),
    Failed(String),
    Cancelled,
}

impl Outcome {
    fn status_code(&self) -> u16 {
        match self {
            Outcome::Completed(status) => status.as_u16(),
            Outcome::Failed(_) => StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            Outcome::Cancelled => STATUS_CLIENT_CLOSED,
        }
    }
}

/// Per-request state between start and end of instrumentation.
///
/// Dropping it without finishing records the request as cancelled.
pub struct RequestContext {
    middleware: ObservabilityMiddleware,
    info: RequestInfo,
    start: Instant,
    trace_id: Option<String>,
    span: Option<Context>,
    finished: bool,
}

impl RequestContext {
    pub fn method(&self) -> &str {
        &self.info.method
    }

    pub fn endpoint(&self) -> &str {
        &self.info.endpoint
    }

    pub fn request_id(&self) -> &str {
        &self.info.request_id
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Server span context, when started through [`ObservabilityMiddleware::start_server_span`].
    pub fn otel_context(&self) -> Option<&Context> {
        self.span.as_ref()
    }

    pub(crate) fn finish(mut self, outcome: Outcome) {
        self.record(outcome);
        self.finished = true;
    }

    fn record(&self, outcome: Outcome) {
        let elapsed = self.start.elapsed();
        let status = outcome.status_code();

        if let Some(cx) = &self.span {
            let span = cx.span();
            span.set_attribute(KeyValue::new(HTTP_STATUS_CODE, i64::from(status)));
            match &outcome {
                Outcome::Failed(message) => record_failure(&span, message.clone()),
                Outcome::Cancelled => span.set_status(Status::error("request cancelled")),
                Outcome::Completed(code) if code.is_server_error() => {
                    span.set_status(Status::error(format!("HTTP {}", code.as_u16())))
                }
                Outcome::Completed(_) => {}
            }
        }

        self.middleware.metrics().record_http_request(
            &self.info.method,
            &self.info.endpoint,
            status,
            elapsed.as_secs_f64(),
        );

        {
            let _attached = self.span.as_ref().map(|cx| cx.clone().attach());
            self.write_log(outcome, status, elapsed);
        }

        if let Some(cx) = &self.span {
            cx.span().end();
        }
    }

    fn write_log(&self, outcome: Outcome, status: u16, elapsed: Duration) {
        let mut fields: Fields = fields! {
            "method" => &self.info.method,
            "endpoint" => &self.info.endpoint,
            "status_code" => status,
            "duration_ms" => millis(elapsed),
            "request_id" => &self.info.request_id,
        };
        if self.middleware.config().trace_correlation {
            if let Some(trace_id) = &self.trace_id {
                fields.insert("trace_id".into(), trace_id.clone().into());
            }
        }

        let logger = self.middleware.logger();
        match outcome {
            Outcome::Completed(_) => logger.info("HTTP request completed", fields),
            Outcome::Failed(error) => {
                fields.insert("error".into(), error.into());
                logger.error("HTTP request failed", fields);
            }
            Outcome::Cancelled => logger.warning("HTTP request cancelled", fields),
        }
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        if !self.finished {
            self.record(Outcome::Cancelled);
        }
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("info", &self.info)
            .field("trace_id", &self.trace_id)
            .field("elapsed", &self.start.elapsed())
            .finish_non_exhaustive()
    }
}
