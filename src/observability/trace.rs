//! Distributed tracing support.
//!
//! # Responsibilities
//! - Own the tracer provider and its OTLP export pipeline
//! - Create spans with scoped lifetimes (guard, closure, future)
//! - Expose the active span and its identifiers
//!
//! # Design Decisions
//! - The active span is the OpenTelemetry `Context`: thread-local for guards,
//!   attached per poll for futures, never shared global state
//! - Every started span is ended exactly once, including on error, panic and
//!   future cancellation
//! - Export is batched on the SDK's background worker; nothing here blocks on
//!   network delivery

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt as _;
use opentelemetry::context::FutureExt as _;
use opentelemetry::trace::{
    SpanContext, SpanKind, SpanRef, Status, TraceContextExt, Tracer, TracerProvider as _,
};
use opentelemetry::{Context, ContextGuard, KeyValue};
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use opentelemetry_semantic_conventions::resource::SERVICE_VERSION;

use crate::config::{validate_config, ConfigError, ObservabilityConfig};
use crate::error::Result;

/// Instrumentation scope name of every span created here.
pub const TRACER_NAME: &str = "golden-path";

/// Resource attribute carrying the deployment environment.
pub const SERVICE_ENVIRONMENT: &str = "service.environment";

/// Identifiers of a span, as fixed-width lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanIds {
    /// 32 hex chars.
    pub trace_id: String,
    /// 16 hex chars.
    pub span_id: String,
}

impl SpanIds {
    fn from_span_context(sc: &SpanContext) -> Option<Self> {
        sc.is_valid().then(|| SpanIds {
            trace_id: sc.trace_id().to_string(),
            span_id: sc.span_id().to_string(),
        })
    }
}

/// Ids of the span active in the calling context, if any.
pub fn current_ids() -> Option<SpanIds> {
    let cx = Context::current();
    SpanIds::from_span_context(cx.span().span_context())
}

/// Ids of the span held by `cx`, if any.
pub fn context_ids(cx: &Context) -> Option<SpanIds> {
    SpanIds::from_span_context(cx.span().span_context())
}

/// Attributes and kind for a new span.
#[derive(Debug, Clone)]
pub struct SpanOptions {
    pub attributes: Vec<KeyValue>,
    pub kind: SpanKind,
}

impl Default for SpanOptions {
    fn default() -> Self {
        Self {
            attributes: Vec::new(),
            kind: SpanKind::Internal,
        }
    }
}

impl SpanOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn attribute(mut self, attribute: KeyValue) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn attributes(mut self, attributes: impl IntoIterator<Item = KeyValue>) -> Self {
        self.attributes.extend(attributes);
        self
    }
}

/// Record a failure on `span`: an `exception` event plus ERROR status.
pub(crate) fn record_failure(span: &SpanRef<'_>, message: String) {
    span.add_event(
        "exception",
        vec![KeyValue::new("exception.message", message.clone())],
    );
    span.set_status(Status::error(message));
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

/// Ends the span held by a context when dropped.
///
/// Used across `.await` points, where a thread-local guard cannot live.
pub(crate) struct SpanEnd {
    cx: Context,
}

impl SpanEnd {
    pub(crate) fn new(cx: Context) -> Self {
        Self { cx }
    }
}

impl Drop for SpanEnd {
    fn drop(&mut self) {
        self.cx.span().end();
    }
}

/// A span made current on this thread for the guard's lifetime.
///
/// Dropping the guard ends the span and restores the previous context. If the
/// thread is unwinding, the panic is recorded on the span first.
pub struct ActiveSpan {
    cx: Context,
    _attached: ContextGuard,
}

impl ActiveSpan {
    fn enter(cx: Context) -> Self {
        let attached = cx.clone().attach();
        Self {
            cx,
            _attached: attached,
        }
    }

    pub fn context(&self) -> &Context {
        &self.cx
    }

    pub fn span_context(&self) -> SpanContext {
        self.cx.span().span_context().clone()
    }

    pub fn trace_id(&self) -> String {
        self.cx.span().span_context().trace_id().to_string()
    }

    pub fn span_id(&self) -> String {
        self.cx.span().span_context().span_id().to_string()
    }

    pub fn set_attribute(&self, attribute: KeyValue) {
        self.cx.span().set_attribute(attribute);
    }

    pub fn add_event(&self, name: impl Into<Cow<'static, str>>, attributes: Vec<KeyValue>) {
        self.cx.span().add_event(name, attributes);
    }

    /// Mark the span failed with `error` as the exception message.
    pub fn record_failure(&self, error: impl fmt::Display) {
        record_failure(&self.cx.span(), error.to_string());
    }
}

impl Drop for ActiveSpan {
    fn drop(&mut self) {
        let span = self.cx.span();
        if std::thread::panicking() {
            record_failure(&span, "panicked".to_string());
        }
        span.end();
    }
}

impl fmt::Debug for ActiveSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveSpan")
            .field("span_context", self.cx.span().span_context())
            .finish()
    }
}

/// Creates spans on an owned tracer and hands them to the export pipeline.
#[derive(Clone, Debug)]
pub struct TraceCollector {
    provider: SdkTracerProvider,
    tracer: SdkTracer,
}

impl TraceCollector {
    /// Collector exporting over OTLP/gRPC to `config.otlp_endpoint`.
    ///
    /// Must be called from within a Tokio runtime; the gRPC channel is driven by it.
    pub fn from_config(config: &ObservabilityConfig) -> Result<Self> {
        validate_config(config).map_err(ConfigError::Validation)?;

        let exporter = SpanExporter::builder()
            .with_tonic()
            .with_endpoint(config.otlp_endpoint.clone())
            .with_timeout(Duration::from_secs(config.export_timeout_secs))
            .build()?;

        let provider = SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(resource(config))
            .build();

        tracing::debug!(
            endpoint = %config.otlp_endpoint,
            service = %config.service_name,
            "OTLP trace pipeline initialized"
        );

        Ok(Self::with_provider(provider))
    }

    /// Collector on an externally configured provider.
    pub fn with_provider(provider: SdkTracerProvider) -> Self {
        let tracer = provider.tracer(TRACER_NAME);
        Self { provider, tracer }
    }

    pub fn tracer(&self) -> &SdkTracer {
        &self.tracer
    }

    pub fn provider(&self) -> &SdkTracerProvider {
        &self.provider
    }

    /// Start a span as a child of `parent` without making it current.
    ///
    /// The caller owns ending it, e.g. through a [`SpanEnd`] guard.
    pub fn start_span_with_parent(
        &self,
        name: impl Into<Cow<'static, str>>,
        options: SpanOptions,
        parent: &Context,
    ) -> Context {
        let span = self
            .tracer
            .span_builder(name)
            .with_kind(options.kind)
            .with_attributes(options.attributes)
            .start_with_context(&self.tracer, parent);
        parent.with_span(span)
    }

    /// Start a span under the ambient context and make it current on this thread.
    pub fn span(&self, name: impl Into<Cow<'static, str>>, options: SpanOptions) -> ActiveSpan {
        let cx = self.start_span_with_parent(name, options, &Context::current());
        ActiveSpan::enter(cx)
    }

    /// Run `f` inside a span. An `Err` is recorded on the span and returned unchanged.
    pub fn in_span<T, E, F>(
        &self,
        name: impl Into<Cow<'static, str>>,
        options: SpanOptions,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&ActiveSpan) -> Result<T, E>,
        E: fmt::Display,
    {
        let active = self.span(name, options);
        let result = f(&active);
        if let Err(e) = &result {
            active.record_failure(e);
        }
        result
    }

    /// Drive `future` inside a span that is current only while it is polled.
    ///
    /// An `Err` or a panic is recorded on the span; the error is returned and
    /// the panic resumed unchanged. Dropping the returned future ends the span.
    pub async fn in_span_async<T, E, Fut>(
        &self,
        name: impl Into<Cow<'static, str>>,
        options: SpanOptions,
        future: Fut,
    ) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let cx = self.start_span_with_parent(name, options, &Context::current());
        let _end = SpanEnd::new(cx.clone());

        match AssertUnwindSafe(future.with_context(cx.clone()))
            .catch_unwind()
            .await
        {
            Ok(result) => {
                if let Err(e) = &result {
                    record_failure(&cx.span(), e.to_string());
                }
                result
            }
            Err(payload) => {
                record_failure(&cx.span(), panic_message(payload.as_ref()));
                std::panic::resume_unwind(payload)
            }
        }
    }

    /// Span context of the active span, if any.
    pub fn current_span(&self) -> Option<SpanContext> {
        let cx = Context::current();
        let sc = cx.span().span_context().clone();
        sc.is_valid().then_some(sc)
    }

    /// Trace id of the active span, as 32 hex chars.
    pub fn trace_id(&self) -> Option<String> {
        current_ids().map(|ids| ids.trace_id)
    }

    /// Span id of the active span, as 16 hex chars.
    pub fn span_id(&self) -> Option<String> {
        current_ids().map(|ids| ids.span_id)
    }

    /// Add an event to the active span. No-op without one.
    pub fn add_event(&self, name: impl Into<Cow<'static, str>>, attributes: Vec<KeyValue>) {
        Context::current().span().add_event(name, attributes);
    }

    /// Set an attribute on the active span. No-op without one.
    pub fn set_attribute(&self, attribute: KeyValue) {
        Context::current().span().set_attribute(attribute);
    }

    /// Export every span ended so far.
    pub fn force_flush(&self) -> Result<()> {
        self.provider.force_flush()?;
        Ok(())
    }

    /// Flush and stop the export pipeline. Spans started afterwards are dropped.
    pub fn shutdown(&self) -> Result<()> {
        self.provider.shutdown()?;
        Ok(())
    }
}

fn resource(config: &ObservabilityConfig) -> Resource {
    Resource::builder()
        .with_service_name(config.service_name.clone())
        .with_attributes([
            KeyValue::new(SERVICE_VERSION, config.version.clone()),
            KeyValue::new(SERVICE_ENVIRONMENT, config.environment.clone()),
        ])
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_ids_without_span() {
        assert_eq!(current_ids(), None);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "panicked: boom");

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "panicked: bang");

        let payload: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "panicked");
    }

    #[test]
    fn test_span_options_builder() {
        let options = SpanOptions::new()
            .kind(SpanKind::Client)
            .attribute(KeyValue::new("a", 1))
            .attributes([KeyValue::new("b", "x")]);
        assert_eq!(options.kind, SpanKind::Client);
        assert_eq!(options.attributes.len(), 2);
    }

    #[test]
    fn test_from_config_rejects_invalid_endpoint() {
        let config = ObservabilityConfig {
            otlp_endpoint: "not a url".into(),
            ..ObservabilityConfig::new("svc")
        };
        let err = TraceCollector::from_config(&config).unwrap_err();
        assert!(matches!(err, crate::ObservabilityError::Config(_)));
    }
}
