//! W3C Trace Context propagation over HTTP headers.
//!
//! Inbound requests carry `traceparent`/`tracestate`; the extracted context
//! becomes the parent of the server span. Outbound calls get the active
//! context injected the same way.

use axum::http::header::{HeaderName, HeaderValue};
use axum::http::HeaderMap;
use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::TraceContextExt;
use opentelemetry::Context;
use opentelemetry_sdk::propagation::TraceContextPropagator;

/// Header carrying the W3C trace parent.
pub const TRACEPARENT: &str = "traceparent";

/// Read side of a `HeaderMap`. Non-UTF-8 values are skipped.
struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

/// Write side of a `HeaderMap`. Invalid names or values are dropped.
struct HeaderInjector<'a>(&'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            self.0.insert(name, value);
        }
    }
}

/// Context carried by `headers`.
///
/// Without a valid `traceparent` this is the caller's current context, so an
/// ambient span stays the parent.
pub fn extract_context(headers: &HeaderMap) -> Context {
    TraceContextPropagator::new().extract(&HeaderExtractor(headers))
}

/// Write the span held by `cx` into `headers`. No-op without a valid span.
pub fn inject_context(cx: &Context, headers: &mut HeaderMap) {
    TraceContextPropagator::new().inject_context(cx, &mut HeaderInjector(headers));
}

/// Trace id of a valid inbound `traceparent`, as 32 hex chars.
///
/// Only the headers are consulted, never the active span.
pub fn propagated_trace_id(headers: &HeaderMap) -> Option<String> {
    let cx = TraceContextPropagator::new()
        .extract_with_context(&Context::new(), &HeaderExtractor(headers));
    let sc = cx.span().span_context().clone();
    sc.is_valid().then(|| sc.trace_id().to_string())
}
