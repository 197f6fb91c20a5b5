//! Span lifetime and context tests for the trace collector.

use std::fmt;

use golden_path::observability::trace::{current_ids, SpanOptions};
use golden_path::TraceCollector;
use opentelemetry::trace::{SpanKind, Status};
use opentelemetry::KeyValue;
use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider, SpanData};

mod common;

fn collector() -> (TraceCollector, InMemorySpanExporter) {
    let exporter = InMemorySpanExporter::default();
    let provider = SdkTracerProvider::builder()
        .with_simple_exporter(exporter.clone())
        .build();
    (TraceCollector::with_provider(provider), exporter)
}

fn finished(exporter: &InMemorySpanExporter) -> Vec<SpanData> {
    exporter.get_finished_spans().unwrap()
}

#[derive(Debug)]
struct Boom;

impl fmt::Display for Boom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("boom")
    }
}

#[test]
fn test_guard_sets_current_span_and_ends_on_drop() {
    let (tracing, exporter) = collector();
    assert!(tracing.current_span().is_none());

    {
        let span = tracing.span(
            "work",
            SpanOptions::new()
                .kind(SpanKind::Client)
                .attribute(KeyValue::new("job", "sync")),
        );
        let trace_id = tracing.trace_id().unwrap();
        let span_id = tracing.span_id().unwrap();

        assert_eq!(trace_id.len(), 32);
        assert_eq!(span_id.len(), 16);
        assert!(trace_id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(trace_id, span.trace_id());
        assert_eq!(span_id, span.span_id());
        assert!(finished(&exporter).is_empty());
    }

    assert!(tracing.current_span().is_none());
    let spans = finished(&exporter);
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].name, "work");
    assert_eq!(spans[0].span_kind, SpanKind::Client);
    assert_eq!(common::attribute(&spans[0], "job").as_deref(), Some("sync"));
}

#[test]
fn test_default_kind_is_internal() {
    let (tracing, exporter) = collector();
    drop(tracing.span("plain", SpanOptions::default()));
    assert_eq!(finished(&exporter)[0].span_kind, SpanKind::Internal);
}

#[test]
fn test_nested_spans_share_trace() {
    let (tracing, exporter) = collector();
    {
        let _outer = tracing.span("outer", SpanOptions::new());
        let _inner = tracing.span("inner", SpanOptions::new());
    }

    let spans = finished(&exporter);
    let outer = spans.iter().find(|s| s.name == "outer").unwrap();
    let inner = spans.iter().find(|s| s.name == "inner").unwrap();
    assert_eq!(inner.parent_span_id, outer.span_context.span_id());
    assert_eq!(inner.span_context.trace_id(), outer.span_context.trace_id());
}

#[test]
fn test_in_span_records_error_and_returns_it() {
    let (tracing, exporter) = collector();

    let result: Result<(), Boom> = tracing.in_span("fails", SpanOptions::new(), |_| Err(Boom));
    assert!(result.is_err());

    let spans = finished(&exporter);
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].status, Status::error("boom"));
    assert!(spans[0].events.iter().any(|e| e.name == "exception"));
}

#[test]
fn test_in_span_success_leaves_status_unset() {
    let (tracing, exporter) = collector();

    let value = tracing
        .in_span("ok", SpanOptions::new(), |span| {
            span.add_event("checkpoint", vec![]);
            Ok::<_, Boom>(7)
        })
        .unwrap();

    assert_eq!(value, 7);
    let spans = finished(&exporter);
    assert_eq!(spans[0].status, Status::Unset);
    assert_eq!(spans[0].events.len(), 1);
}

#[test]
fn test_span_ends_when_closure_panics() {
    let (tracing, exporter) = collector();

    let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _span = tracing.span("explodes", SpanOptions::new());
        panic!("kaboom");
    }));

    assert!(caught.is_err());
    let spans = finished(&exporter);
    assert_eq!(spans.len(), 1);
    assert!(matches!(spans[0].status, Status::Error { .. }));
    assert!(current_ids().is_none());
}

#[test]
fn test_add_event_and_attribute_target_active_span() {
    let (tracing, exporter) = collector();
    {
        let _span = tracing.span("annotated", SpanOptions::new());
        tracing.add_event("cache.miss", vec![KeyValue::new("key", "user:1")]);
        tracing.set_attribute(KeyValue::new("user.id", 1_i64));
    }
    // No active span: silently ignored.
    tracing.add_event("orphan", vec![]);

    let spans = finished(&exporter);
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].events.len(), 1);
    assert_eq!(common::attribute(&spans[0], "user.id").as_deref(), Some("1"));
}

#[tokio::test]
async fn test_in_span_async_is_current_while_polled() {
    let (tracing, exporter) = collector();

    let seen = tracing
        .in_span_async("async-op", SpanOptions::new(), async {
            tokio::task::yield_now().await;
            Ok::<_, Boom>(current_ids())
        })
        .await
        .unwrap();

    assert!(current_ids().is_none());
    let spans = finished(&exporter);
    let ids = seen.expect("span current inside future");
    assert_eq!(ids.span_id, spans[0].span_context.span_id().to_string());
}

#[tokio::test]
async fn test_in_span_async_records_error() {
    let (tracing, exporter) = collector();

    let result = tracing
        .in_span_async("async-fail", SpanOptions::new(), async { Err::<(), _>(Boom) })
        .await;

    assert!(result.is_err());
    assert_eq!(finished(&exporter)[0].status, Status::error("boom"));
}

#[tokio::test]
async fn test_cancelled_future_still_ends_span() {
    let (tracing, exporter) = collector();

    let pending = tracing.in_span_async("never", SpanOptions::new(), async {
        std::future::pending::<Result<(), Boom>>().await
    });
    let timed_out = tokio::time::timeout(std::time::Duration::from_millis(10), pending).await;

    assert!(timed_out.is_err());
    assert_eq!(finished(&exporter).len(), 1);
}

#[tokio::test]
async fn test_panicking_future_ends_span_and_resumes() {
    let (tracing, exporter) = collector();
    let tracing_task = tracing.clone();

    let join = tokio::spawn(async move {
        tracing_task
            .in_span_async("panics", SpanOptions::new(), async {
                if true {
                    panic!("async kaboom");
                }
                Ok::<(), Boom>(())
            })
            .await
    })
    .await;

    assert!(join.unwrap_err().is_panic());
    let spans = finished(&exporter);
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].status, Status::error("panicked: async kaboom"));
}

#[tokio::test]
async fn test_concurrent_tasks_see_only_their_own_span() {
    let (tracing, _exporter) = collector();

    let run = |name: &'static str| {
        let tracing = tracing.clone();
        tokio::spawn(async move {
            tracing
                .in_span_async(name, SpanOptions::new(), async {
                    let before = current_ids();
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                    let after = current_ids();
                    Ok::<_, Boom>((before, after))
                })
                .await
        })
    };

    let (a, b) = tokio::join!(run("a"), run("b"));
    let (a_before, a_after) = a.unwrap().unwrap();
    let (b_before, b_after) = b.unwrap().unwrap();

    assert_eq!(a_before, a_after);
    assert_eq!(b_before, b_after);
    assert_ne!(a_before.unwrap().trace_id, b_before.unwrap().trace_id);
}

#[test]
fn test_start_span_with_parent_does_not_attach() {
    let (tracing, exporter) = collector();
    let parent = tracing.span("parent", SpanOptions::new());

    let child = tracing.start_span_with_parent("child", SpanOptions::new(), parent.context());
    assert_eq!(tracing.span_id(), Some(parent.span_id()));

    use opentelemetry::trace::TraceContextExt;
    child.span().end();
    drop(parent);

    let spans = finished(&exporter);
    let child = spans.iter().find(|s| s.name == "child").unwrap();
    let parent = spans.iter().find(|s| s.name == "parent").unwrap();
    assert_eq!(child.parent_span_id, parent.span_context.span_id());
}

#[test]
fn test_force_flush_and_shutdown() {
    let (tracing, _exporter) = collector();
    tracing.force_flush().unwrap();
    tracing.shutdown().unwrap();
}
