//! Wrapped-dispatch request instrumentation as a tower layer.
//!
//! Each request runs inside a SERVER span that is current while the inner
//! service is called and while its future is polled. The metric and log
//! record are written with the span attached, then the span ends.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::task::{Context as TaskContext, Poll};

use axum::http::{Request, Response};
use futures_util::future::BoxFuture;
use futures_util::FutureExt as _;
use opentelemetry::context::FutureExt as _;
use tower::{Layer, Service};

use crate::observability::middleware::Outcome;
use crate::observability::trace::panic_message;
use crate::observability::ObservabilityMiddleware;

/// Layer wrapping every request in a server span.
#[derive(Clone, Debug)]
pub struct ObservabilityLayer {
    observability: ObservabilityMiddleware,
}

impl ObservabilityLayer {
    pub fn new(observability: ObservabilityMiddleware) -> Self {
        Self { observability }
    }
}

impl<S> Layer<S> for ObservabilityLayer {
    type Service = ObservabilityService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ObservabilityService {
            inner,
            observability: self.observability.clone(),
        }
    }
}

/// Service produced by [`ObservabilityLayer`].
#[derive(Clone, Debug)]
pub struct ObservabilityService<S> {
    inner: S,
    observability: ObservabilityMiddleware,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for ObservabilityService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: fmt::Display + Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let ctx = self.observability.start_server_span(&request);
        let span_cx = ctx.otel_context().cloned().unwrap_or_default();

        let future = {
            let _attached = span_cx.clone().attach();
            self.inner.call(request)
        };

        Box::pin(async move {
            match AssertUnwindSafe(future.with_context(span_cx))
                .catch_unwind()
                .await
            {
                Ok(Ok(response)) => {
                    ctx.finish(Outcome::Completed(response.status()));
                    Ok(response)
                }
                Ok(Err(e)) => {
                    ctx.finish(Outcome::Failed(e.to_string()));
                    Err(e)
                }
                Err(payload) => {
                    ctx.finish(Outcome::Failed(panic_message(payload.as_ref())));
                    std::panic::resume_unwind(payload)
                }
            }
        })
    }
}
