//! Pre/post-hook request instrumentation.
//!
//! `on_request_start` runs before the handler, `on_request_end` after it with
//! the status of the response actually produced. A panic in the handler is
//! recorded as a failed request before it continues unwinding.

use std::panic::AssertUnwindSafe;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use futures_util::FutureExt as _;

use crate::observability::trace::panic_message;
use crate::observability::ObservabilityMiddleware;

/// `axum::middleware::from_fn_with_state` adapter around the request hooks.
pub async fn observe_request(
    State(observability): State<ObservabilityMiddleware>,
    request: Request,
    next: Next,
) -> Response {
    let ctx = observability.on_request_start(&request);

    match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => {
            observability.on_request_end(ctx, response.status());
            response
        }
        Err(payload) => {
            observability.on_request_failed(ctx, panic_message(payload.as_ref()));
            std::panic::resume_unwind(payload)
        }
    }
}
