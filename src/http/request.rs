//! Request metadata used for instrumentation.
//!
//! # Responsibilities
//! - Resolve the low-cardinality endpoint label (route template, not raw path)
//! - Reuse the caller's request ID or generate one (UUID v4)
//!
//! # Design Decisions
//! - Endpoint comes from axum's `MatchedPath` so `/orders/42` and `/orders/43`
//!   share one label; unrouted requests all share [`UNMATCHED_ENDPOINT`]
//! - Extraction never fails: missing or non-UTF-8 headers degrade to defaults

use axum::extract::MatchedPath;
use axum::http::Request;
use uuid::Uuid;

/// Header carrying the request ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Endpoint label of requests that matched no route.
pub const UNMATCHED_ENDPOINT: &str = "unmatched";

/// What the instrumentation needs to know about one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub method: String,
    /// Route template when routed, else [`UNMATCHED_ENDPOINT`].
    pub endpoint: String,
    pub url: String,
    pub request_id: String,
}

impl RequestInfo {
    pub fn from_request<B>(request: &Request<B>) -> Self {
        let endpoint = request
            .extensions()
            .get::<MatchedPath>()
            .map(MatchedPath::as_str)
            .unwrap_or(UNMATCHED_ENDPOINT)
            .to_string();

        Self {
            method: request.method().to_string(),
            endpoint,
            url: request.uri().to_string(),
            request_id: request_id(request),
        }
    }
}

fn request_id<B>(request: &Request<B>) -> String {
    request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}
