//! HTTP integration subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, demo routes, panic recovery)
//!     → middleware/ (hooks or dispatch instrumentation)
//!     → request.rs (method, route template, request ID)
//!     → handler
//! ```

pub mod middleware;
pub mod request;
pub mod server;

pub use middleware::{ObservabilityLayer, ObservabilityService};
pub use request::{RequestInfo, UNMATCHED_ENDPOINT, X_REQUEST_ID};
pub use server::{HttpServer, MiddlewareShape};
