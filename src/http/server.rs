//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router with the demo handlers
//! - Wire up middleware (request instrumentation, timeout, panic recovery)
//! - Serve `/metrics` from the shared registry
//! - Bind to a listener and shut down on the coordinator's signal
//!
//! # Design Decisions
//! - Panic recovery sits outside instrumentation so a handler panic is
//!   recorded first and still answered with a 500
//! - The instrumentation shape is chosen at construction, not per route

use std::str::FromStr;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;

use crate::config::ServerConfig;
use crate::fields;
use crate::lifecycle::shutdown;
use crate::observability::ObservabilityMiddleware;

/// How requests are instrumented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MiddlewareShape {
    /// Start/end hooks around each handler.
    #[default]
    Hooks,
    /// A SERVER span wrapping each handler.
    Dispatch,
}

impl FromStr for MiddlewareShape {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hooks" => Ok(Self::Hooks),
            "dispatch" => Ok(Self::Dispatch),
            other => Err(format!("unknown middleware shape `{other}`, expected hooks or dispatch")),
        }
    }
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub observability: ObservabilityMiddleware,
}

/// Instrumented demo HTTP service.
pub struct HttpServer {
    router: Router,
    observability: ObservabilityMiddleware,
}

impl HttpServer {
    pub fn new(
        config: &ServerConfig,
        observability: ObservabilityMiddleware,
        shape: MiddlewareShape,
    ) -> Self {
        let router = Self::build_router(config, observability.clone(), shape);
        Self {
            router,
            observability,
        }
    }

    /// Build the Axum router with all middleware layers.
    pub fn build_router(
        config: &ServerConfig,
        observability: ObservabilityMiddleware,
        shape: MiddlewareShape,
    ) -> Router {
        let routes = Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/orders/{id}", get(order_handler))
            .with_state(AppState {
                observability: observability.clone(),
            })
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                Duration::from_secs(config.request_timeout_secs),
            ));

        let instrumented = match shape {
            MiddlewareShape::Hooks => observability.register_hooks(routes),
            MiddlewareShape::Dispatch => observability.wrap_router(routes),
        };

        instrumented.layer(CatchPanicLayer::new())
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown_rx` fires, then flush traces.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown::wait(shutdown_rx))
            .await?;

        tracing::info!("HTTP server stopped");

        if let Err(e) = self.observability.tracing().force_flush() {
            tracing::warn!(error = %e, "Failed to flush spans on shutdown");
        }
        Ok(())
    }
}

async fn root_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let service = &state.observability.config().service_name;
    Json(json!({ "service": service, "status": "ok" }))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    let metrics = state.observability.metrics();
    match metrics.snapshot() {
        Ok(body) => ([(header::CONTENT_TYPE, metrics.content_type())], body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("order `{0}` not found")]
struct OrderNotFound(String);

/// Looks an order up as an instrumented business operation.
///
/// Ids starting with `missing` are reported as not found.
async fn order_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let observability = &state.observability;
    let lookup = async {
        if id.starts_with("missing") {
            Err(OrderNotFound(id.clone()))
        } else {
            Ok(json!({ "id": id, "status": "shipped" }))
        }
    };

    match observability.instrument_async("lookup_order", lookup).await {
        Ok(order) => {
            observability
                .logger()
                .info("Order served", fields! { "order_id" => &id });
            Json(order).into_response()
        }
        Err(e) => (StatusCode::NOT_FOUND, e.to_string()).into_response(),
    }
}
