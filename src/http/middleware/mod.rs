//! Request instrumentation middleware.
//!
//! Two ways to attach the same recording to a router:
//! - `hooks`: start/end hooks around the handler, no span of its own
//! - `dispatch`: a tower layer wrapping the handler in a SERVER span

pub mod dispatch;
pub mod hooks;

pub use dispatch::{ObservabilityLayer, ObservabilityService};
pub use hooks::observe_request;
