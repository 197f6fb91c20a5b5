//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize, env overrides)
//!     → validation.rs (semantic checks)
//!     → ServiceConfig / ObservabilityConfig (validated, immutable)
//!     → handed to the collectors at construction
//! ```
//!
//! # Design Decisions
//! - Every field has a default except `service_name`, which validation requires
//! - Validation separates syntactic (serde) from semantic checks
//! - Standard OpenTelemetry environment variables win over file values

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{apply_env_overrides, apply_env_overrides_from_process, load_config, ConfigError};
pub use schema::{ObservabilityConfig, ServerConfig, ServiceConfig, DEFAULT_HTTP_BUCKETS};
pub use validation::{validate_config, ValidationError};
