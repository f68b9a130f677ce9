//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ClientConfig (validated, immutable)
//!     → copied into each HttpClient at construction
//! ```
//!
//! # Design Decisions
//! - Config is immutable once a client is built; a new config means a new client
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{ClientConfig, HttpVersion, ObservabilityConfig, PoolConfig, ProxyOptions, ProxyType};
pub use validation::{validate_config, ValidationError};
