//! Configuration subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → UnidirectorConfig (validated, immutable)
//!     → lifecycle::startup builds pools and lookups from it
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Validation reports every problem at once

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BackendConfig, DynamicConfig, LookupConfig, ObservabilityConfig, PoolConfig, StrategyConfig,
    UnidirectorConfig,
};
pub use validation::{validate_config, ValidationError};
