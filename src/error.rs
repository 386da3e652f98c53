//! Error taxonomy for pool administration.
//!
//! Everything here is a recoverable configuration-time failure. A pool that
//! has no usable backend at selection time is not an error (`resolve` returns
//! `None`), and broken internal contracts (lock ordering, freeing a running
//! lookup) panic instead of being reported.

use thiserror::Error;

/// Errors returned by pool, strategy and dynamic-membership administration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DirectorError {
    /// The pool already holds the maximum number of members.
    #[error("pool {pool} is full ({limit} backends)")]
    MemberLimit { pool: String, limit: usize },

    /// Weights must be finite and non-negative.
    #[error("invalid weight {weight} for backend {backend}")]
    InvalidWeight { backend: String, weight: f64 },

    /// `set_strategy` on a pool that already has one.
    #[error("pool {0} already has a selection strategy")]
    StrategyAlreadySet(String),

    /// A strategy parameter is out of range.
    #[error("invalid {strategy} parameter: {reason}")]
    InvalidStrategy { strategy: &'static str, reason: String },

    /// Port or service name for dynamic backends could not be resolved.
    #[error("invalid dynamic port {service:?} for {pool}")]
    InvalidPort { pool: String, service: String },

    /// A literal IP address could not be parsed.
    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    /// An allow-list entry is not a valid network.
    #[error("invalid allow-list entry {0:?}")]
    InvalidNetwork(String),

    /// Operation only permitted while the configuration is initializing.
    #[error("{operation} is only allowed during initialization ({config})")]
    NotInitializing { operation: &'static str, config: String },

    /// The same hostname was registered twice for one pool.
    #[error("hostname {hostname} is already looked up for {pool}")]
    DuplicateLookup { pool: String, hostname: String },

    /// A configuration cannot be discarded while something still holds it.
    #[error("configuration {config} is still referenced by {holders:?}")]
    ConfigInUse { config: String, holders: Vec<String> },

    /// The background resolution thread could not be spawned.
    #[error("failed to spawn lookup thread for {hostname}: {reason}")]
    Spawn { hostname: String, reason: String },
}

/// Result type for director operations.
pub type DirectorResult<T> = Result<T, DirectorError>;
