//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (nested pools reference earlier pools)
//! - Validate value ranges (weights, ports, ttl, strategy parameters)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: UnidirectorConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::schema::{PoolConfig, StrategyConfig, UnidirectorConfig};
use crate::dynamic::{parse_service, AllowList};
use crate::load_balancer::MAX_BACKENDS;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("pool name must not be empty")]
    EmptyPoolName,

    #[error("duplicate pool {0}")]
    DuplicatePool(String),

    #[error("pool {pool}: backend {backend} needs exactly one of address or pool")]
    BackendTarget { pool: String, backend: String },

    #[error("pool {pool}: backend {backend} has invalid address {address:?}")]
    InvalidAddress {
        pool: String,
        backend: String,
        address: String,
    },

    #[error("pool {pool}: {reference} is not a previously declared pool")]
    UnknownPool { pool: String, reference: String },

    #[error("pool {pool}: backend {backend} has invalid weight {weight}")]
    InvalidWeight {
        pool: String,
        backend: String,
        weight: f64,
    },

    #[error("pool {pool}: {count} static backends exceed the limit of {limit}")]
    TooManyBackends {
        pool: String,
        count: usize,
        limit: usize,
    },

    #[error("pool {pool}: invalid {strategy} strategy: {reason}")]
    InvalidStrategy {
        pool: String,
        strategy: &'static str,
        reason: String,
    },

    #[error("pool {pool}: invalid dynamic port {service:?}")]
    InvalidPort { pool: String, service: String },

    #[error("pool {pool}: invalid allow-list entry {entry:?}")]
    InvalidNetwork { pool: String, entry: String },

    #[error("pool {pool}: lookup {hostname:?} is invalid: {reason}")]
    InvalidLookup {
        pool: String,
        hostname: String,
        reason: &'static str,
    },

    #[error("invalid log level {0:?}")]
    InvalidLogLevel(String),
}

/// Check `config`, collecting every problem found.
pub fn validate_config(config: &UnidirectorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if EnvFilter::try_new(&config.observability.log_level).is_err() {
        errors.push(ValidationError::InvalidLogLevel(
            config.observability.log_level.clone(),
        ));
    }

    let mut declared: HashSet<&str> = HashSet::new();
    for pool in &config.pools {
        if pool.name.trim().is_empty() {
            errors.push(ValidationError::EmptyPoolName);
        } else if declared.contains(pool.name.as_str()) {
            errors.push(ValidationError::DuplicatePool(pool.name.clone()));
        }
        validate_pool(pool, &declared, &mut errors);
        declared.insert(pool.name.as_str());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_pool(pool: &PoolConfig, declared: &HashSet<&str>, errors: &mut Vec<ValidationError>) {
    let name = || pool.name.clone();

    match &pool.strategy {
        StrategyConfig::Random { choices } if *choices == 0 => {
            errors.push(ValidationError::InvalidStrategy {
                pool: name(),
                strategy: "random",
                reason: "choices must be at least 1".into(),
            });
        }
        StrategyConfig::LeastConnections { slow_start_secs } if !is_duration(*slow_start_secs) =>
        {
            errors.push(ValidationError::InvalidStrategy {
                pool: name(),
                strategy: "least-connections",
                reason: format!("slow_start_secs {} out of range", slow_start_secs),
            });
        }
        _ => {}
    }

    if pool.backends.len() > MAX_BACKENDS {
        errors.push(ValidationError::TooManyBackends {
            pool: name(),
            count: pool.backends.len(),
            limit: MAX_BACKENDS,
        });
    }

    for backend in &pool.backends {
        if !backend.weight.is_finite() || backend.weight < 0.0 {
            errors.push(ValidationError::InvalidWeight {
                pool: name(),
                backend: backend.name.clone(),
                weight: backend.weight,
            });
        }
        match (&backend.address, &backend.pool) {
            (Some(address), None) => {
                if address.parse::<SocketAddr>().is_err() {
                    errors.push(ValidationError::InvalidAddress {
                        pool: name(),
                        backend: backend.name.clone(),
                        address: address.clone(),
                    });
                }
            }
            (None, Some(reference)) => {
                if !declared.contains(reference.as_str()) {
                    errors.push(ValidationError::UnknownPool {
                        pool: name(),
                        reference: reference.clone(),
                    });
                }
            }
            _ => errors.push(ValidationError::BackendTarget {
                pool: name(),
                backend: backend.name.clone(),
            }),
        }
    }

    let Some(dynamic) = &pool.dynamic else {
        return;
    };
    if parse_service(&pool.name, &dynamic.service).is_err() {
        errors.push(ValidationError::InvalidPort {
            pool: name(),
            service: dynamic.service.clone(),
        });
    }
    if !dynamic.initial_weight.is_finite() || dynamic.initial_weight < 0.0 {
        errors.push(ValidationError::InvalidWeight {
            pool: name(),
            backend: "dynamic".into(),
            weight: dynamic.initial_weight,
        });
    }

    let mut hostnames = HashSet::new();
    for lookup in &dynamic.lookups {
        let invalid = |reason| ValidationError::InvalidLookup {
            pool: name(),
            hostname: lookup.hostname.clone(),
            reason,
        };
        if lookup.hostname.trim().is_empty() {
            errors.push(invalid("empty hostname"));
        }
        if !hostnames.insert(lookup.hostname.as_str()) {
            errors.push(invalid("duplicate hostname"));
        }
        if !is_duration(lookup.ttl_secs) {
            errors.push(invalid("ttl_secs out of range"));
        }
        for entry in &lookup.allow {
            if AllowList::new(&[entry]).is_err() {
                errors.push(ValidationError::InvalidNetwork {
                    pool: name(),
                    entry: entry.clone(),
                });
            }
        }
    }
}

/// Seconds that convert to a `Duration`: finite, non-negative, in range.
fn is_duration(secs: f64) -> bool {
    Duration::try_from_secs_f64(secs).is_ok()
}
