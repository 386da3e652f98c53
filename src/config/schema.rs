//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML.
//!
//! ```toml
//! name = "boot"
//! expected_dynamics = 8
//!
//! [[pools]]
//! name = "origin"
//! strategy = { kind = "hash", header = "X-Session" }
//! backends = [
//!     { name = "a", address = "10.0.0.1:80", weight = 1.0 },
//!     { name = "b", address = "10.0.0.2:80", weight = 3.0 },
//! ]
//!
//! [[pools]]
//! name = "api"
//! strategy = { kind = "least-connections", slow_start_secs = 30 }
//! [pools.dynamic]
//! service = "8080"
//! lookups = [{ hostname = "api.internal", allow = ["10.0.0.0/8"], ttl_secs = 10 }]
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DirectorResult;
use crate::load_balancer::Strategy;
use crate::observability::logging::LogFormat;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UnidirectorConfig {
    /// Name of this configuration instance in the lifecycle registry.
    pub name: String,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Number of dynamic backends to reserve stats for (below 2 = none).
    pub expected_dynamics: usize,

    /// Pool definitions, in dependency order.
    pub pools: Vec<PoolConfig>,
}

impl Default for UnidirectorConfig {
    fn default() -> Self {
        Self {
            name: "boot".to_string(),
            observability: ObservabilityConfig::default(),
            expected_dynamics: 0,
            pools: Vec::new(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level or filter directive (trace, debug, info, warn, error).
    pub log_level: String,

    /// `pretty` or `json`.
    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// One pool.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Unique pool identifier.
    pub name: String,

    #[serde(default)]
    pub strategy: StrategyConfig,

    /// Static members.
    #[serde(default)]
    pub backends: Vec<BackendConfig>,

    /// DNS-driven members.
    #[serde(default)]
    pub dynamic: Option<DynamicConfig>,
}

/// Selection strategy and its parameters.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StrategyConfig {
    Random {
        #[serde(default = "default_choices")]
        choices: usize,
    },
    RoundRobin,
    LeastConnections {
        #[serde(default)]
        slow_start_secs: f64,
    },
    Hash {
        #[serde(default)]
        header: Option<String>,
    },
    Fallback {
        #[serde(default)]
        sticky: bool,
    },
}

fn default_choices() -> usize {
    1
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig::Random { choices: 1 }
    }
}

impl StrategyConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            StrategyConfig::Random { .. } => "random",
            StrategyConfig::RoundRobin => "round-robin",
            StrategyConfig::LeastConnections { .. } => "least-connections",
            StrategyConfig::Hash { .. } => "hash",
            StrategyConfig::Fallback { .. } => "fallback",
        }
    }

    /// Instantiate the strategy.
    pub fn build(&self) -> DirectorResult<Strategy> {
        Ok(match self {
            StrategyConfig::Random { choices } => Strategy::random_choices(*choices)?,
            StrategyConfig::RoundRobin => Strategy::round_robin(),
            StrategyConfig::LeastConnections { slow_start_secs } => {
                Strategy::least_connections(Duration::try_from_secs_f64(*slow_start_secs).unwrap_or_default())
            }
            StrategyConfig::Hash { header } => Strategy::hash(header.clone()),
            StrategyConfig::Fallback { sticky } => Strategy::fallback(*sticky),
        })
    }
}

/// Static pool member: a server address, or an earlier pool by name.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Backend identifier, shown in reports.
    pub name: String,

    /// Server address (e.g., "127.0.0.1:3000").
    #[serde(default)]
    pub address: Option<String>,

    /// Name of a previously declared pool to nest.
    #[serde(default)]
    pub pool: Option<String>,

    #[serde(default = "default_weight")]
    pub weight: f64,

    /// Maximum concurrent connections (0 = unlimited).
    #[serde(default)]
    pub max_connections: usize,
}

fn default_weight() -> f64 {
    1.0
}

/// DNS-driven membership of a pool.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DynamicConfig {
    /// Port number or service name for created backends.
    pub service: String,

    /// Weight given to every discovered backend.
    pub initial_weight: f64,

    /// Connection cap of created backends (0 = unlimited).
    pub max_connections: usize,

    /// Log membership chatter at debug instead of trace.
    pub debug: bool,

    pub lookups: Vec<LookupConfig>,
}

impl Default for DynamicConfig {
    fn default() -> Self {
        Self {
            service: "http".to_string(),
            initial_weight: 1.0,
            max_connections: 0,
            debug: false,
            lookups: Vec::new(),
        }
    }
}

/// One hostname to resolve periodically.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LookupConfig {
    pub hostname: String,

    /// Allowed networks; empty means no filtering.
    #[serde(default)]
    pub allow: Vec<String>,

    /// Refresh interval. 0 resolves once.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: f64,
}

fn default_ttl_secs() -> f64 {
    10.0
}

impl LookupConfig {
    pub fn ttl(&self) -> Duration {
        Duration::try_from_secs_f64(self.ttl_secs).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_defaults() {
        let config: UnidirectorConfig = toml::from_str("").unwrap();
        assert_eq!(config.name, "boot");
        assert_eq!(config.observability.log_level, "info");
        assert!(config.pools.is_empty());
    }

    #[test]
    fn test_full_pool_parses() {
        let config: UnidirectorConfig = toml::from_str(
            r#"
            [[pools]]
            name = "origin"
            strategy = { kind = "hash", header = "X-Session" }
            backends = [{ name = "a", address = "10.0.0.1:80" }]

            [[pools]]
            name = "api"
            strategy = { kind = "least-connections", slow_start_secs = 30 }
            [pools.dynamic]
            service = "8080"
            lookups = [{ hostname = "api.internal", allow = ["10.0.0.0/8"] }]
            "#,
        )
        .unwrap();

        let origin = &config.pools[0];
        assert_eq!(
            origin.strategy,
            StrategyConfig::Hash {
                header: Some("X-Session".into())
            }
        );
        assert_eq!(origin.backends[0].weight, 1.0);

        let dynamic = config.pools[1].dynamic.as_ref().unwrap();
        assert_eq!(dynamic.initial_weight, 1.0);
        assert_eq!(dynamic.lookups[0].ttl(), Duration::from_secs(10));
        assert_eq!(config.pools[1].strategy.kind(), "least-connections");
    }

    #[test]
    fn test_strategy_build() {
        let s = StrategyConfig::Fallback { sticky: true }.build().unwrap();
        assert_eq!(s.name(), "fallback");
        assert!(StrategyConfig::Random { choices: 0 }.build().is_err());
        assert_eq!(StrategyConfig::default().build().unwrap().name(), "random");
    }
}
