//! Startup orchestration.
//!
//! # Responsibilities
//! - Register the configuration with the registry (Load)
//! - Build pools in declaration order, nesting earlier pools by name
//! - Create dynamic pools and register their hostname lookups
//!
//! # Design Decisions
//! - Fail fast: any build error discards the half-built configuration
//! - Pools are built in order, so a nested pool always exists before its parent
//! - Lookups start only on Warm, never here

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::schema::{PoolConfig, UnidirectorConfig};
use crate::dynamic::{AllowList, DynamicOptions, DynamicPool};
use crate::error::{DirectorError, DirectorResult};
use crate::lifecycle::registry::{Event, Registry};
use crate::load_balancer::backend::{Backend, BackendRef};
use crate::load_balancer::Pool;

/// Everything built from one configuration.
#[derive(Debug)]
pub struct Topology {
    config: String,
    pools: Vec<Arc<Pool>>,
    dynamics: Vec<Arc<DynamicPool>>,
}

impl Topology {
    /// Name of the configuration this topology was built from.
    pub fn config(&self) -> &str {
        &self.config
    }

    pub fn pool(&self, name: &str) -> Option<&Arc<Pool>> {
        self.pools.iter().find(|p| p.name() == name)
    }

    /// Pools in declaration order.
    pub fn pools(&self) -> &[Arc<Pool>] {
        &self.pools
    }

    pub fn dynamic(&self, pool: &str) -> Option<&Arc<DynamicPool>> {
        self.dynamics.iter().find(|d| d.name() == pool)
    }

    pub fn dynamics(&self) -> &[Arc<DynamicPool>] {
        &self.dynamics
    }
}

/// Load `config` into `registry` and build its pools.
///
/// On success the configuration is in the `Init` phase with all lookups
/// registered; the caller sends `Warm` to start them.
pub fn build_topology(config: &UnidirectorConfig, registry: &Registry) -> DirectorResult<Topology> {
    registry.on_event(&config.name, Event::Load)?;

    match build_pools(config, registry) {
        Ok(topology) => {
            tracing::info!(
                config = %config.name,
                pools = topology.pools.len(),
                dynamics = topology.dynamics.len(),
                "Topology built"
            );
            Ok(topology)
        }
        Err(err) => {
            tracing::error!(config = %config.name, error = %err, "Topology build failed");
            registry.on_event(&config.name, Event::Discard)?;
            Err(err)
        }
    }
}

fn build_pools(config: &UnidirectorConfig, registry: &Registry) -> DirectorResult<Topology> {
    let mut topology = Topology {
        config: config.name.clone(),
        pools: Vec::with_capacity(config.pools.len()),
        dynamics: Vec::new(),
    };

    for pool_config in &config.pools {
        let pool = Arc::new(Pool::with_strategy(
            pool_config.name.clone(),
            pool_config.strategy.build()?,
        ));
        add_static_members(&pool, pool_config, &topology)?;

        if let Some(dynamic_config) = &pool_config.dynamic {
            let options = DynamicOptions {
                service: dynamic_config.service.clone(),
                initial_weight: dynamic_config.initial_weight,
                max_connections: dynamic_config.max_connections,
                debug: dynamic_config.debug,
            };
            let dynamic = Arc::new(DynamicPool::new(pool.clone(), options)?);
            for lookup in &dynamic_config.lookups {
                let allow = if lookup.allow.is_empty() {
                    None
                } else {
                    Some(AllowList::new(lookup.allow.as_slice())?)
                };
                registry.lookup_hostname(
                    &config.name,
                    dynamic.clone(),
                    &lookup.hostname,
                    allow,
                    lookup.ttl(),
                )?;
            }
            topology.dynamics.push(dynamic);
        }

        topology.pools.push(pool);
    }

    registry.expect_dynamics(&config.name, config.expected_dynamics)?;
    Ok(topology)
}

fn add_static_members(pool: &Pool, config: &PoolConfig, built: &Topology) -> DirectorResult<()> {
    let mut writer = pool.writer();
    for backend in &config.backends {
        let member: BackendRef = match (&backend.address, &backend.pool) {
            (Some(address), _) => {
                let addr: SocketAddr = address
                    .parse()
                    .map_err(|_| DirectorError::InvalidAddress(address.clone()))?;
                Arc::new(Backend::new(backend.name.clone(), addr, backend.max_connections))
            }
            (None, Some(nested)) => built
                .pool(nested)
                .cloned()
                .ok_or_else(|| DirectorError::InvalidAddress(format!("pool {}", nested)))?,
            (None, None) => {
                return Err(DirectorError::InvalidAddress(format!(
                    "backend {} has no target",
                    backend.name
                )))
            }
        };
        writer.add(member, backend.weight)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::lifecycle::registry::Phase;
    use crate::load_balancer::RequestContext;

    const CONFIG: &str = r#"
        name = "startup-test"
        expected_dynamics = 4

        [[pools]]
        name = "leaf"
        strategy = { kind = "round-robin" }
        backends = [
            { name = "a", address = "127.0.0.1:9001" },
            { name = "b", address = "127.0.0.1:9002", weight = 3.0 },
        ]

        [[pools]]
        name = "top"
        strategy = { kind = "fallback" }
        backends = [{ name = "leaf", pool = "leaf" }]
        [pools.dynamic]
        service = "8080"
        lookups = [{ hostname = "top.internal", ttl_secs = 0 }]
    "#;

    #[test]
    fn test_build_topology() {
        let config = parse_config(CONFIG).unwrap();
        let registry = Registry::new();
        let topology = build_topology(&config, &registry).unwrap();

        assert_eq!(topology.config(), "startup-test");
        assert_eq!(registry.phase("startup-test"), Some(Phase::Init));
        assert_eq!(topology.pools().len(), 2);
        assert_eq!(topology.pool("leaf").unwrap().len(), 2);
        assert_eq!(topology.pool("top").unwrap().strategy_name(), "fallback");
        assert_eq!(topology.dynamic("top").unwrap().port(), 8080);
        assert_eq!(registry.lookups("startup-test").len(), 1);
        assert_eq!(registry.stats_cluster("startup-test").unwrap().expected, 4);

        // Requests to the top pool descend into the nested leaf pool.
        let picked = topology
            .pool("top")
            .unwrap()
            .resolve(&RequestContext::new("/"))
            .unwrap();
        assert_eq!(picked.name(), "leaf");

        registry.on_event("startup-test", Event::Discard).unwrap();
    }

    #[test]
    fn test_failed_build_is_discarded() {
        let mut config = parse_config(CONFIG).unwrap();
        config.pools[0].backends[0].address = Some("bogus".into());
        let registry = Registry::new();

        let err = build_topology(&config, &registry).unwrap_err();
        assert!(matches!(err, DirectorError::InvalidAddress(_)));
        assert_eq!(registry.phase("startup-test"), None);
        assert_eq!(registry.load_count(), 0);
    }
}
