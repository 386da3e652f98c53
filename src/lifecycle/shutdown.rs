//! Orderly teardown of a configuration.

use crate::error::DirectorResult;
use crate::lifecycle::registry::{Event, Phase, Registry};
use crate::lifecycle::startup::Topology;

/// Cool a configuration if it is warm, discard it, then drop its pools.
///
/// Discarding removes the registry's lookup entries, so dropping the topology
/// afterwards releases every dynamic backend.
pub fn teardown(registry: &Registry, topology: Topology) -> DirectorResult<()> {
    let config = topology.config().to_string();
    if registry.phase(&config) == Some(Phase::Warm) {
        registry.on_event(&config, Event::Cold)?;
    }
    registry.on_event(&config, Event::Discard)?;
    drop(topology);
    tracing::info!(config = %config, "Shutdown complete");
    Ok(())
}
