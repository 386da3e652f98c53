//! Process-wide state shared by all loaded configurations.
//!
//! # Responsibilities
//! - Count configuration loads; create the metrics namespace on the first, drop it on the last
//! - Hold every configured DNS lookup and start/stop them on warm/cold
//! - Hold the per-configuration stats clusters
//!
//! # Events
//! ```text
//! Load ──▶ (init: lookup_hostname, expect_dynamics) ──Warm──▶ running
//!                                                     ◀─Cold──
//! Cold/Init ──Discard──▶ gone
//! ```
//!
//! The registry mutex is outside the ranked lock hierarchy. It is never taken
//! while a pool lock is held; lookup threads never take it.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

use crate::dynamic::{AddressResolver, AllowList, DnsLookup, DynamicPool, LookupState, SystemResolver};
use crate::error::{DirectorError, DirectorResult};
use crate::lifecycle::instance::ConfigInstance;
use crate::observability::metrics;

/// Host lifecycle event for one configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Load,
    Warm,
    Cold,
    Discard,
}

/// Where a loaded configuration currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Loaded, never warmed. Init-only operations are allowed.
    Init,
    Warm,
    Cold,
}

/// Reserved statistics capacity for the dynamic backends of one configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsCluster {
    pub config: String,
    pub expected: usize,
    pub created: SystemTime,
}

/// Snapshot of one lookup entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupInfo {
    pub config: String,
    pub pool: String,
    pub hostname: String,
    pub ttl: Duration,
    pub state: LookupState,
    pub passes: u64,
}

#[derive(Debug)]
struct Namespace {
    created: SystemTime,
}

#[derive(Debug)]
struct ConfigEntry {
    instance: Arc<ConfigInstance>,
    phase: Phase,
}

#[derive(Debug, Default)]
struct RegistryState {
    load_count: usize,
    namespace: Option<Namespace>,
    configs: Vec<ConfigEntry>,
    lookups: Vec<DnsLookup>,
    clusters: Vec<StatsCluster>,
}

impl RegistryState {
    fn entry(&self, config: &str) -> Option<&ConfigEntry> {
        self.configs.iter().find(|c| c.instance.name() == config)
    }

    fn entry_mut(&mut self, config: &str) -> Option<&mut ConfigEntry> {
        self.configs.iter_mut().find(|c| c.instance.name() == config)
    }

    fn require_init(&self, operation: &'static str, config: &str) -> DirectorResult<()> {
        match self.entry(config) {
            Some(entry) if entry.phase == Phase::Init => Ok(()),
            _ => Err(DirectorError::NotInitializing {
                operation,
                config: config.to_string(),
            }),
        }
    }
}

/// Container for process-wide director state.
pub struct Registry {
    resolver: Arc<dyn AddressResolver>,
    state: Mutex<RegistryState>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Registry")
            .field("load_count", &state.load_count)
            .field("lookups", &state.lookups.len())
            .finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Registry resolving through the operating system.
    pub fn new() -> Self {
        Self::with_resolver(Arc::new(SystemResolver))
    }

    pub fn with_resolver(resolver: Arc<dyn AddressResolver>) -> Self {
        Self {
            resolver,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// The process-wide registry.
    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Registry::new)
    }

    /// Drive a configuration through its lifecycle.
    ///
    /// # Panics
    /// On out-of-order events: loading a name twice, warming a warm
    /// configuration, cooling one that is not warm, discarding a warm one,
    /// or any event for an unknown configuration.
    pub fn on_event(&self, config: &str, event: Event) -> DirectorResult<()> {
        let mut state = self.state.lock();
        match event {
            Event::Load => {
                assert!(state.entry(config).is_none(), "configuration {} loaded twice", config);
                state.load_count += 1;
                if state.load_count == 1 {
                    metrics::describe_metrics();
                    state.namespace = Some(Namespace {
                        created: SystemTime::now(),
                    });
                    tracing::debug!("Director namespace created");
                }
                state.configs.push(ConfigEntry {
                    instance: ConfigInstance::new(config),
                    phase: Phase::Init,
                });
                tracing::info!(config, loads = state.load_count, "Configuration loaded");
                Ok(())
            }
            Event::Warm => {
                let instance = {
                    let entry = state
                        .entry_mut(config)
                        .unwrap_or_else(|| panic!("warm for unknown configuration {}", config));
                    assert_ne!(entry.phase, Phase::Warm, "configuration {} warmed twice", config);
                    entry.phase = Phase::Warm;
                    entry.instance.clone()
                };
                let mut first_error = None;
                for lookup in state.lookups.iter_mut().filter(|l| l.config() == config) {
                    if let Err(err) = lookup.start(instance.acquire("DNS lookup")) {
                        tracing::error!(config, host = %lookup.hostname(), error = %err, "Failed to start lookup");
                        first_error.get_or_insert(err);
                    }
                }
                tracing::info!(config, "Configuration warm");
                first_error.map_or(Ok(()), Err)
            }
            Event::Cold => {
                let entry = state
                    .entry_mut(config)
                    .unwrap_or_else(|| panic!("cold for unknown configuration {}", config));
                assert_eq!(entry.phase, Phase::Warm, "configuration {} cooled while not warm", config);
                entry.phase = Phase::Cold;
                for lookup in state.lookups.iter_mut().filter(|l| l.config() == config) {
                    if lookup.state() == LookupState::Active {
                        lookup.stop();
                    }
                }
                tracing::info!(config, "Configuration cold");
                Ok(())
            }
            Event::Discard => {
                let entry = state
                    .entry(config)
                    .unwrap_or_else(|| panic!("discard for unknown configuration {}", config));
                assert_ne!(entry.phase, Phase::Warm, "configuration {} discarded while warm", config);
                let holders = entry.instance.holders();
                if !holders.is_empty() {
                    return Err(DirectorError::ConfigInUse {
                        config: config.to_string(),
                        holders,
                    });
                }

                state.lookups.retain(|l| {
                    if l.config() != config {
                        return true;
                    }
                    assert_ne!(l.state(), LookupState::Active, "lookup {} still active", l.hostname());
                    false
                });
                state.clusters.retain(|c| c.config != config);
                state.configs.retain(|c| c.instance.name() != config);

                state.load_count -= 1;
                if state.load_count == 0 {
                    if let Some(ns) = state.namespace.take() {
                        tracing::debug!(
                            age_secs = ns.created.elapsed().unwrap_or_default().as_secs(),
                            "Director namespace destroyed"
                        );
                    }
                }
                tracing::info!(config, loads = state.load_count, "Configuration discarded");
                Ok(())
            }
        }
    }

    /// Register a hostname lookup feeding `dynamic`. Only during initialization.
    pub fn lookup_hostname(
        &self,
        config: &str,
        dynamic: Arc<DynamicPool>,
        hostname: &str,
        allow: Option<AllowList>,
        ttl: Duration,
    ) -> DirectorResult<()> {
        let mut state = self.state.lock();
        state.require_init("lookup_hostname", config)?;
        let duplicate = state.lookups.iter().any(|l| {
            l.config() == config && Arc::ptr_eq(l.dynamic(), &dynamic) && l.hostname() == hostname
        });
        if duplicate {
            return Err(DirectorError::DuplicateLookup {
                pool: dynamic.name().to_string(),
                hostname: hostname.to_string(),
            });
        }
        tracing::debug!(config, pool = %dynamic.name(), host = hostname, "Lookup registered");
        state.lookups.push(DnsLookup::new(
            config,
            dynamic,
            hostname,
            allow,
            ttl,
            self.resolver.clone(),
        ));
        Ok(())
    }

    /// Reserve stats capacity for `n` dynamic backends. Only during
    /// initialization; `n < 2` and repeated calls are ignored.
    pub fn expect_dynamics(&self, config: &str, n: usize) -> DirectorResult<()> {
        let mut state = self.state.lock();
        state.require_init("expect_dynamics", config)?;
        if n < 2 || state.clusters.iter().any(|c| c.config == config) {
            return Ok(());
        }
        state.clusters.insert(
            0,
            StatsCluster {
                config: config.to_string(),
                expected: n,
                created: SystemTime::now(),
            },
        );
        Ok(())
    }

    /// Wake every running lookup of `config`. Returns how many were woken.
    pub fn refresh(&self, config: &str) -> usize {
        let state = self.state.lock();
        state
            .lookups
            .iter()
            .filter(|l| l.config() == config)
            .filter(|l| l.refresh())
            .count()
    }

    pub fn phase(&self, config: &str) -> Option<Phase> {
        self.state.lock().entry(config).map(|e| e.phase)
    }

    pub fn config(&self, config: &str) -> Option<Arc<ConfigInstance>> {
        self.state.lock().entry(config).map(|e| e.instance.clone())
    }

    pub fn load_count(&self) -> usize {
        self.state.lock().load_count
    }

    pub fn namespace_active(&self) -> bool {
        self.state.lock().namespace.is_some()
    }

    pub fn stats_cluster(&self, config: &str) -> Option<StatsCluster> {
        self.state
            .lock()
            .clusters
            .iter()
            .find(|c| c.config == config)
            .cloned()
    }

    pub fn lookups(&self, config: &str) -> Vec<LookupInfo> {
        self.state
            .lock()
            .lookups
            .iter()
            .filter(|l| l.config() == config)
            .map(|l| LookupInfo {
                config: l.config().to_string(),
                pool: l.dynamic().name().to_string(),
                hostname: l.hostname().to_string(),
                ttl: l.ttl(),
                state: l.state(),
                passes: l.passes(),
            })
            .collect()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for lookup in state.lookups.iter_mut() {
            if lookup.state() == LookupState::Active {
                tracing::warn!(config = %lookup.config(), host = %lookup.hostname(), "Stopping lookup at teardown");
                lookup.stop();
            }
        }
    }
}
