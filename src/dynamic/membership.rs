//! Pool membership driven by resolved addresses.
//!
//! # Responsibilities
//! - Own the backends created for resolved addresses
//! - Reconcile a resolution result against the pool (add new, drop stale)
//! - Serve the manual `update_ips` / `add_ip` / `remove_ip` endpoints
//!
//! # Design Decisions
//! - Every reconciliation pass bumps a generation mark; backends not re-marked
//!   during the pass are stale
//! - Known addresses keep their backend object across passes
//! - Stale backends are released only after the pool lock is dropped
//! - Lock order: tracked set (Membership) → pool (Pool)

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use crate::dynamic::acl::AllowList;
use crate::error::{DirectorError, DirectorResult};
use crate::load_balancer::backend::{Backend, BackendRef};
use crate::load_balancer::Pool;
use crate::observability::metrics;
use crate::sync::{LockRank, RankedMutex};

macro_rules! chatter {
    ($dynamic:expr, $($arg:tt)+) => {
        if $dynamic.debug_enabled() {
            tracing::debug!($($arg)+)
        } else {
            tracing::trace!($($arg)+)
        }
    };
}

/// Parameters shared by every backend a dynamic pool creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendTemplate {
    pub pool: String,
    pub port: u16,
    /// 0 = unlimited
    pub max_connections: usize,
}

/// Creates and releases backends for resolved addresses.
///
/// `release` is called exactly once for every backend `create` returned, when
/// its address leaves the pool or the dynamic pool is dropped.
pub trait BackendFactory: Send + Sync + fmt::Debug {
    fn create(&self, template: &BackendTemplate, addr: SocketAddr) -> BackendRef;

    fn release(&self, backend: BackendRef) {
        drop(backend);
    }
}

/// Builds plain [`Backend`]s named `pool(ip)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFactory;

impl BackendFactory for DefaultFactory {
    fn create(&self, template: &BackendTemplate, addr: SocketAddr) -> BackendRef {
        Arc::new(Backend::new(
            format!("{}({})", template.pool, addr.ip()),
            addr,
            template.max_connections,
        ))
    }
}

/// Settings of a dynamic pool.
#[derive(Debug, Clone)]
pub struct DynamicOptions {
    /// Port number or well-known service name.
    pub service: String,
    pub initial_weight: f64,
    pub max_connections: usize,
    pub debug: bool,
}

impl Default for DynamicOptions {
    fn default() -> Self {
        Self {
            service: "http".to_string(),
            initial_weight: 1.0,
            max_connections: 0,
            debug: false,
        }
    }
}

const WELL_KNOWN_SERVICES: &[(&str, u16)] = &[
    ("http", 80),
    ("https", 443),
    ("www", 80),
    ("http-alt", 8080),
    ("webcache", 8080),
    ("https-alt", 8443),
    ("memcache", 11211),
    ("redis", 6379),
    ("postgresql", 5432),
    ("mysql", 3306),
];

/// Resolve a port number or TCP service name.
pub fn parse_service(pool: &str, service: &str) -> DirectorResult<u16> {
    let invalid = || DirectorError::InvalidPort {
        pool: pool.to_string(),
        service: service.to_string(),
    };
    let service = service.trim();
    if service.is_empty() {
        return Err(invalid());
    }
    if let Ok(n) = service.parse::<i64>() {
        return u16::try_from(n).ok().filter(|p| *p > 0).ok_or_else(invalid);
    }
    WELL_KNOWN_SERVICES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(service))
        .map(|(_, port)| *port)
        .ok_or_else(invalid)
}

/// Changes made by one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub added: Vec<SocketAddr>,
    pub removed: Vec<SocketAddr>,
    pub rejected: Vec<SocketAddr>,
}

impl ReconcileOutcome {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

struct TrackedBackend {
    addr: SocketAddr,
    backend: BackendRef,
    mark: u64,
    /// Present in the pool. Stays false while the pool refuses it (full).
    inserted: bool,
    created: SystemTime,
}

#[derive(Default)]
struct Tracked {
    mark: u64,
    backends: Vec<TrackedBackend>,
}

/// A pool whose members come from address resolution.
pub struct DynamicPool {
    pool: Arc<Pool>,
    template: BackendTemplate,
    initial_weight: f64,
    debug: AtomicBool,
    factory: Arc<dyn BackendFactory>,
    tracked: RankedMutex<Tracked>,
}

impl fmt::Debug for DynamicPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicPool")
            .field("pool", &self.pool.name())
            .field("template", &self.template)
            .field("initial_weight", &self.initial_weight)
            .finish()
    }
}

impl DynamicPool {
    pub fn new(pool: Arc<Pool>, options: DynamicOptions) -> DirectorResult<Self> {
        let port = parse_service(pool.name(), &options.service)?;
        if !options.initial_weight.is_finite() || options.initial_weight < 0.0 {
            return Err(DirectorError::InvalidWeight {
                backend: pool.name().to_string(),
                weight: options.initial_weight,
            });
        }
        Ok(Self {
            template: BackendTemplate {
                pool: pool.name().to_string(),
                port,
                max_connections: options.max_connections,
            },
            pool,
            initial_weight: options.initial_weight,
            debug: AtomicBool::new(options.debug),
            factory: Arc::new(DefaultFactory),
            tracked: RankedMutex::new(LockRank::Membership, Tracked::default()),
        })
    }

    /// Use a custom backend factory. Only meaningful before the first address arrives.
    pub fn with_factory(mut self, factory: Arc<dyn BackendFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    pub fn name(&self) -> &str {
        self.pool.name()
    }

    pub fn port(&self) -> u16 {
        self.template.port
    }

    pub fn template(&self) -> &BackendTemplate {
        &self.template
    }

    pub fn set_debug(&self, enable: bool) {
        self.debug.store(enable, Ordering::Relaxed);
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    /// Tracked addresses with their backends, in arrival order.
    pub fn backends(&self) -> Vec<(SocketAddr, BackendRef)> {
        self.tracked
            .lock()
            .backends
            .iter()
            .map(|t| (t.addr, t.backend.clone()))
            .collect()
    }

    /// Make the pool membership match `addrs`.
    ///
    /// Addresses refused by `allow` are logged and skipped; the rest of the
    /// list is still processed.
    pub fn apply(&self, addrs: &[SocketAddr], allow: Option<&AllowList>) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        let mut tracked = self.tracked.lock();
        tracked.mark += 1;
        let mark = tracked.mark;

        for addr in addrs {
            chatter!(self, pool = %self.name(), addr = %addr.ip(), "Resolved address");
            if let Some(acl) = allow {
                if !acl.matches(addr.ip()) {
                    tracing::warn!(pool = %self.name(), addr = %addr.ip(), "Address rejected by allow-list");
                    metrics::record_acl_rejection(self.name());
                    outcome.rejected.push(*addr);
                    continue;
                }
            }
            self.mark_or_create(&mut tracked, *addr, mark);
        }

        let stale = self.sync_pool(&mut tracked, &mut outcome);
        drop(tracked);
        self.release_all(stale);

        metrics::record_dynamic_changes(self.name(), outcome.added.len(), outcome.removed.len());
        if !outcome.is_noop() {
            tracing::info!(
                pool = %self.name(),
                added = outcome.added.len(),
                removed = outcome.removed.len(),
                "Dynamic membership updated"
            );
        }
        outcome
    }

    /// Reconcile against a comma separated list of IP literals.
    ///
    /// Items that are not IP addresses are logged and ignored. An empty list
    /// removes every tracked backend.
    pub fn update_ips(&self, ips: &str) -> ReconcileOutcome {
        let mut addrs = Vec::new();
        for item in ips.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            match parse_ip(item) {
                Some(ip) => addrs.push(SocketAddr::new(ip, self.template.port)),
                None => {
                    tracing::error!(pool = %self.name(), addr = %item, "Ignoring invalid address in update")
                }
            }
        }
        self.apply(&addrs, None)
    }

    /// Add one address with an explicit weight.
    ///
    /// Returns `Ok(false)` when the address is already tracked; it is then only
    /// re-marked for the current generation and its weight is left alone.
    pub fn add_ip(&self, ip: &str, weight: f64) -> DirectorResult<bool> {
        let addr = SocketAddr::new(
            parse_ip(ip).ok_or_else(|| DirectorError::InvalidAddress(ip.to_string()))?,
            self.template.port,
        );
        if !weight.is_finite() || weight < 0.0 {
            return Err(DirectorError::InvalidWeight {
                backend: addr.to_string(),
                weight,
            });
        }

        let mut tracked = self.tracked.lock();
        let mark = tracked.mark;
        if let Some(existing) = tracked.backends.iter_mut().find(|t| t.addr == addr) {
            existing.mark = mark;
            return Ok(false);
        }

        let backend = self.factory.create(&self.template, addr);
        if let Err(err) = self.pool.add_backend(backend.clone(), weight) {
            drop(tracked);
            self.factory.release(backend);
            return Err(err);
        }
        chatter!(self, pool = %self.name(), backend = %backend.name(), "Added backend");
        tracked.backends.push(TrackedBackend {
            addr,
            backend,
            mark,
            inserted: true,
            created: SystemTime::now(),
        });
        drop(tracked);
        metrics::record_dynamic_changes(self.name(), 1, 0);
        Ok(true)
    }

    /// Remove one address. Returns whether it was tracked.
    pub fn remove_ip(&self, ip: &str) -> DirectorResult<bool> {
        let target = parse_ip(ip).ok_or_else(|| DirectorError::InvalidAddress(ip.to_string()))?;
        let addr = SocketAddr::new(target, self.template.port);

        let mut tracked = self.tracked.lock();
        let Some(pos) = tracked.backends.iter().position(|t| t.addr == addr) else {
            return Ok(false);
        };
        let entry = tracked.backends.remove(pos);
        if entry.inserted {
            self.pool.remove_backend(&entry.backend);
        }
        drop(tracked);

        chatter!(self, pool = %self.name(), backend = %entry.backend.name(), "Removed backend");
        metrics::record_dynamic_changes(self.name(), 0, 1);
        self.release_all(vec![entry]);
        Ok(true)
    }

    fn mark_or_create(&self, tracked: &mut Tracked, addr: SocketAddr, mark: u64) {
        if let Some(existing) = tracked.backends.iter_mut().find(|t| t.addr == addr) {
            existing.mark = mark;
            return;
        }
        let backend = self.factory.create(&self.template, addr);
        chatter!(self, pool = %self.name(), backend = %backend.name(), "Created backend");
        tracked.backends.push(TrackedBackend {
            addr,
            backend,
            mark,
            inserted: false,
            created: SystemTime::now(),
        });
    }

    /// Under the pool write lock: drop stale members, insert pending ones.
    /// Returns the stale entries for release once every lock is gone.
    fn sync_pool(&self, tracked: &mut Tracked, outcome: &mut ReconcileOutcome) -> Vec<TrackedBackend> {
        let mark = tracked.mark;
        let (current, stale): (Vec<_>, Vec<_>) =
            tracked.backends.drain(..).partition(|t| t.mark == mark);
        tracked.backends = current;

        let mut writer = self.pool.writer();
        for entry in &stale {
            if entry.inserted {
                writer.remove(&entry.backend);
            }
            chatter!(self, pool = %self.name(), backend = %entry.backend.name(), "Removed stale backend");
            outcome.removed.push(entry.addr);
        }
        for entry in tracked.backends.iter_mut().filter(|t| !t.inserted) {
            match writer.add(entry.backend.clone(), self.initial_weight) {
                Ok(()) => {
                    entry.inserted = true;
                    outcome.added.push(entry.addr);
                }
                Err(err) => {
                    tracing::warn!(pool = %self.name(), addr = %entry.addr, error = %err, "Backend not inserted")
                }
            }
        }
        stale
    }

    fn release_all(&self, entries: Vec<TrackedBackend>) {
        for entry in entries {
            let age = entry.created.elapsed().unwrap_or_default();
            chatter!(self, pool = %self.name(), addr = %entry.addr, age_secs = age.as_secs(), "Releasing backend");
            self.factory.release(entry.backend);
        }
    }
}

impl Drop for DynamicPool {
    fn drop(&mut self) {
        let entries = std::mem::take(&mut self.tracked.lock().backends);
        {
            let mut writer = self.pool.writer();
            for entry in entries.iter().filter(|e| e.inserted) {
                writer.remove(&entry.backend);
            }
        }
        self.release_all(entries);
    }
}

/// IP literal, with or without IPv6 brackets.
fn parse_ip(s: &str) -> Option<IpAddr> {
    let s = s.trim();
    let s = s
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(s);
    s.parse().ok()
}
