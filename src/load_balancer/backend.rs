//! Backend abstraction.
//!
//! # Responsibilities
//! - Define the capability set the pool consumes from a backend handle
//! - Provide a concrete backend for dynamically discovered servers
//! - Hold the host-reported connection count (the load figure for least-connections)
//! - Hold health state and the time of the last health change

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Shared handle to anything a pool can select.
pub type BackendRef = Arc<dyn BackendHandle>;

/// Result of a health query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Health {
    pub healthy: bool,
    /// Last time the health state flipped. `UNIX_EPOCH` when unknown.
    pub changed: SystemTime,
}

/// Result of a load query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Uptime {
    pub healthy: bool,
    /// Serving since (last health change).
    pub changed: SystemTime,
    /// Instantaneous load, usually the number of in-flight connections.
    pub load: f64,
}

/// Capabilities a pool member exposes to selection.
///
/// Implementations are called while the pool's read lock is held, so they must
/// be quick and must not block on anything that could wait for the pool.
pub trait BackendHandle: Send + Sync + fmt::Debug {
    /// Display name, unique within a pool report.
    fn name(&self) -> &str;

    /// Kind of director behind the handle ("backend", "round-robin", ...).
    fn kind(&self) -> &'static str {
        "backend"
    }

    /// Network address, when the handle is a single server.
    fn address(&self) -> Option<SocketAddr> {
        None
    }

    fn healthy(&self) -> Health;

    /// Load figures, if the backend tracks them.
    fn uptime(&self) -> Option<Uptime> {
        None
    }

    /// Look for a backend serving `addr` behind this handle.
    fn find_by_address(&self, _addr: SocketAddr) -> Option<BackendRef> {
        None
    }
}

/// Pool membership is by object identity, not by name or address.
pub fn same_backend(a: &BackendRef, b: &BackendRef) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Kind name of a handle (`"backend"` for plain servers, the strategy name for pools).
pub fn backend_type(backend: &BackendRef) -> &'static str {
    backend.kind()
}

/// True when a selection produced a backend.
pub fn is_backend(backend: Option<&BackendRef>) -> bool {
    backend.is_some()
}

fn to_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn from_millis(ms: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms)
}

/// A single backend server.
///
/// Created by the dynamic membership manager for every resolved address, and
/// usable directly by hosts that have no backend type of their own. The host
/// owns health probing and connection handling; it reports both back here.
#[derive(Debug)]
pub struct Backend {
    name: String,
    /// The address of the backend.
    pub addr: SocketAddr,
    /// Connection cap for the host to enforce (0 = unlimited).
    pub max_connections: usize,
    /// In-flight connections as reported by the host.
    active_connections: AtomicUsize,
    healthy: AtomicBool,
    /// Milliseconds since the epoch of the last health transition.
    changed_ms: AtomicU64,
}

impl Backend {
    /// Create a healthy backend. Its health clock starts now.
    pub fn new(name: impl Into<String>, addr: SocketAddr, max_connections: usize) -> Self {
        Self {
            name: name.into(),
            addr,
            max_connections,
            active_connections: AtomicUsize::new(0),
            healthy: AtomicBool::new(true),
            changed_ms: AtomicU64::new(to_millis(SystemTime::now())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn inc_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Saturates at zero.
    pub fn dec_connections(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Time of the last health transition.
    pub fn changed(&self) -> SystemTime {
        from_millis(self.changed_ms.load(Ordering::Relaxed))
    }

    /// Override the health transition time, e.g. to restore a known uptime.
    pub fn set_changed(&self, at: SystemTime) {
        self.changed_ms.store(to_millis(at), Ordering::Relaxed);
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Set the health state, recording a transition if it flips.
    pub fn set_healthy(&self, healthy: bool) {
        if self.healthy.swap(healthy, Ordering::Relaxed) != healthy {
            self.set_changed(SystemTime::now());
            tracing::info!(backend = %self.name, addr = %self.addr, healthy, "Backend health changed");
        }
    }
}

impl BackendHandle for Backend {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> Option<SocketAddr> {
        Some(self.addr)
    }

    fn healthy(&self) -> Health {
        Health {
            healthy: self.is_healthy(),
            changed: self.changed(),
        }
    }

    fn uptime(&self) -> Option<Uptime> {
        Some(Uptime {
            healthy: self.is_healthy(),
            changed: self.changed(),
            load: self.active_connections() as f64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(port: u16) -> Arc<Backend> {
        Arc::new(Backend::new(
            format!("b{}", port),
            format!("127.0.0.1:{}", port).parse().unwrap(),
            0,
        ))
    }

    #[test]
    fn test_connections_are_load() {
        let b = backend(8080);
        b.inc_connections();
        b.inc_connections();
        assert_eq!(b.uptime().unwrap().load, 2.0);
        b.dec_connections();
        b.dec_connections();
        b.dec_connections();
        assert_eq!(b.active_connections(), 0);
    }

    #[test]
    fn test_health_flip_updates_changed() {
        let b = backend(8081);
        let past = SystemTime::now() - Duration::from_secs(3600);
        b.set_changed(past);
        assert!(b.is_healthy());

        // Setting the current state is not a transition.
        b.set_healthy(true);
        assert_eq!(b.healthy().changed, from_millis(to_millis(past)));

        b.set_healthy(false);
        assert!(!b.healthy().healthy);
        assert!(b.healthy().changed > past);
    }

    #[test]
    fn test_identity_not_equality() {
        let a: BackendRef = backend(8082);
        let b: BackendRef = backend(8082);
        assert!(same_backend(&a, &a.clone()));
        assert!(!same_backend(&a, &b));
        assert_eq!(backend_type(&a), "backend");
        assert!(is_backend(Some(&a)));
        assert!(!is_backend(None));
    }
}
