//! Background hostname lookup feeding a dynamic pool.
//!
//! # Responsibilities
//! - Run one resolution thread per configured hostname while its configuration is warm
//! - Reconcile every successful result into the dynamic pool
//! - Sleep `ttl` between passes, waking early on stop or refresh
//!
//! # State Machine
//! ```text
//! Created ──start──▶ Active ──stop──▶ Stopping ──join──▶ Stopped
//!                      ▲                                    │
//!                      └───────────────start────────────────┘
//! ```
//!
//! # Design Decisions
//! - A failed resolution leaves the pool untouched (stale beats empty)
//! - `ttl == 0` means one pass, then the thread exits on its own
//! - Stop always joins; dropping a running entry is a bug and panics

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Condvar;

use crate::dynamic::acl::AllowList;
use crate::dynamic::membership::DynamicPool;
use crate::dynamic::resolver::AddressResolver;
use crate::error::{DirectorError, DirectorResult};
use crate::lifecycle::instance::LifetimeRef;
use crate::observability::metrics::{self, LookupOutcome};
use crate::sync::{LockRank, RankedMutex};

/// Lifecycle state of a lookup entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupState {
    Created,
    Active,
    Stopping,
    Stopped,
}

#[derive(Debug, Default)]
struct Wake {
    active: bool,
    refresh: bool,
    passes: u64,
}

/// State shared with the lookup thread.
struct Shared {
    hostname: String,
    config: String,
    dynamic: Arc<DynamicPool>,
    allow: Option<AllowList>,
    ttl: Duration,
    resolver: Arc<dyn AddressResolver>,
    wake: RankedMutex<Wake>,
    cond: Condvar,
}

impl Shared {
    fn is_active(&self) -> bool {
        self.wake.lock().active
    }

    fn timestamp(&self, event: &str, first: Duration, prev: Duration) {
        let start = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        tracing::debug!(
            config = %self.config,
            pool = %self.dynamic.name(),
            host = %self.hostname,
            event,
            start,
            since_first = first.as_secs_f64(),
            since_prev = prev.as_secs_f64(),
            "Lookup timestamp"
        );
    }
}

/// One configured hostname lookup.
pub struct DnsLookup {
    shared: Arc<Shared>,
    state: LookupState,
    thread: Option<JoinHandle<()>>,
    lifetime: Option<LifetimeRef>,
}

impl fmt::Debug for DnsLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsLookup")
            .field("hostname", &self.shared.hostname)
            .field("config", &self.shared.config)
            .field("pool", &self.shared.dynamic.name())
            .field("state", &self.state)
            .finish()
    }
}

impl DnsLookup {
    pub fn new(
        config: impl Into<String>,
        dynamic: Arc<DynamicPool>,
        hostname: impl Into<String>,
        allow: Option<AllowList>,
        ttl: Duration,
        resolver: Arc<dyn AddressResolver>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                hostname: hostname.into(),
                config: config.into(),
                dynamic,
                allow,
                ttl,
                resolver,
                wake: RankedMutex::new(LockRank::Lookup, Wake::default()),
                cond: Condvar::new(),
            }),
            state: LookupState::Created,
            thread: None,
            lifetime: None,
        }
    }

    pub fn hostname(&self) -> &str {
        &self.shared.hostname
    }

    pub fn config(&self) -> &str {
        &self.shared.config
    }

    pub fn dynamic(&self) -> &Arc<DynamicPool> {
        &self.shared.dynamic
    }

    pub fn ttl(&self) -> Duration {
        self.shared.ttl
    }

    pub fn state(&self) -> LookupState {
        self.state
    }

    /// Completed resolution passes since creation.
    pub fn passes(&self) -> u64 {
        self.shared.wake.lock().passes
    }

    /// Spawn the lookup thread. `lifetime` is held until the thread has been joined.
    ///
    /// # Panics
    /// If the entry is already running.
    pub fn start(&mut self, lifetime: LifetimeRef) -> DirectorResult<()> {
        assert!(
            matches!(self.state, LookupState::Created | LookupState::Stopped),
            "lookup {} started while {:?}",
            self.shared.hostname,
            self.state
        );
        {
            let mut wake = self.shared.wake.lock();
            wake.active = true;
            wake.refresh = false;
        }

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name(format!("dns-{}", self.shared.hostname))
            .spawn(move || lookup_loop(shared));
        match spawned {
            Ok(handle) => {
                tracing::info!(
                    config = %self.shared.config,
                    pool = %self.shared.dynamic.name(),
                    host = %self.shared.hostname,
                    ttl_secs = self.shared.ttl.as_secs_f64(),
                    "DNS lookup started"
                );
                self.thread = Some(handle);
                self.lifetime = Some(lifetime);
                self.state = LookupState::Active;
                Ok(())
            }
            Err(err) => {
                self.shared.wake.lock().active = false;
                Err(DirectorError::Spawn {
                    hostname: self.shared.hostname.clone(),
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Clear the active flag, wake the thread and join it.
    ///
    /// # Panics
    /// If the entry is not running.
    pub fn stop(&mut self) {
        assert_eq!(
            self.state,
            LookupState::Active,
            "lookup {} stopped while not active",
            self.shared.hostname
        );
        self.state = LookupState::Stopping;
        {
            let mut wake = self.shared.wake.lock();
            wake.active = false;
            self.shared.cond.notify_all();
        }
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                tracing::error!(host = %self.shared.hostname, "DNS lookup thread panicked");
            }
        }
        self.state = LookupState::Stopped;
        self.lifetime = None;
        tracing::info!(
            config = %self.shared.config,
            host = %self.shared.hostname,
            "DNS lookup stopped"
        );
    }

    /// Cut the current wait short and resolve again. Returns false if not running.
    pub fn refresh(&self) -> bool {
        let mut wake = self.shared.wake.lock();
        if !wake.active {
            return false;
        }
        wake.refresh = true;
        self.shared.cond.notify_all();
        true
    }
}

impl Drop for DnsLookup {
    fn drop(&mut self) {
        if matches!(self.state, LookupState::Active | LookupState::Stopping) && !thread::panicking() {
            panic!(
                "lookup {} for {} dropped while {:?}",
                self.shared.hostname, self.shared.config, self.state
            );
        }
    }
}

fn lookup_loop(shared: Arc<Shared>) {
    let port = shared.dynamic.port();

    while shared.is_active() {
        let lookup = Instant::now();
        shared.timestamp("Lookup", Duration::ZERO, Duration::ZERO);

        let result = shared.resolver.resolve(&shared.hostname, port);
        let results = Instant::now();
        shared.timestamp("Results", results - lookup, results - lookup);

        match result {
            Err(err) => {
                tracing::warn!(
                    pool = %shared.dynamic.name(),
                    host = %shared.hostname,
                    error = %err,
                    "DNS lookup failed, keeping current members"
                );
                metrics::record_lookup(&shared.hostname, LookupOutcome::Failure);
            }
            Ok(addrs) => {
                metrics::record_lookup(&shared.hostname, LookupOutcome::Success);
                if shared.is_active() {
                    shared.dynamic.apply(&addrs, shared.allow.as_ref());
                    let update = Instant::now();
                    shared.timestamp("Update", update - lookup, update - results);
                }
            }
        }

        let mut wake = shared.wake.lock();
        wake.passes += 1;
        if shared.ttl.is_zero() {
            // One-shot: nothing left to refresh.
            wake.active = false;
            break;
        }
        match Instant::now().checked_add(shared.ttl) {
            Some(deadline) => {
                while wake.active && !wake.refresh {
                    if wake.wait_until(&shared.cond, deadline) {
                        break;
                    }
                }
            }
            // Past the clock's range: wait for refresh or stop only.
            None => {
                while wake.active && !wake.refresh {
                    wake.wait(&shared.cond);
                }
            }
        }
        wake.refresh = false;
    }

    shared.timestamp("Done", Duration::ZERO, Duration::ZERO);
}
