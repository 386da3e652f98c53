//! Backend selection subsystem.
//!
//! # Data Flow
//! ```text
//! Host request → Pool::resolve(ctx)
//!     → pool.rs (read lock, member snapshot)
//!     → Strategy (installed once per pool):
//!         - random.rs (weighted draw, optional power-of-N choices)
//!         - round_robin.rs (fractional cursor)
//!         - least_conn.rs (load / weight with slow start)
//!         - hash.rs (header or path digest → weighted draw)
//!         - fallback.rs (first healthy, optionally sticky)
//!     → backend.rs handle returned to the host, or None
//! ```
//!
//! # Design Decisions
//! - Strategies see only healthy members; health is evaluated per call, never cached
//! - No backend is a normal outcome, not an error
//! - One strategy per pool; replacing it means clearing the slot first
//! - Strategy state that mutates per request carries its own lock

pub mod backend;
pub mod context;
pub mod fallback;
pub mod hash;
pub mod least_conn;
pub mod pool;
pub mod random;
pub mod round_robin;

use std::fmt;
use std::time::Duration;

use crate::error::DirectorResult;
use backend::{Health, Uptime};

pub use backend::{Backend, BackendHandle, BackendRef};
pub use context::RequestContext;
pub use fallback::Fallback;
pub use hash::HashSelect;
pub use least_conn::LeastConnections;
pub use pool::{Member, Pool, ReportFormat, MAX_BACKENDS};
pub use random::Random;
pub use round_robin::RoundRobin;

/// A selection policy over a pool's member list.
///
/// Called with the pool's read lock held; `members` is a consistent snapshot
/// for the duration of the call.
pub trait LoadBalancer: Send + Sync + fmt::Debug {
    /// Policy name used in reports and metrics.
    fn name(&self) -> &'static str;

    fn next_server(&self, members: &[Member], ctx: &RequestContext) -> Option<BackendRef>;

    /// Aggregate health of the pool as seen through this policy.
    fn healthy(&self, members: &[Member]) -> Health {
        let (healthy, changed) = pool::any_healthy(members);
        Health { healthy, changed }
    }

    /// Aggregate load of the pool as seen through this policy.
    fn uptime(&self, members: &[Member]) -> Option<Uptime> {
        pool::aggregate_uptime(members)
    }
}

/// The installed selection policy of a pool.
#[derive(Debug)]
pub enum Strategy {
    Random(Random),
    RoundRobin(RoundRobin),
    LeastConnections(LeastConnections),
    Hash(HashSelect),
    Fallback(Fallback),
}

impl Strategy {
    pub fn random() -> Self {
        Strategy::Random(Random::new())
    }

    /// Random with power-of-N choices. `choices` must be at least 1.
    pub fn random_choices(choices: usize) -> DirectorResult<Self> {
        Ok(Strategy::Random(Random::with_choices(choices)?))
    }

    pub fn round_robin() -> Self {
        Strategy::RoundRobin(RoundRobin::new())
    }

    pub fn least_connections(slow_start: Duration) -> Self {
        Strategy::LeastConnections(LeastConnections::new(slow_start))
    }

    /// Hash on `header`, or on the request path when `None`.
    pub fn hash(header: Option<String>) -> Self {
        Strategy::Hash(HashSelect::new(header))
    }

    pub fn fallback(sticky: bool) -> Self {
        Strategy::Fallback(Fallback::new(sticky))
    }

    pub fn balancer(&self) -> &dyn LoadBalancer {
        match self {
            Strategy::Random(s) => s,
            Strategy::RoundRobin(s) => s,
            Strategy::LeastConnections(s) => s,
            Strategy::Hash(s) => s,
            Strategy::Fallback(s) => s,
        }
    }

    pub fn name(&self) -> &'static str {
        self.balancer().name()
    }

    pub fn next_server(&self, members: &[Member], ctx: &RequestContext) -> Option<BackendRef> {
        self.balancer().next_server(members, ctx)
    }

    pub fn healthy(&self, members: &[Member]) -> Health {
        self.balancer().healthy(members)
    }

    pub fn uptime(&self, members: &[Member]) -> Option<Uptime> {
        self.balancer().uptime(members)
    }
}
