//! Weighted backend pool.
//!
//! # Responsibilities
//! - Own the ordered `(backend, weight)` member list of one named pool
//! - Serialize membership changes against concurrent selection
//! - Provide the weighted pick every weight-aware strategy builds on
//! - Render diagnostic reports
//!
//! Selection runs under the read lock, membership and strategy changes under
//! the write lock. Insertion order is the tie-break order.

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Map, Value};

use crate::error::{DirectorError, DirectorResult};
use crate::load_balancer::backend::{same_backend, BackendHandle, BackendRef, Health, Uptime};
use crate::load_balancer::context::RequestContext;
use crate::load_balancer::Strategy;
use crate::observability::metrics;
use crate::sync::{LockRank, RankedRwLock, RankedWriteGuard};

/// Upper bound on pool membership.
pub const MAX_BACKENDS: usize = 256;

/// One pool entry.
#[derive(Debug, Clone)]
pub struct Member {
    pub backend: BackendRef,
    pub weight: f64,
}

#[derive(Debug, Default)]
struct PoolInner {
    members: Vec<Member>,
    strategy: Option<Strategy>,
}

/// Output format for [`Pool::report`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Json,
}

/// A named, weighted set of backends with an optional selection strategy.
#[derive(Debug)]
pub struct Pool {
    name: String,
    inner: RankedRwLock<PoolInner>,
}

/// Exclusive access to a pool's member list.
///
/// Lets callers batch several additions and removals under one write lock.
pub struct PoolWriter<'a> {
    name: &'a str,
    inner: RankedWriteGuard<'a, PoolInner>,
}

impl PoolWriter<'_> {
    /// Append a member.
    pub fn add(&mut self, backend: BackendRef, weight: f64) -> DirectorResult<()> {
        if !weight.is_finite() || weight < 0.0 {
            return Err(DirectorError::InvalidWeight {
                backend: backend.name().to_string(),
                weight,
            });
        }
        if self.inner.members.len() >= MAX_BACKENDS {
            return Err(DirectorError::MemberLimit {
                pool: self.name.to_string(),
                limit: MAX_BACKENDS,
            });
        }
        tracing::debug!(pool = %self.name, backend = %backend.name(), weight, "Backend added");
        self.inner.members.push(Member { backend, weight });
        metrics::record_pool_members(self.name, self.inner.members.len());
        Ok(())
    }

    /// Remove the first member that is `backend`. Returns false if absent.
    pub fn remove(&mut self, backend: &BackendRef) -> bool {
        let Some(pos) = self
            .inner
            .members
            .iter()
            .position(|m| same_backend(&m.backend, backend))
        else {
            return false;
        };
        // Vec::remove shifts the tail left, keeping tie-break order.
        let removed = self.inner.members.remove(pos);
        tracing::debug!(pool = %self.name, backend = %removed.backend.name(), "Backend removed");
        metrics::record_pool_members(self.name, self.inner.members.len());
        true
    }

    pub fn len(&self) -> usize {
        self.inner.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.members.is_empty()
    }
}

impl Pool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: RankedRwLock::new(LockRank::Pool, PoolInner::default()),
        }
    }

    /// Create a pool with its strategy already installed.
    pub fn with_strategy(name: impl Into<String>, strategy: Strategy) -> Self {
        let pool = Self::new(name);
        pool.inner.write().strategy = Some(strategy);
        pool
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take the write lock for a batch of membership changes.
    pub fn writer(&self) -> PoolWriter<'_> {
        PoolWriter {
            name: &self.name,
            inner: self.inner.write(),
        }
    }

    pub fn add_backend(&self, backend: BackendRef, weight: f64) -> DirectorResult<()> {
        self.writer().add(backend, weight)
    }

    pub fn remove_backend(&self, backend: &BackendRef) -> bool {
        self.writer().remove(backend)
    }

    /// Install the selection strategy. Fails if one is already installed.
    pub fn set_strategy(&self, strategy: Strategy) -> DirectorResult<()> {
        let mut inner = self.inner.write();
        if inner.strategy.is_some() {
            return Err(DirectorError::StrategyAlreadySet(self.name.clone()));
        }
        tracing::debug!(pool = %self.name, strategy = strategy.name(), "Strategy installed");
        inner.strategy = Some(strategy);
        Ok(())
    }

    /// Remove and return the installed strategy, freeing the slot for a new one.
    pub fn clear_strategy(&self) -> Option<Strategy> {
        self.inner.write().strategy.take()
    }

    /// Name of the installed strategy, `"raw"` without one.
    pub fn strategy_name(&self) -> &'static str {
        self.inner
            .read()
            .strategy
            .as_ref()
            .map_or("raw", |s| s.name())
    }

    pub fn len(&self) -> usize {
        self.inner.read().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().members.is_empty()
    }

    /// Snapshot of the current members in order.
    pub fn members(&self) -> Vec<Member> {
        self.inner.read().members.clone()
    }

    /// Whether any member is healthy, with the newest change time seen.
    pub fn healthy_any(&self) -> (bool, SystemTime) {
        any_healthy(&self.inner.read().members)
    }

    /// Weighted pick over the healthy members for a draw in `[0, 1)`.
    pub fn pick(&self, draw: f64) -> Option<BackendRef> {
        pick_weighted(&self.inner.read().members, draw)
    }

    /// Select a backend for one request using the installed strategy.
    pub fn resolve(&self, ctx: &RequestContext) -> Option<BackendRef> {
        let inner = self.inner.read();
        let Some(strategy) = inner.strategy.as_ref() else {
            tracing::debug!(pool = %self.name, "No selection strategy installed");
            return None;
        };
        let selected = strategy.next_server(&inner.members, ctx);
        let strategy_name = strategy.name();
        let backend_count = inner.members.len();
        drop(inner);

        match &selected {
            Some(backend) => {
                tracing::trace!(pool = %self.name, backend = %backend.name(), "Backend selected");
                metrics::record_pick(&self.name, strategy_name);
            }
            None => {
                tracing::debug!(pool = %self.name, backend_count, "No healthy backends found in pool");
                metrics::record_no_backend(&self.name);
            }
        }
        selected
    }

    /// Find the member (or nested member) serving `addr`.
    pub fn find_by_address(&self, addr: SocketAddr) -> Option<BackendRef> {
        let inner = self.inner.read();
        inner.members.iter().find_map(|m| {
            if m.backend.address() == Some(addr) {
                Some(m.backend.clone())
            } else {
                m.backend.find_by_address(addr)
            }
        })
    }

    /// Render the member list with weights (or the current flag) and health.
    pub fn report(&self, format: ReportFormat, verbose: bool) -> String {
        let inner = self.inner.read();
        let current = match &inner.strategy {
            Some(Strategy::Fallback(fallback)) => Some(fallback.current(&inner.members)),
            _ => None,
        };
        let rows: Vec<ReportRow> = inner
            .members
            .iter()
            .map(|m| ReportRow {
                name: m.backend.name().to_string(),
                weight: m.weight,
                current: current
                    .as_ref()
                    .map(|c| c.as_ref().is_some_and(|c| same_backend(c, &m.backend))),
                healthy: m.backend.healthy().healthy,
            })
            .collect();
        drop(inner);

        let healthy = rows.iter().filter(|r| r.healthy).count();
        let total = rows.len();
        let status = health_word(healthy > 0);

        match format {
            ReportFormat::Text => {
                let mut out = String::new();
                if verbose {
                    let column = if current.is_some() { "Current" } else { "Weight" };
                    let _ = writeln!(out, "Backend\t{}\tHealth", column);
                    for row in &rows {
                        let value = match row.current {
                            Some(true) => "*".to_string(),
                            Some(false) => "".to_string(),
                            None => format!("{:.2}", row.weight),
                        };
                        let _ = writeln!(out, "{}\t{}\t{}", row.name, value, health_word(row.healthy));
                    }
                }
                let _ = write!(out, "{}/{}\t{}", healthy, total, status);
                out
            }
            ReportFormat::Json => {
                let mut obj = Map::new();
                if verbose {
                    let mut backends = Map::new();
                    for row in &rows {
                        let entry = match row.current {
                            Some(cur) => json!({ "current": cur, "health": health_word(row.healthy) }),
                            None => json!({ "weight": row.weight, "health": health_word(row.healthy) }),
                        };
                        backends.insert(row.name.clone(), entry);
                    }
                    obj.insert("backends".into(), Value::Object(backends));
                }
                obj.insert("healthy".into(), json!(healthy));
                obj.insert("total".into(), json!(total));
                obj.insert("health".into(), json!(status));
                Value::Object(obj).to_string()
            }
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        tracing::debug!(pool = %self.name, "Pool released");
    }
}

/// A pool can itself be a member of another pool.
impl BackendHandle for Pool {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        self.strategy_name()
    }

    fn healthy(&self) -> Health {
        let inner = self.inner.read();
        match &inner.strategy {
            Some(strategy) => strategy.healthy(&inner.members),
            None => {
                let (healthy, changed) = any_healthy(&inner.members);
                Health { healthy, changed }
            }
        }
    }

    fn uptime(&self) -> Option<Uptime> {
        let inner = self.inner.read();
        match &inner.strategy {
            Some(strategy) => strategy.uptime(&inner.members),
            None => aggregate_uptime(&inner.members),
        }
    }

    fn find_by_address(&self, addr: SocketAddr) -> Option<BackendRef> {
        Pool::find_by_address(self, addr)
    }
}

struct ReportRow {
    name: String,
    weight: f64,
    current: Option<bool>,
    healthy: bool,
}

fn health_word(healthy: bool) -> &'static str {
    if healthy {
        "healthy"
    } else {
        "sick"
    }
}

/// Scan until the first healthy member, tracking the newest change time seen.
pub(crate) fn any_healthy(members: &[Member]) -> (bool, SystemTime) {
    let mut newest = UNIX_EPOCH;
    for member in members {
        let health = member.backend.healthy();
        newest = newest.max(health.changed);
        if health.healthy {
            return (true, newest);
        }
    }
    (false, newest)
}

/// Weighted selection among healthy members.
///
/// `draw` is scaled by the healthy weight total; the first member whose
/// cumulative weight strictly exceeds it wins.
pub(crate) fn pick_weighted(members: &[Member], draw: f64) -> Option<BackendRef> {
    let mut eligible = Vec::with_capacity(members.len());
    let mut total = 0.0;
    for (idx, member) in members.iter().enumerate() {
        if member.backend.healthy().healthy {
            eligible.push(idx);
            total += member.weight;
        }
    }
    if total <= 0.0 {
        return None;
    }

    let target = draw.clamp(0.0, 1.0) * total;
    let mut acc = 0.0;
    let mut last = None;
    for idx in eligible {
        let weight = members[idx].weight;
        if weight <= 0.0 {
            continue;
        }
        acc += weight;
        last = Some(idx);
        if target < acc {
            return Some(members[idx].backend.clone());
        }
    }
    // Rounding can leave the target at the very top of the range.
    last.map(|idx| members[idx].backend.clone())
}

/// Sum of loads over healthy members that report one.
pub(crate) fn aggregate_uptime(members: &[Member]) -> Option<Uptime> {
    let mut result: Option<Uptime> = None;
    for member in members {
        let Some(up) = member.backend.uptime() else {
            continue;
        };
        if !up.healthy {
            continue;
        }
        let acc = result.get_or_insert(Uptime {
            healthy: true,
            changed: UNIX_EPOCH,
            load: 0.0,
        });
        acc.changed = acc.changed.max(up.changed);
        acc.load += up.load;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::backend::Backend;
    use std::sync::Arc;
    use std::time::Duration;

    fn backend(name: &str, port: u16) -> Arc<Backend> {
        Arc::new(Backend::new(name, format!("127.0.0.1:{}", port).parse().unwrap(), 0))
    }

    fn names(members: &[Member]) -> Vec<String> {
        members.iter().map(|m| m.backend.name().to_string()).collect()
    }

    #[test]
    fn test_add_remove_preserves_order() {
        let pool = Pool::new("web");
        let a: BackendRef = backend("a", 1);
        let b: BackendRef = backend("b", 2);
        let c: BackendRef = backend("c", 3);
        pool.add_backend(a.clone(), 1.0).unwrap();
        pool.add_backend(b.clone(), 1.0).unwrap();
        pool.add_backend(c.clone(), 1.0).unwrap();

        assert!(pool.remove_backend(&b));
        assert_eq!(names(&pool.members()), vec!["a", "c"]);
        assert!(!pool.remove_backend(&b));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_duplicates_removed_one_at_a_time() {
        let pool = Pool::new("web");
        let a: BackendRef = backend("a", 1);
        pool.add_backend(a.clone(), 1.0).unwrap();
        pool.add_backend(a.clone(), 2.0).unwrap();
        assert!(pool.remove_backend(&a));
        assert_eq!(pool.members()[0].weight, 2.0);
    }

    #[test]
    fn test_add_rejects_bad_weight_and_full_pool() {
        let pool = Pool::new("web");
        let err = pool.add_backend(backend("a", 1), -1.0).unwrap_err();
        assert!(matches!(err, DirectorError::InvalidWeight { .. }));
        assert!(pool.add_backend(backend("a", 1), f64::NAN).is_err());

        for i in 0..MAX_BACKENDS {
            pool.add_backend(backend("x", i as u16), 1.0).unwrap();
        }
        let err = pool.add_backend(backend("y", 1), 1.0).unwrap_err();
        assert_eq!(
            err,
            DirectorError::MemberLimit {
                pool: "web".into(),
                limit: MAX_BACKENDS
            }
        );
    }

    #[test]
    fn test_pick_skips_unhealthy() {
        let pool = Pool::new("web");
        let a = backend("a", 1);
        let b = backend("b", 2);
        pool.add_backend(a.clone(), 1.0).unwrap();
        pool.add_backend(b.clone(), 1.0).unwrap();
        a.set_healthy(false);

        for i in 0..20 {
            let picked = pool.pick(i as f64 / 20.0).unwrap();
            assert_eq!(picked.name(), "b");
        }
        b.set_healthy(false);
        assert!(pool.pick(0.5).is_none());
    }

    #[test]
    fn test_pick_boundaries() {
        let pool = Pool::new("web");
        pool.add_backend(backend("a", 1), 1.0).unwrap();
        pool.add_backend(backend("zero", 2), 0.0).unwrap();
        pool.add_backend(backend("b", 3), 1.0).unwrap();

        assert_eq!(pool.pick(0.0).unwrap().name(), "a");
        assert_eq!(pool.pick(0.4999).unwrap().name(), "a");
        // Exactly at the boundary the strict comparison moves to the next one.
        assert_eq!(pool.pick(0.5).unwrap().name(), "b");
        assert_eq!(pool.pick(0.9999).unwrap().name(), "b");
        assert_eq!(pool.pick(1.0).unwrap().name(), "b");
    }

    #[test]
    fn test_pick_empty_and_zero_weight() {
        let pool = Pool::new("web");
        assert!(pool.pick(0.3).is_none());
        pool.add_backend(backend("a", 1), 0.0).unwrap();
        assert!(pool.pick(0.3).is_none());
    }

    #[test]
    fn test_healthy_any_tracks_newest_change_until_first_healthy() {
        let pool = Pool::new("web");
        let now = SystemTime::now();
        let a = backend("a", 1);
        let b = backend("b", 2);
        let c = backend("c", 3);
        a.set_healthy(false);
        a.set_changed(now - Duration::from_secs(30));
        b.set_changed(now - Duration::from_secs(20));
        c.set_changed(now - Duration::from_secs(10));
        pool.add_backend(a.clone(), 1.0).unwrap();
        pool.add_backend(b.clone(), 1.0).unwrap();
        pool.add_backend(c.clone(), 1.0).unwrap();

        let (healthy, changed) = pool.healthy_any();
        assert!(healthy);
        // c is never inspected.
        assert_eq!(changed, b.changed());

        b.set_healthy(false);
        b.set_changed(now - Duration::from_secs(20));
        c.set_healthy(false);
        c.set_changed(now - Duration::from_secs(10));
        let (healthy, changed) = pool.healthy_any();
        assert!(!healthy);
        assert_eq!(changed, c.changed());
    }

    #[test]
    fn test_set_strategy_once() {
        let pool = Pool::new("web");
        assert_eq!(pool.strategy_name(), "raw");
        pool.set_strategy(Strategy::random()).unwrap();
        let err = pool.set_strategy(Strategy::round_robin()).unwrap_err();
        assert_eq!(err, DirectorError::StrategyAlreadySet("web".into()));

        assert!(pool.clear_strategy().is_some());
        pool.set_strategy(Strategy::round_robin()).unwrap();
        assert_eq!(pool.strategy_name(), "round-robin");
    }

    #[test]
    fn test_resolve_without_strategy() {
        let pool = Pool::new("web");
        pool.add_backend(backend("a", 1), 1.0).unwrap();
        assert!(pool.resolve(&RequestContext::new("/")).is_none());
    }

    #[test]
    fn test_report_text() {
        let pool = Pool::with_strategy("web", Strategy::random());
        let a = backend("a", 1);
        pool.add_backend(a.clone(), 1.0).unwrap();
        pool.add_backend(backend("b", 2), 3.0).unwrap();
        a.set_healthy(false);

        assert_eq!(pool.report(ReportFormat::Text, false), "1/2\thealthy");
        let verbose = pool.report(ReportFormat::Text, true);
        assert_eq!(
            verbose,
            "Backend\tWeight\tHealth\na\t1.00\tsick\nb\t3.00\thealthy\n1/2\thealthy"
        );
    }

    #[test]
    fn test_report_json_fallback_marks_current() {
        let pool = Pool::with_strategy("web", Strategy::fallback(false));
        let a = backend("a", 1);
        pool.add_backend(a.clone(), 1.0).unwrap();
        pool.add_backend(backend("b", 2), 1.0).unwrap();
        a.set_healthy(false);

        let value: Value = serde_json::from_str(&pool.report(ReportFormat::Json, true)).unwrap();
        assert_eq!(value["backends"]["a"]["current"], false);
        assert_eq!(value["backends"]["a"]["health"], "sick");
        assert_eq!(value["backends"]["b"]["current"], true);
        assert_eq!(value["healthy"], 1);
        assert_eq!(value["total"], 2);
        assert_eq!(value["health"], "healthy");

        let brief: Value = serde_json::from_str(&pool.report(ReportFormat::Json, false)).unwrap();
        assert!(brief.get("backends").is_none());
    }

    #[test]
    fn test_nested_pool_as_backend() {
        let inner = Arc::new(Pool::with_strategy("inner", Strategy::fallback(false)));
        let leaf = backend("leaf", 9000);
        inner.add_backend(leaf.clone(), 1.0).unwrap();

        let outer = Pool::with_strategy("outer", Strategy::random());
        outer.add_backend(inner.clone(), 1.0).unwrap();

        let picked = outer.resolve(&RequestContext::new("/")).unwrap();
        assert_eq!(picked.name(), "inner");
        assert_eq!(picked.kind(), "fallback");

        let found = outer.find_by_address("127.0.0.1:9000".parse().unwrap()).unwrap();
        assert_eq!(found.name(), "leaf");

        leaf.set_healthy(false);
        assert!(outer.resolve(&RequestContext::new("/")).is_none());
    }
}
