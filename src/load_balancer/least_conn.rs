//! Least Connections load balancing strategy.

use std::time::{Duration, SystemTime};

use crate::load_balancer::backend::BackendRef;
use crate::load_balancer::context::RequestContext;
use crate::load_balancer::{LoadBalancer, Member};

/// Least connections selector.
///
/// Selects the member with the lowest `load / weight`. A member that turned
/// healthy less than `slow_start` ago has its figure inflated by
/// `slow_start / elapsed` so it is not flooded the moment it comes back.
#[derive(Debug, Clone, Default)]
pub struct LeastConnections {
    slow_start: Duration,
}

impl LeastConnections {
    pub fn new(slow_start: Duration) -> Self {
        Self { slow_start }
    }

    pub fn slow_start(&self) -> Duration {
        self.slow_start
    }

    /// Inflation factor for a member whose health changed at `changed`.
    ///
    /// `None` once `slow_start` has fully elapsed. Clock skew (changed in the
    /// future) and zero elapsed time give factor 1 but still count as warming.
    fn slow_start_factor(&self, now: SystemTime, changed: SystemTime) -> Option<f64> {
        if self.slow_start.is_zero() {
            return None;
        }
        let elapsed = match now.duration_since(changed) {
            Ok(elapsed) if !elapsed.is_zero() => elapsed,
            _ => return Some(1.0),
        };
        if elapsed >= self.slow_start {
            return None;
        }
        Some(self.slow_start.as_secs_f64() / elapsed.as_secs_f64())
    }

    fn select(&self, members: &[Member], now: SystemTime) -> Option<BackendRef> {
        // (index, adjusted load, warming up)
        let mut best: Option<(usize, f64, bool)> = None;

        for (idx, member) in members.iter().enumerate() {
            if member.weight <= 0.0 {
                continue;
            }
            let (load, changed) = match member.backend.uptime() {
                Some(up) if up.healthy => (up.load, Some(up.changed)),
                Some(_) => continue,
                None if member.backend.healthy().healthy => (0.0, None),
                None => continue,
            };

            let mut score = load / member.weight;
            let mut warming = false;
            if let Some(factor) = changed.and_then(|c| self.slow_start_factor(now, c)) {
                score *= factor;
                warming = true;
            }

            let better = match best {
                None => true,
                Some((_, best_score, best_warming)) => {
                    score < best_score || (score == best_score && best_warming && !warming)
                }
            };
            if better {
                best = Some((idx, score, warming));
            }
        }

        best.map(|(idx, _, _)| members[idx].backend.clone())
    }
}

impl LoadBalancer for LeastConnections {
    fn name(&self) -> &'static str {
        "least-connections"
    }

    fn next_server(&self, members: &[Member], _ctx: &RequestContext) -> Option<BackendRef> {
        self.select(members, SystemTime::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::backend::Backend;
    use std::sync::Arc;

    fn backend(port: u16, since: SystemTime) -> Arc<Backend> {
        let b = Arc::new(Backend::new(
            format!("b{}", port),
            format!("127.0.0.1:{}", port).parse().unwrap(),
            100,
        ));
        b.set_changed(since);
        b
    }

    fn member(b: &Arc<Backend>, weight: f64) -> Member {
        Member {
            backend: b.clone(),
            weight,
        }
    }

    #[test]
    fn test_least_conn() {
        let lb = LeastConnections::new(Duration::ZERO);
        let long_ago = SystemTime::now() - Duration::from_secs(3600);
        let b1 = backend(8080, long_ago);
        let b2 = backend(8081, long_ago);
        let members = vec![member(&b1, 1.0), member(&b2, 1.0)];
        let ctx = RequestContext::new("/");

        // artificially increase connections on b1
        b1.inc_connections();
        assert_eq!(lb.next_server(&members, &ctx).unwrap().name(), "b8081");

        // now b2 has 2, b1 has 1
        b2.inc_connections();
        b2.inc_connections();
        assert_eq!(lb.next_server(&members, &ctx).unwrap().name(), "b8080");

        // Tie goes to the first scanned.
        b1.inc_connections();
        assert_eq!(lb.next_server(&members, &ctx).unwrap().name(), "b8080");
    }

    #[test]
    fn test_load_normalized_by_weight() {
        let lb = LeastConnections::new(Duration::ZERO);
        let long_ago = SystemTime::now() - Duration::from_secs(3600);
        let small = backend(8080, long_ago);
        let big = backend(8081, long_ago);
        for _ in 0..2 {
            small.inc_connections();
        }
        for _ in 0..5 {
            big.inc_connections();
        }
        // 2/1 = 2.0 vs 5/4 = 1.25
        let members = vec![member(&small, 1.0), member(&big, 4.0)];
        let picked = lb.next_server(&members, &RequestContext::new("/")).unwrap();
        assert_eq!(picked.name(), "b8081");
    }

    #[test]
    fn test_slow_start_loses_ties() {
        let lb = LeastConnections::new(Duration::from_secs(60));
        let now = SystemTime::now();
        let fresh = backend(8080, now - Duration::from_secs(1));
        let settled = backend(8081, now - Duration::from_secs(3600));
        let members = vec![member(&fresh, 1.0), member(&settled, 1.0)];

        // Both idle: the settled one wins despite scan order.
        assert_eq!(lb.select(&members, now).unwrap().name(), "b8081");

        // Equal non-zero load: inflation decides.
        fresh.inc_connections();
        settled.inc_connections();
        assert_eq!(lb.select(&members, now).unwrap().name(), "b8081");

        // Clearly less loaded beats slow start.
        for _ in 0..100 {
            settled.inc_connections();
        }
        assert_eq!(lb.select(&members, now).unwrap().name(), "b8080");
    }

    #[test]
    fn test_slow_start_factor_clamps() {
        let lb = LeastConnections::new(Duration::from_secs(10));
        let now = SystemTime::now();

        assert_eq!(lb.slow_start_factor(now, now), Some(1.0));
        assert_eq!(lb.slow_start_factor(now, now + Duration::from_secs(5)), Some(1.0));
        let factor = lb.slow_start_factor(now, now - Duration::from_secs(2)).unwrap();
        assert!((factor - 5.0).abs() < 1e-9);
        assert_eq!(lb.slow_start_factor(now, now - Duration::from_secs(11)), None);
        // The window is half-open: exactly `slow_start` ago is settled.
        assert_eq!(lb.slow_start_factor(now, now - Duration::from_secs(10)), None);

        let off = LeastConnections::new(Duration::ZERO);
        assert_eq!(off.slow_start_factor(now, now), None);
    }

    #[test]
    fn test_skips_unhealthy_and_zero_weight() {
        let lb = LeastConnections::new(Duration::ZERO);
        let long_ago = SystemTime::now() - Duration::from_secs(3600);
        let a = backend(8080, long_ago);
        let b = backend(8081, long_ago);
        let c = backend(8082, long_ago);
        c.inc_connections();
        a.set_healthy(false);
        let members = vec![member(&a, 1.0), member(&b, 0.0), member(&c, 1.0)];

        let picked = lb.next_server(&members, &RequestContext::new("/")).unwrap();
        assert_eq!(picked.name(), "b8082");

        c.set_healthy(false);
        assert!(lb.next_server(&members, &RequestContext::new("/")).is_none());
    }
}
