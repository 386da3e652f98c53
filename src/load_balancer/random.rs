//! Weighted random selection, optionally with power-of-N choices.

use std::sync::Arc;

use rand::Rng;

use crate::error::{DirectorError, DirectorResult};
use crate::load_balancer::backend::{same_backend, BackendRef};
use crate::load_balancer::context::RequestContext;
use crate::load_balancer::pool::pick_weighted;
use crate::load_balancer::{LoadBalancer, Member};

/// Source of uniform draws in `[0, 1)`.
pub type DrawFn = Arc<dyn Fn() -> f64 + Send + Sync>;

fn thread_draw() -> f64 {
    rand::thread_rng().gen::<f64>()
}

/// Weighted random selector.
///
/// With `choices > 1` it draws several candidates and keeps the least loaded
/// one, which smooths out bursts on small pools.
pub struct Random {
    choices: usize,
    draw: DrawFn,
}

impl std::fmt::Debug for Random {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Random").field("choices", &self.choices).finish()
    }
}

impl Default for Random {
    fn default() -> Self {
        Self::new()
    }
}

impl Random {
    pub fn new() -> Self {
        Self {
            choices: 1,
            draw: Arc::new(thread_draw),
        }
    }

    pub fn with_choices(choices: usize) -> DirectorResult<Self> {
        if choices == 0 {
            return Err(DirectorError::InvalidStrategy {
                strategy: "random",
                reason: "choices must be at least 1".into(),
            });
        }
        Ok(Self {
            choices,
            draw: Arc::new(thread_draw),
        })
    }

    /// Replace the draw source (deterministic tests, external entropy).
    pub fn with_draw(mut self, draw: DrawFn) -> Self {
        self.draw = draw;
        self
    }

    pub fn choices(&self) -> usize {
        self.choices
    }
}

fn healthy_count(members: &[Member]) -> usize {
    members
        .iter()
        .filter(|m| m.weight > 0.0 && m.backend.healthy().healthy)
        .count()
}

impl LoadBalancer for Random {
    fn name(&self) -> &'static str {
        "random"
    }

    fn next_server(&self, members: &[Member], _ctx: &RequestContext) -> Option<BackendRef> {
        let first = pick_weighted(members, (self.draw)())?;
        if self.choices <= 1 || healthy_count(members) <= 1 {
            return Some(first);
        }

        let mut best = first;
        let mut best_load = best.uptime().map(|u| u.load);
        for _ in 1..self.choices {
            let Some(candidate) = pick_weighted(members, (self.draw)()) else {
                break;
            };
            if same_backend(&candidate, &best) {
                continue;
            }
            let Some(load) = candidate.uptime().map(|u| u.load) else {
                continue;
            };
            // A draw without load figures never displaces one with them.
            if best_load.map_or(true, |current| load < current) {
                best = candidate;
                best_load = Some(load);
            }
        }
        Some(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::backend::Backend;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn member(name: &str, port: u16, weight: f64) -> (Arc<Backend>, Member) {
        let b = Arc::new(Backend::new(name, format!("127.0.0.1:{}", port).parse().unwrap(), 0));
        let m = Member {
            backend: b.clone(),
            weight,
        };
        (b, m)
    }

    /// Cycles through a fixed list of draws.
    fn scripted(draws: Vec<f64>) -> DrawFn {
        let next = AtomicUsize::new(0);
        Arc::new(move || draws[next.fetch_add(1, Ordering::Relaxed) % draws.len()])
    }

    #[test]
    fn test_random_follows_draw() {
        let (_, x) = member("x", 1, 1.0);
        let (_, y) = member("y", 2, 3.0);
        let members = vec![x, y];
        let ctx = RequestContext::new("/");

        let lb = Random::new().with_draw(scripted(vec![0.1, 0.3]));
        assert_eq!(lb.next_server(&members, &ctx).unwrap().name(), "x");
        assert_eq!(lb.next_server(&members, &ctx).unwrap().name(), "y");
    }

    #[test]
    fn test_random_weighted_frequency() {
        let (_, x) = member("x", 1, 1.0);
        let (_, y) = member("y", 2, 3.0);
        let members = vec![x, y];
        let lb = Random::new();
        let ctx = RequestContext::new("/");

        let mut y_hits = 0;
        for _ in 0..10_000 {
            if lb.next_server(&members, &ctx).unwrap().name() == "y" {
                y_hits += 1;
            }
        }
        assert!((7_000..=8_000).contains(&y_hits), "y picked {} times", y_hits);
    }

    #[test]
    fn test_power_of_choices_prefers_lower_load() {
        let (a, ma) = member("a", 1, 1.0);
        let (_, mb) = member("b", 2, 1.0);
        let members = vec![ma, mb];
        a.inc_connections();
        a.inc_connections();

        // First draw lands on a, second on b.
        let lb = Random::with_choices(2)
            .unwrap()
            .with_draw(scripted(vec![0.1, 0.9]));
        let picked = lb.next_server(&members, &RequestContext::new("/")).unwrap();
        assert_eq!(picked.name(), "b");
    }

    #[test]
    fn test_power_of_choices_keeps_first_on_equal_load() {
        let (_, ma) = member("a", 1, 1.0);
        let (_, mb) = member("b", 2, 1.0);
        let members = vec![ma, mb];

        let lb = Random::with_choices(3)
            .unwrap()
            .with_draw(scripted(vec![0.9, 0.1, 0.2]));
        let picked = lb.next_server(&members, &RequestContext::new("/")).unwrap();
        assert_eq!(picked.name(), "b");
    }

    #[test]
    fn test_power_of_choices_single_healthy_degenerates() {
        let (a, ma) = member("a", 1, 1.0);
        let (_, mb) = member("b", 2, 1.0);
        a.set_healthy(false);
        let members = vec![ma, mb];

        let lb = Random::with_choices(4).unwrap();
        for _ in 0..10 {
            let picked = lb.next_server(&members, &RequestContext::new("/")).unwrap();
            assert_eq!(picked.name(), "b");
        }
    }

    #[test]
    fn test_random_none_when_all_unhealthy() {
        let (a, ma) = member("a", 1, 1.0);
        a.set_healthy(false);
        let lb = Random::new();
        assert!(lb.next_server(&[ma], &RequestContext::new("/")).is_none());
        assert!(lb.next_server(&[], &RequestContext::new("/")).is_none());
    }
}
