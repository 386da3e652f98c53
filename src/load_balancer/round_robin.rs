//! Weighted round-robin load balancing strategy.

use crate::load_balancer::backend::BackendRef;
use crate::load_balancer::context::RequestContext;
use crate::load_balancer::{LoadBalancer, Member};
use crate::sync::{LockRank, RankedMutex};

/// Round-robin selector.
///
/// Stores a fractional cursor in `[0, 1)`. Each pick advances it by
/// `1 - weight / total`, so heavier members move the cursor less and come up
/// again sooner.
#[derive(Debug)]
pub struct RoundRobin {
    cursor: RankedMutex<f64>,
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundRobin {
    pub fn new() -> Self {
        Self {
            cursor: RankedMutex::new(LockRank::Cursor, 0.0),
        }
    }

    /// Current cursor position.
    pub fn cursor(&self) -> f64 {
        *self.cursor.lock()
    }
}

impl LoadBalancer for RoundRobin {
    fn name(&self) -> &'static str {
        "round-robin"
    }

    fn next_server(&self, members: &[Member], _ctx: &RequestContext) -> Option<BackendRef> {
        let healthy: Vec<&Member> = members
            .iter()
            .filter(|m| m.backend.healthy().healthy)
            .collect();
        let total: f64 = healthy.iter().map(|m| m.weight).sum();
        if healthy.is_empty() || total <= 0.0 {
            return None;
        }

        let mut cursor = self.cursor.lock();
        let w = cursor.fract();
        let index = ((w * healthy.len() as f64) as usize).min(healthy.len() - 1);
        let chosen = healthy[index];
        *cursor = (w + (1.0 - chosen.weight / total)).fract();
        Some(chosen.backend.clone())
    }
}
