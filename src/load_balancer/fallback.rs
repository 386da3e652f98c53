//! Ordered fallback selection with optional stickiness.

use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::load_balancer::backend::{same_backend, BackendRef, Uptime};
use crate::load_balancer::context::RequestContext;
use crate::load_balancer::{LoadBalancer, Member};

/// Returns the first healthy member in insertion order.
///
/// With `sticky`, the last backend handed out keeps being returned while it is
/// still a member and healthy, even after an earlier member recovers.
#[derive(Debug)]
pub struct Fallback {
    sticky: bool,
    last: ArcSwapOption<BackendRef>,
}

impl Fallback {
    pub fn new(sticky: bool) -> Self {
        Self {
            sticky,
            last: ArcSwapOption::empty(),
        }
    }

    pub fn is_sticky(&self) -> bool {
        self.sticky
    }

    /// The remembered backend, if it is still a healthy member.
    fn sticky_backend(&self, members: &[Member]) -> Option<BackendRef> {
        if !self.sticky {
            return None;
        }
        let last = self.last.load_full()?;
        let valid = members.iter().any(|m| same_backend(&m.backend, &last)) && last.healthy().healthy;
        valid.then(|| BackendRef::clone(&last))
    }

    /// The backend the next request would go to.
    pub fn current(&self, members: &[Member]) -> Option<BackendRef> {
        self.sticky_backend(members).or_else(|| {
            members
                .iter()
                .find(|m| m.backend.healthy().healthy)
                .map(|m| m.backend.clone())
        })
    }
}

impl LoadBalancer for Fallback {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn next_server(&self, members: &[Member], _ctx: &RequestContext) -> Option<BackendRef> {
        let chosen = self.current(members)?;
        if self.sticky {
            let unchanged = self
                .last
                .load_full()
                .is_some_and(|last| same_backend(&last, &chosen));
            if !unchanged {
                tracing::debug!(backend = %chosen.name(), "Fallback switched backend");
                self.last.store(Some(Arc::new(chosen.clone())));
            }
        }
        Some(chosen)
    }

    /// Load of the backend that would serve next, not of the whole pool.
    fn uptime(&self, members: &[Member]) -> Option<Uptime> {
        self.current(members).and_then(|b| b.uptime())
    }
}
