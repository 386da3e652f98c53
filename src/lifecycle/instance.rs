//! Loaded configuration instances and their lifetime references.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// One loaded configuration, identified by name.
///
/// Anything that must keep the configuration alive (a running lookup thread)
/// holds a named [`LifetimeRef`]; the configuration cannot be discarded while
/// references are outstanding.
pub struct ConfigInstance {
    name: String,
    next_id: AtomicU64,
    holders: Mutex<Vec<(u64, String)>>,
}

impl fmt::Debug for ConfigInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigInstance")
            .field("name", &self.name)
            .field("holders", &self.holders())
            .finish()
    }
}

impl ConfigInstance {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            next_id: AtomicU64::new(1),
            holders: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take a reference on behalf of `holder` (e.g. `"DNS lookup"`).
    pub fn acquire(self: &Arc<Self>, holder: impl Into<String>) -> LifetimeRef {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let holder = holder.into();
        tracing::trace!(config = %self.name, holder = %holder, "Configuration reference taken");
        self.holders.lock().push((id, holder));
        LifetimeRef {
            config: self.clone(),
            id,
        }
    }

    /// Names of the current holders.
    pub fn holders(&self) -> Vec<String> {
        self.holders.lock().iter().map(|(_, h)| h.clone()).collect()
    }

    pub fn is_referenced(&self) -> bool {
        !self.holders.lock().is_empty()
    }
}

/// A named reference on a [`ConfigInstance`], released on drop.
pub struct LifetimeRef {
    config: Arc<ConfigInstance>,
    id: u64,
}

impl LifetimeRef {
    pub fn config(&self) -> &Arc<ConfigInstance> {
        &self.config
    }
}

impl fmt::Debug for LifetimeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifetimeRef")
            .field("config", &self.config.name)
            .field("id", &self.id)
            .finish()
    }
}

impl Drop for LifetimeRef {
    fn drop(&mut self) {
        let mut holders = self.config.holders.lock();
        if let Some(pos) = holders.iter().position(|(id, _)| *id == self.id) {
            let (_, holder) = holders.remove(pos);
            tracing::trace!(config = %self.config.name, holder = %holder, "Configuration reference released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_references_are_named_and_released() {
        let config = ConfigInstance::new("boot");
        assert!(!config.is_referenced());

        let a = config.acquire("DNS lookup");
        let b = config.acquire("admin");
        assert_eq!(config.holders(), vec!["DNS lookup", "admin"]);

        drop(a);
        assert_eq!(config.holders(), vec!["admin"]);
        assert_eq!(b.config().name(), "boot");
        drop(b);
        assert!(!config.is_referenced());
    }
}
