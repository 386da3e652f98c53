//! DNS-driven pool membership.
//!
//! # Data Flow
//! ```text
//! lookup.rs thread (one per hostname, while warm)
//!     → resolver.rs (blocking getaddrinfo or a test double)
//!     → acl.rs (drop addresses outside the allow-list)
//!     → membership.rs (mark known, create new, reconcile under the pool lock)
//!     → load_balancer::Pool (members added/removed)
//!
//! Administrative calls (update_ips, add_ip, remove_ip)
//!     → membership.rs directly, same locks, same order
//! ```
//!
//! # Design Decisions
//! - Lock order is tracked set, then pool, then per-lookup wake state
//! - Transient resolution failures never shrink the pool
//! - Backends created here are owned here and released exactly once

pub mod acl;
pub mod lookup;
pub mod membership;
pub mod resolver;

pub use acl::AllowList;
pub use lookup::{DnsLookup, LookupState};
pub use membership::{
    parse_service, BackendFactory, BackendTemplate, DefaultFactory, DynamicOptions, DynamicPool,
    ReconcileOutcome,
};
pub use resolver::{AddressResolver, SystemResolver};
