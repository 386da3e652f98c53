//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Load event → Build pools → Register lookups
//!
//! Host events (registry.rs):
//!     Warm → start lookups    Cold → stop lookups    Discard → drop entries
//!
//! Shutdown (shutdown.rs):
//!     Cold (if warm) → Discard → Drop pools
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then pools, then lookups (started on Warm)
//! - A configuration cannot be discarded while anything still holds a reference to it

pub mod instance;
pub mod registry;
pub mod shutdown;
pub mod startup;

pub use instance::{ConfigInstance, LifetimeRef};
pub use registry::{Event, LookupInfo, Phase, Registry, StatsCluster};
pub use shutdown::teardown;
pub use startup::{build_topology, Topology};
