//! Weighted backend pools with pluggable selection strategies and DNS-driven
//! membership.
//!
//! # Architecture Overview
//!
//! ```text
//!     host worker threads                       one thread per hostname
//!     ───────────────────                       ───────────────────────
//!     Pool::resolve(ctx)                        dynamic::lookup
//!         │ read lock                               │ resolve(host, port)
//!         ▼                                         ▼
//!     load_balancer::Strategy ◀── members ──── dynamic::membership
//!         │                      (write lock)       │ allow-list, generation mark
//!         ▼                                         │
//!     BackendRef (backend or nested pool)           │
//!                                                   │
//!     lifecycle::Registry ── Load/Warm/Cold/Discard ┘ start/stop lookups
//! ```
//!
//! Lock order is enforced at runtime by [`sync`]: membership → pool →
//! strategy cursor → lookup wake state.

pub mod config;
pub mod dynamic;
pub mod error;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod sync;

pub use config::UnidirectorConfig;
pub use error::{DirectorError, DirectorResult};
pub use lifecycle::Registry;
pub use load_balancer::{Pool, RequestContext, Strategy};
