//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pools, strategies, DNS lookups produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters and gauges through the metrics facade)
//!
//! Consumers:
//!     → stdout (pretty or JSON lines)
//!     → whatever recorder the host installs
//! ```
//!
//! # Design Decisions
//! - Structured fields on every event (pool, backend, host)
//! - Metric updates are cheap no-ops until a recorder is installed
//! - No exporter here; exposition belongs to the host process

pub mod logging;
pub mod metrics;
