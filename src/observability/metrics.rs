//! Metrics collection.
//!
//! # Responsibilities
//! - Define director metrics and their descriptions
//! - Keep metric names and label sets in one place
//!
//! # Metrics
//! - `unidirector_picks_total` (counter): successful selections by pool, strategy
//! - `unidirector_no_backend_total` (counter): selections that found nothing, by pool
//! - `unidirector_dns_lookups_total` (counter): resolution passes by host, outcome
//! - `unidirector_dynamic_backends_added_total` (counter): by pool
//! - `unidirector_dynamic_backends_removed_total` (counter): by pool
//! - `unidirector_acl_rejections_total` (counter): addresses refused by the allow-list, by pool
//! - `unidirector_pool_members` (gauge): current member count by pool
//!
//! # Design Decisions
//! - Thin wrappers over the `metrics` facade; recording without a recorder is a no-op
//! - Descriptions are registered once, when the registry namespace is created

use metrics::{counter, describe_counter, describe_gauge, gauge};

pub const PICKS_TOTAL: &str = "unidirector_picks_total";
pub const NO_BACKEND_TOTAL: &str = "unidirector_no_backend_total";
pub const DNS_LOOKUPS_TOTAL: &str = "unidirector_dns_lookups_total";
pub const DYNAMIC_ADDED_TOTAL: &str = "unidirector_dynamic_backends_added_total";
pub const DYNAMIC_REMOVED_TOTAL: &str = "unidirector_dynamic_backends_removed_total";
pub const ACL_REJECTIONS_TOTAL: &str = "unidirector_acl_rejections_total";
pub const POOL_MEMBERS: &str = "unidirector_pool_members";

/// Outcome label of a DNS resolution pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOutcome {
    Success,
    Failure,
}

impl LookupOutcome {
    fn as_str(self) -> &'static str {
        match self {
            LookupOutcome::Success => "success",
            LookupOutcome::Failure => "failure",
        }
    }
}

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(PICKS_TOTAL, "Backends selected, by pool and strategy");
    describe_counter!(NO_BACKEND_TOTAL, "Selections that found no healthy backend");
    describe_counter!(DNS_LOOKUPS_TOTAL, "DNS resolution passes, by host and outcome");
    describe_counter!(DYNAMIC_ADDED_TOTAL, "Backends added from DNS results");
    describe_counter!(DYNAMIC_REMOVED_TOTAL, "Backends removed after leaving DNS results");
    describe_counter!(ACL_REJECTIONS_TOTAL, "Resolved addresses refused by the allow-list");
    describe_gauge!(POOL_MEMBERS, "Current number of pool members");
}

pub fn record_pick(pool: &str, strategy: &'static str) {
    counter!(PICKS_TOTAL, "pool" => pool.to_string(), "strategy" => strategy).increment(1);
}

pub fn record_no_backend(pool: &str) {
    counter!(NO_BACKEND_TOTAL, "pool" => pool.to_string()).increment(1);
}

pub fn record_lookup(host: &str, outcome: LookupOutcome) {
    counter!(DNS_LOOKUPS_TOTAL, "host" => host.to_string(), "outcome" => outcome.as_str())
        .increment(1);
}

pub fn record_dynamic_changes(pool: &str, added: usize, removed: usize) {
    if added > 0 {
        counter!(DYNAMIC_ADDED_TOTAL, "pool" => pool.to_string()).increment(added as u64);
    }
    if removed > 0 {
        counter!(DYNAMIC_REMOVED_TOTAL, "pool" => pool.to_string()).increment(removed as u64);
    }
}

pub fn record_acl_rejection(pool: &str) {
    counter!(ACL_REJECTIONS_TOTAL, "pool" => pool.to_string()).increment(1);
}

pub fn record_pool_members(pool: &str, count: usize) {
    gauge!(POOL_MEMBERS, "pool" => pool.to_string()).set(count as f64);
}
