//! Cache, lock and refresher counters.
//!
//! Only the `metrics` facade is used here; the binary installs the recorder.

use metrics::counter;

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "hotshop_cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "hotshop_cache_misses_total";
    pub const CACHE_FILLS_TOTAL: &str = "hotshop_cache_fills_total";

    pub const LOCK_ACQUIRE_TOTAL: &str = "hotshop_lock_acquire_total";
    pub const LOCK_RELEASE_TOTAL: &str = "hotshop_lock_release_total";

    pub const REFRESH_TASKS_TOTAL: &str = "hotshop_refresh_tasks_total";
}

/// Record a cache hit. `kind` is `value`, `negative` or `stale`.
pub fn record_cache_hit(strategy: &'static str, kind: &'static str) {
    counter!(names::CACHE_HITS_TOTAL, "strategy" => strategy, "kind" => kind).increment(1);
}

pub fn record_cache_miss(strategy: &'static str) {
    counter!(names::CACHE_MISSES_TOTAL, "strategy" => strategy).increment(1);
}

/// Record a fill from the system of record. `kind` is `value` or `negative`.
pub fn record_cache_fill(strategy: &'static str, kind: &'static str) {
    counter!(names::CACHE_FILLS_TOTAL, "strategy" => strategy, "kind" => kind).increment(1);
}

pub fn record_lock_acquire(granted: bool) {
    let outcome = if granted { "granted" } else { "denied" };
    counter!(names::LOCK_ACQUIRE_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_lock_release(outcome: &'static str) {
    counter!(names::LOCK_RELEASE_TOTAL, "outcome" => outcome).increment(1);
}

/// Record a refresh task event: `submitted`, `dropped`, `executed` or `failed`.
pub fn record_refresh(event: &'static str) {
    counter!(names::REFRESH_TASKS_TOTAL, "event" => event).increment(1);
}
