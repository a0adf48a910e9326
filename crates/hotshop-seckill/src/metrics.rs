//! Admission and order pipeline counters.

use metrics::counter;

/// Metric names as constants for consistency.
pub mod names {
    pub const ADMISSIONS_TOTAL: &str = "hotshop_seckill_admissions_total";
    pub const PUBLISH_FAILURES_TOTAL: &str = "hotshop_seckill_publish_failures_total";
    pub const COMPENSATIONS_TOTAL: &str = "hotshop_seckill_compensations_total";
    pub const ORDERS_TOTAL: &str = "hotshop_seckill_orders_total";
    pub const REDELIVERIES_TOTAL: &str = "hotshop_seckill_redeliveries_total";
}

/// Record an admission decision: `granted`, `out_of_stock` or `duplicate`.
pub fn record_admission(outcome: &'static str) {
    counter!(names::ADMISSIONS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_publish_failure() {
    counter!(names::PUBLISH_FAILURES_TOTAL).increment(1);
}

/// Record a compensation attempt: `released`, `not_reserved` or `failed`.
pub fn record_compensation(outcome: &'static str) {
    counter!(names::COMPENSATIONS_TOTAL, "outcome" => outcome).increment(1);
}

/// Record a consumed intent: `persisted`, `duplicate`, `out_of_stock`,
/// `malformed`, `requeued` or `failed`.
pub fn record_order(outcome: &'static str) {
    counter!(names::ORDERS_TOTAL, "outcome" => outcome).increment(1);
}

/// Record deliveries moved back to the ready queue.
pub fn record_redeliveries(count: usize) {
    counter!(names::REDELIVERIES_TOTAL).increment(count as u64);
}
