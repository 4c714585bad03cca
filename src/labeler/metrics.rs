//! Prometheus metrics for the labeler
//!
//! # Exported metrics
//! - `mongo_labeler_cycles_total` (counter): completed cycles labeled by outcome.
//! - `mongo_labeler_cycle_duration_seconds` (histogram): wall time of one cycle.
//! - `mongo_labeler_discovered_members` (gauge): members found by the last discovery, 0 when it failed.
//! - `mongo_labeler_probes_total` (counter): probe results labeled by role.
//! - `mongo_labeler_label_patches_total` (counter): patch attempts labeled by outcome.

use std::sync::atomic::{AtomicI64, AtomicU64};

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

use super::probe::Role;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    /// e.g. "ok", "discovery_failed", "failed", "dry_run", "skipped"
    pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RoleLabels {
    pub role: String,
}

pub static CYCLES_TOTAL: Lazy<Family<OutcomeLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static CYCLE_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    // 10ms .. ~5min across 16 buckets.
    Histogram::new(exponential_buckets(0.01, 2.0, 16))
});

pub static DISCOVERED_MEMBERS: Lazy<Gauge<i64, AtomicI64>> = Lazy::new(Gauge::default);

pub static PROBES_TOTAL: Lazy<Family<RoleLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static LABEL_PATCHES_TOTAL: Lazy<Family<OutcomeLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "mongo_labeler_cycles",
        "Number of reconciliation cycles by outcome",
        CYCLES_TOTAL.clone(),
    );
    registry.register(
        "mongo_labeler_cycle_duration_seconds",
        "Duration of one reconciliation cycle in seconds",
        CYCLE_DURATION_SECONDS.clone(),
    );
    registry.register(
        "mongo_labeler_discovered_members",
        "Replica set members found by the last discovery, 0 when it failed",
        DISCOVERED_MEMBERS.clone(),
    );
    registry.register(
        "mongo_labeler_probes",
        "Role probe results by role",
        PROBES_TOTAL.clone(),
    );
    registry.register(
        "mongo_labeler_label_patches",
        "Role label patch attempts by outcome",
        LABEL_PATCHES_TOTAL.clone(),
    );

    registry
});

pub fn inc_cycle(outcome: &str) {
    CYCLES_TOTAL
        .get_or_create(&OutcomeLabels {
            outcome: outcome.to_string(),
        })
        .inc();
}

pub fn observe_cycle_duration_seconds(seconds: f64) {
    CYCLE_DURATION_SECONDS.observe(seconds);
}

pub fn set_discovered_members(count: usize) {
    DISCOVERED_MEMBERS.set(count as i64);
}

pub fn inc_probes(role: Role, count: usize) {
    PROBES_TOTAL
        .get_or_create(&RoleLabels {
            role: role.to_string(),
        })
        .inc_by(count as u64);
}

pub fn inc_label_patches(outcome: &str, count: usize) {
    LABEL_PATCHES_TOTAL
        .get_or_create(&OutcomeLabels {
            outcome: outcome.to_string(),
        })
        .inc_by(count as u64);
}

/// Render the registry in the OpenMetrics text format
pub fn encode_metrics() -> Result<String, std::fmt::Error> {
    let mut buffer = String::new();
    prometheus_client::encoding::text::encode(&mut buffer, &REGISTRY)?;
    Ok(buffer)
}
