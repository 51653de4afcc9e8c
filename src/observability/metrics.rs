//! # Metrics
//!
//! Prometheus metrics for monitoring the operator.
//!
//! ## Metrics Exposed
//!
//! - `aqua_operator_reconciliations_total{kind}` - Reconciliation passes
//! - `aqua_operator_reconciliation_errors_total{kind}` - Passes that returned an error
//! - `aqua_operator_reconciliation_duration_seconds{kind}` - Pass duration
//! - `aqua_operator_child_sync_total{kind, outcome}` - Child synchronizations by outcome
//! - `aqua_operator_requeues_total{reason}` - Scheduled passes by reason
//! - `aqua_operator_status_write_failures_total{kind}` - Best-effort status writes that failed
//! - `aqua_operator_entity_state{kind, namespace, name, state}` - 1 for the current state of an entity
//! - `aqua_operator_watch_restarts_total{kind}` - Controller watch stream restarts

use crate::crd::LifecycleState;
use anyhow::Result;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "aqua_operator_reconciliations_total",
            "Total number of reconciliation passes",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "aqua_operator_reconciliation_errors_total",
            "Total number of reconciliation passes that failed",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "aqua_operator_reconciliation_duration_seconds",
            "Duration of reconciliation passes in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static CHILD_SYNC_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "aqua_operator_child_sync_total",
            "Total number of child synchronizations by child kind and outcome",
        ),
        &["kind", "outcome"],
    )
    .expect("Failed to create CHILD_SYNC_TOTAL metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "aqua_operator_requeues_total",
            "Total number of scheduled passes by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static STATUS_WRITE_FAILURES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "aqua_operator_status_write_failures_total",
            "Total number of status writes that failed",
        ),
        &["kind"],
    )
    .expect("Failed to create STATUS_WRITE_FAILURES_TOTAL metric - this should never happen")
});

static ENTITY_STATE: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "aqua_operator_entity_state",
            "Current lifecycle state of each entity (1 for the active state)",
        ),
        &["kind", "namespace", "name", "state"],
    )
    .expect("Failed to create ENTITY_STATE metric - this should never happen")
});

static WATCH_RESTARTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "aqua_operator_watch_restarts_total",
            "Total number of controller watch stream restarts",
        ),
        &["kind"],
    )
    .expect("Failed to create WATCH_RESTARTS_TOTAL metric - this should never happen")
});

const ALL_STATES: [LifecycleState; 6] = [
    LifecycleState::Pending,
    LifecycleState::WaitingForDependency,
    LifecycleState::WaitingForPeers,
    LifecycleState::UpdateInProgress,
    LifecycleState::UpdatePendingApproval,
    LifecycleState::Running,
];

/// Register all metrics with the registry
///
/// # Errors
///
/// Returns an error if a metric is registered twice.
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(CHILD_SYNC_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STATUS_WRITE_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ENTITY_STATE.clone()))?;
    REGISTRY.register(Box::new(WATCH_RESTARTS_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations(kind: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_reconciliation_errors(kind: &str) {
    RECONCILIATION_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn observe_reconciliation_duration(kind: &str, duration: f64) {
    RECONCILIATION_DURATION
        .with_label_values(&[kind])
        .observe(duration);
}

pub fn increment_child_sync(kind: &str, outcome: &str) {
    CHILD_SYNC_TOTAL.with_label_values(&[kind, outcome]).inc();
}

pub fn increment_requeues(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn increment_status_write_failures(kind: &str) {
    STATUS_WRITE_FAILURES_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_watch_restarts(kind: &str) {
    WATCH_RESTARTS_TOTAL.with_label_values(&[kind]).inc();
}

/// Mark `state` as the active state of one entity
pub fn set_entity_state(kind: &str, namespace: &str, name: &str, state: LifecycleState) {
    for candidate in ALL_STATES {
        ENTITY_STATE
            .with_label_values(&[kind, namespace, name, candidate.as_str()])
            .set(i64::from(candidate == state));
    }
}

/// Drop the state series of a deleted entity
pub fn clear_entity_state(kind: &str, namespace: &str, name: &str) {
    for candidate in ALL_STATES {
        let _ = ENTITY_STATE.remove_label_values(&[kind, namespace, name, candidate.as_str()]);
    }
}

/// Text exposition of every registered metric
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn gather() -> Result<String> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
