use lazy_static::lazy_static;
use prometheus::{core::Collector, opts, IntCounter, IntCounterVec, IntGauge, Registry};
use tracing::error;

lazy_static! {
    static ref POLICY_REBUILDS: IntCounterVec = IntCounterVec::new(
        opts!("policyd_rebuilds_total", "Full policy rebuilds grouped by outcome"),
        &["outcome"]
    )
    .unwrap();
    static ref POLICY_UPDATES: IntCounterVec = IntCounterVec::new(
        opts!(
            "policyd_incremental_updates_total",
            "Incremental user updates grouped by outcome"
        ),
        &["outcome"]
    )
    .unwrap();
    static ref POLICY_PATCHES_APPLIED: IntCounter = IntCounter::new(
        "policyd_patches_applied_total",
        "Patch operations committed to the policy store",
    )
    .unwrap();
    static ref POLICY_RECONCILE_CYCLES: IntCounterVec = IntCounterVec::new(
        opts!(
            "policyd_reconcile_cycles_total",
            "Reconciler cycles grouped by outcome"
        ),
        &["outcome"]
    )
    .unwrap();
    static ref POLICY_DECISIONS: IntCounterVec = IntCounterVec::new(
        opts!("policyd_decisions_total", "Admission decisions by kind and result"),
        &["kind", "result"]
    )
    .unwrap();
    static ref POLICY_PUBLISH_FAILURES: IntCounterVec = IntCounterVec::new(
        opts!(
            "policyd_publish_failures_total",
            "Change notifications that exhausted their retries"
        ),
        &["topic"]
    )
    .unwrap();
    static ref POLICY_GENERATION: IntGauge = IntGauge::new(
        "policyd_snapshot_generation",
        "Generation of the active policy snapshot"
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register policy metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, POLICY_REBUILDS.clone());
    register(registry, POLICY_UPDATES.clone());
    register(registry, POLICY_PATCHES_APPLIED.clone());
    register(registry, POLICY_RECONCILE_CYCLES.clone());
    register(registry, POLICY_DECISIONS.clone());
    register(registry, POLICY_PUBLISH_FAILURES.clone());
    register(registry, POLICY_GENERATION.clone());
}

pub fn record_rebuild(outcome: &str) {
    POLICY_REBUILDS.with_label_values(&[outcome]).inc();
}

pub fn record_update(outcome: &str, patches: usize) {
    POLICY_UPDATES.with_label_values(&[outcome]).inc();
    POLICY_PATCHES_APPLIED.inc_by(patches as u64);
}

pub fn record_reconcile(outcome: &str) {
    POLICY_RECONCILE_CYCLES.with_label_values(&[outcome]).inc();
}

pub fn record_decision(kind: &str, result: &Result<bool, crate::errors::PolicyError>) {
    let label = match result {
        Ok(true) => "allow",
        Ok(false) => "deny",
        Err(_) => "error",
    };
    POLICY_DECISIONS.with_label_values(&[kind, label]).inc();
}

pub fn record_publish_failure(topic: &str) {
    POLICY_PUBLISH_FAILURES.with_label_values(&[topic]).inc();
}

pub fn set_generation(generation: u64) {
    POLICY_GENERATION.set(generation as i64);
}
