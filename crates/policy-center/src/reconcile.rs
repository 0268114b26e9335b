//! Periodic comparison of the live snapshot against canonical state.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::PolicyDecisionEngine;
use crate::metrics;
use crate::model::normalize;
use crate::store::TxnMode;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileState {
    Idle,
    Comparing,
    Healing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    InSync,
    Healed { revision: u64 },
    /// Canonical state could not be read; retried next period.
    Skipped,
    HealFailed,
}

impl ReconcileOutcome {
    fn label(&self) -> &'static str {
        match self {
            ReconcileOutcome::InSync => "in_sync",
            ReconcileOutcome::Healed { .. } => "healed",
            ReconcileOutcome::Skipped => "skipped",
            ReconcileOutcome::HealFailed => "heal_failed",
        }
    }
}

impl PolicyDecisionEngine {
    pub fn reconcile_state(&self) -> ReconcileState {
        *self.reconcile_state.lock()
    }

    fn set_reconcile_state(&self, state: ReconcileState) {
        *self.reconcile_state.lock() = state;
    }

    /// Runs one compare-and-heal cycle. After a failed heal the engine stays in
    /// [`ReconcileState::Healing`] and later cycles report
    /// [`ReconcileOutcome::HealFailed`] until the divergence is healed or gone.
    pub async fn reconcile_once(&self) -> ReconcileOutcome {
        let outcome = self.reconcile_cycle().await;
        metrics::record_reconcile(outcome.label());
        outcome
    }

    async fn reconcile_cycle(&self) -> ReconcileOutcome {
        let healing = self.reconcile_state() == ReconcileState::Healing;
        if !healing {
            self.set_reconcile_state(ReconcileState::Comparing);
        }
        let canonical = match self.canonical_document().await {
            Ok(document) => document,
            // a known divergence stays in Healing until a comparison settles it
            Err(err) if healing => {
                warn!(%err, "canonical state unreadable while healing");
                return ReconcileOutcome::HealFailed;
            }
            Err(err) => {
                debug!(%err, "skipping reconcile cycle");
                self.set_reconcile_state(ReconcileState::Idle);
                return ReconcileOutcome::Skipped;
            }
        };

        let live = self.active().ok().map(|active| {
            let txn = active.store.begin(TxnMode::Read);
            let mut document = txn.document().clone();
            normalize(&mut document);
            document
        });
        if live.as_ref() == Some(&canonical) {
            self.set_reconcile_state(ReconcileState::Idle);
            return ReconcileOutcome::InSync;
        }

        self.set_reconcile_state(ReconcileState::Healing);
        match self.rebuild().await {
            Ok(revision) => {
                info!(revision, "healed divergent policy snapshot");
                self.set_reconcile_state(ReconcileState::Idle);
                ReconcileOutcome::Healed { revision }
            }
            Err(err) => {
                warn!(%err, "policy heal failed");
                ReconcileOutcome::HealFailed
            }
        }
    }

    /// Runs [`reconcile_once`](Self::reconcile_once) every configured interval.
    /// A failed heal is retried after the heal backoff until it succeeds or the
    /// divergence is gone. The task ends once the engine is dropped.
    pub fn spawn_reconciler(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::downgrade(self);
        let period = self.config.reconcile.interval;
        let backoff = self.config.reconcile.heal_backoff;
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                loop {
                    let Some(engine) = engine.upgrade() else {
                        debug!("policy engine dropped; reconciler exiting");
                        return;
                    };
                    let outcome = engine.reconcile_once().await;
                    drop(engine);
                    if outcome != ReconcileOutcome::HealFailed {
                        break;
                    }
                    sleep(backoff).await;
                }
            }
        })
    }
}
