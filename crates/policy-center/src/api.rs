use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use policyd_core_types::{Accessor, UserId};
use policyd_event_bus::{Envelope, EventBus};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::canonical::{CanonicalPolicyReader, CanonicalPolicySource, DirectoryService};
use crate::config::EngineConfig;
use crate::decision::DecisionContext;
use crate::errors::PolicyError;
use crate::metrics;
use crate::model::DepartmentPath;
use crate::notifier::{ChangeNotifier, PolicyChange};
use crate::planner;
use crate::reconcile::ReconcileState;
use crate::rules::{NativeRuleEngine, PreparedQuery, RuleEngine};
use crate::store::{PolicyStore, StorePath, TxnMode};

/// Operations a host exposes to the rest of the system.
#[async_trait]
pub trait DecisionEngine: Send + Sync {
    async fn init_policy_data(&self) -> Result<(), PolicyError>;
    async fn incremental_update_policy(
        &self,
        user: &UserId,
        paths: &[DepartmentPath],
    ) -> Result<UpdateOutcome, PolicyError>;
    async fn network_decision(
        &self,
        ctx: &DecisionContext,
        accessor: &Accessor,
    ) -> Result<bool, PolicyError>;
    async fn client_sign_decision(
        &self,
        ctx: &DecisionContext,
        client_type: &str,
    ) -> Result<bool, PolicyError>;
    async fn publish_change(
        &self,
        user: &UserId,
        paths: &[DepartmentPath],
    ) -> Result<(), PolicyError>;
    async fn publish_init(&self) -> Result<(), PolicyError>;
    async fn read_policy_data(&self, path: &StorePath) -> Result<Value, PolicyError>;
}

/// Result of an incremental update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// No department in play holds a relation; nothing was read or written.
    ShortCircuited,
    /// The user's entries already matched.
    Unchanged,
    Applied { patches: usize, revision: u64 },
}

/// A store and the queries compiled against it. Swapped as one unit.
pub(crate) struct ActivePolicy {
    pub(crate) store: Arc<PolicyStore>,
    pub(crate) client: Arc<dyn PreparedQuery>,
    pub(crate) network: Arc<dyn PreparedQuery>,
}

pub struct PolicyDecisionEngine {
    pub(crate) reader: CanonicalPolicyReader,
    pub(crate) rules: Arc<dyn RuleEngine>,
    pub(crate) active: ArcSwapOption<ActivePolicy>,
    pub(crate) mutation: Mutex<()>,
    pub(crate) notifier: ChangeNotifier,
    pub(crate) config: EngineConfig,
    pub(crate) revision: AtomicU64,
    pub(crate) reconcile_state: parking_lot::Mutex<ReconcileState>,
}

impl PolicyDecisionEngine {
    pub fn new(
        source: Arc<dyn CanonicalPolicySource>,
        directory: Arc<dyn DirectoryService>,
        config: EngineConfig,
    ) -> Self {
        let reader = CanonicalPolicyReader::new(source, directory, config.canonical.timeout);
        Self {
            reader,
            rules: Arc::new(NativeRuleEngine),
            active: ArcSwapOption::empty(),
            mutation: Mutex::new(()),
            notifier: ChangeNotifier::disabled(),
            config,
            revision: AtomicU64::new(0),
            reconcile_state: parking_lot::Mutex::new(ReconcileState::Idle),
        }
    }

    pub fn with_rule_engine(mut self, rules: Arc<dyn RuleEngine>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_bus(mut self, bus: Arc<dyn EventBus<Envelope>>) -> Self {
        self.notifier = ChangeNotifier::new(
            bus,
            self.config.notifier.publish_attempts,
            self.config.notifier.publish_backoff,
        );
        self
    }

    /// Performs the first rebuild. A failure here is fatal for the host.
    pub async fn start(self) -> Result<Arc<Self>, PolicyError> {
        let revision = self.rebuild().await.map_err(|err| {
            warn!(%err, "initial policy rebuild failed");
            err
        })?;
        info!(revision, "policy decision engine started");
        Ok(Arc::new(self))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Monotonic counter bumped by every swap and every committed patch set.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    pub(crate) fn active(&self) -> Result<Arc<ActivePolicy>, PolicyError> {
        self.active.load_full().ok_or(PolicyError::NotInitialized)
    }

    /// Forces a full rebuild and announces it.
    pub async fn init_policy_data(&self) -> Result<(), PolicyError> {
        self.rebuild().await?;
        if let Err(err) = self.publish_init().await {
            warn!(%err, "rebuild committed but not announced");
        }
        Ok(())
    }

    /// Brings `user`'s department entries in line with `paths`.
    pub async fn incremental_update_policy(
        &self,
        user: &UserId,
        paths: &[DepartmentPath],
    ) -> Result<UpdateOutcome, PolicyError> {
        let snapshot = self.active()?;
        let touched = {
            let txn = snapshot.store.begin(TxnMode::Read);
            planner::touches_relations(txn.document(), user, paths)
        };
        if !touched {
            debug!(user_id = %user, "update touches no related department");
            metrics::record_update("short_circuit", 0);
            return Ok(UpdateOutcome::ShortCircuited);
        }

        let closure = self
            .reader
            .department_closure(user, paths)
            .await
            .map_err(|err| {
                metrics::record_update("error", 0);
                err
            })?;

        let guard = self.mutation.lock().await;
        let active = self.active()?;
        let store = &active.store;
        let mut txn = store.begin(TxnMode::Write);
        let patches = planner::plan(txn.document(), user, &closure);
        if patches.is_empty() {
            store.abort(txn);
            drop(guard);
            debug!(user_id = %user, "user entries already up to date");
            metrics::record_update("unchanged", 0);
            return Ok(UpdateOutcome::Unchanged);
        }

        for patch in &patches {
            if let Err(err) = store.apply(&mut txn, patch) {
                store.abort(txn);
                warn!(user_id = %user, %patch, %err, "aborting incremental update");
                metrics::record_update("error", 0);
                return Err(err);
            }
        }
        if let Err(err) = store.commit(txn) {
            warn!(user_id = %user, %err, "incremental update commit failed");
            metrics::record_update("error", 0);
            return Err(err);
        }
        let revision = self.revision.fetch_add(1, Ordering::AcqRel) + 1;
        drop(guard);

        metrics::record_update("applied", patches.len());
        metrics::set_generation(revision);
        info!(
            user_id = %user,
            revision,
            patches = patches.len(),
            "applied incremental policy update"
        );

        if self.config.notifier.publish_on_mutation {
            if let Err(err) = self.publish_change(user, paths).await {
                warn!(user_id = %user, %err, "update committed but not announced");
            }
        }
        Ok(UpdateOutcome::Applied {
            patches: patches.len(),
            revision,
        })
    }

    pub async fn publish_change(
        &self,
        user: &UserId,
        paths: &[DepartmentPath],
    ) -> Result<(), PolicyError> {
        let change = PolicyChange::AccessorUpdated {
            user_id: user.clone(),
            department_paths: paths.to_vec(),
        };
        self.notifier.publish(change).await?;
        Ok(())
    }

    pub async fn publish_init(&self) -> Result<(), PolicyError> {
        self.notifier.publish(PolicyChange::Rebuilt).await?;
        Ok(())
    }

    /// Raw view of the live snapshot at `path`.
    pub async fn read_policy_data(&self, path: &StorePath) -> Result<Value, PolicyError> {
        let active = self.active()?;
        let txn = active.store.begin(TxnMode::Read);
        active.store.read(&txn, path)
    }
}

#[async_trait]
impl DecisionEngine for PolicyDecisionEngine {
    async fn init_policy_data(&self) -> Result<(), PolicyError> {
        PolicyDecisionEngine::init_policy_data(self).await
    }

    async fn incremental_update_policy(
        &self,
        user: &UserId,
        paths: &[DepartmentPath],
    ) -> Result<UpdateOutcome, PolicyError> {
        PolicyDecisionEngine::incremental_update_policy(self, user, paths).await
    }

    async fn network_decision(
        &self,
        ctx: &DecisionContext,
        accessor: &Accessor,
    ) -> Result<bool, PolicyError> {
        PolicyDecisionEngine::network_decision(self, ctx, accessor).await
    }

    async fn client_sign_decision(
        &self,
        ctx: &DecisionContext,
        client_type: &str,
    ) -> Result<bool, PolicyError> {
        PolicyDecisionEngine::client_sign_decision(self, ctx, client_type).await
    }

    async fn publish_change(
        &self,
        user: &UserId,
        paths: &[DepartmentPath],
    ) -> Result<(), PolicyError> {
        PolicyDecisionEngine::publish_change(self, user, paths).await
    }

    async fn publish_init(&self) -> Result<(), PolicyError> {
        PolicyDecisionEngine::publish_init(self).await
    }

    async fn read_policy_data(&self, path: &StorePath) -> Result<Value, PolicyError> {
        PolicyDecisionEngine::read_policy_data(self, path).await
    }
}
