pub mod api;
pub mod canonical;
pub mod config;
pub mod decision;
pub mod errors;
pub mod loader;
pub mod memory;
pub mod metrics;
pub mod model;
pub mod network;
pub mod notifier;
pub mod planner;
mod rebuild;
pub mod reconcile;
pub mod rules;
pub mod store;

pub use api::{DecisionEngine, PolicyDecisionEngine, UpdateOutcome};
pub use canonical::{CanonicalPolicyReader, CanonicalPolicySource, DirectoryService};
pub use config::{ConfigSource, EngineConfig};
pub use decision::DecisionContext;
pub use errors::{ErrorKind, PolicyError};
pub use loader::{load_config, load_config_with_options, LoadOptions};
pub use memory::{CanonicalState, InMemoryCanonicalSource, InMemoryDirectory};
pub use model::{
    AccessorNetworkRelation, ClientRestrictionPolicy, DepartmentPath, NetworkDefinition,
    PolicyDocument,
};
pub use notifier::{ChangeNotifier, PolicyChange, TOPIC_INITIALIZED, TOPIC_UPDATED};
pub use reconcile::{ReconcileOutcome, ReconcileState};
pub use rules::{NativeRuleEngine, PreparedQuery, Program, RuleEngine};
pub use store::{PatchOp, PatchOperation, PolicyStore, StorePath, TxnMode};

#[cfg(test)]
mod tests;
