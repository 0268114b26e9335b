//! Full snapshot rebuilds from the canonical source.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::api::{ActivePolicy, PolicyDecisionEngine};
use crate::errors::PolicyError;
use crate::metrics;
use crate::model::normalize;
use crate::rules::{CLIENT_ADMISSION, NETWORK_ADMISSION};
use crate::store::PolicyStore;

impl PolicyDecisionEngine {
    /// Canonical document in normalized form, without touching the active snapshot.
    pub(crate) async fn canonical_document(&self) -> Result<Value, PolicyError> {
        let document = self.reader.read_document().await?;
        let mut value = document.to_value()?;
        normalize(&mut value);
        Ok(value)
    }

    fn compile(&self, document: Value) -> Result<ActivePolicy, PolicyError> {
        let store = Arc::new(PolicyStore::new(document));
        let client = self.rules.compile(CLIENT_ADMISSION, Arc::clone(&store))?;
        let network = self.rules.compile(NETWORK_ADMISSION, Arc::clone(&store))?;
        Ok(ActivePolicy {
            store,
            client,
            network,
        })
    }

    /// Reads canonical state, compiles a fresh store and swaps it in.
    /// On failure the prior snapshot stays active.
    pub(crate) async fn rebuild(&self) -> Result<u64, PolicyError> {
        let prepared = match self.canonical_document().await {
            Ok(document) => self.compile(document),
            Err(err) => Err(err),
        };
        let prepared = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                warn!(%err, "policy rebuild failed; keeping the previous snapshot");
                metrics::record_rebuild("error");
                return Err(err);
            }
        };

        let guard = self.mutation.lock().await;
        self.active.store(Some(Arc::new(prepared)));
        let revision = self.revision.fetch_add(1, Ordering::AcqRel) + 1;
        drop(guard);

        metrics::record_rebuild("ok");
        metrics::set_generation(revision);
        info!(revision, "policy snapshot rebuilt");
        Ok(revision)
    }
}
