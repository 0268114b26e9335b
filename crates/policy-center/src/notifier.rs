use std::sync::Arc;
use std::time::Duration;

use policyd_core_types::UserId;
use policyd_event_bus::{BusError, Envelope, EventBus};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::metrics;
use crate::model::DepartmentPath;

pub const TOPIC_INITIALIZED: &str = "policy data initialized";
pub const TOPIC_UPDATED: &str = "policy data updated";

/// Change record announced to other replicas and consumers.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyChange {
    AccessorUpdated {
        user_id: UserId,
        department_paths: Vec<DepartmentPath>,
    },
    Rebuilt,
}

impl PolicyChange {
    pub fn topic(&self) -> &'static str {
        match self {
            PolicyChange::AccessorUpdated { .. } => TOPIC_UPDATED,
            PolicyChange::Rebuilt => TOPIC_INITIALIZED,
        }
    }
}

#[derive(Clone)]
pub struct ChangeNotifier {
    bus: Option<Arc<dyn EventBus<Envelope>>>,
    attempts: u32,
    backoff: Duration,
}

impl ChangeNotifier {
    pub fn new(bus: Arc<dyn EventBus<Envelope>>, attempts: u32, backoff: Duration) -> Self {
        Self {
            bus: Some(bus),
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Notifier that drops every change; used when no outbound channel is wired.
    pub fn disabled() -> Self {
        Self {
            bus: None,
            attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.bus.is_some()
    }

    /// Publishes `change`, retrying transient failures. A bus without
    /// subscribers counts as delivered.
    pub async fn publish(&self, change: PolicyChange) -> Result<(), BusError> {
        let Some(bus) = &self.bus else {
            return Ok(());
        };
        let topic = change.topic();
        let payload =
            serde_json::to_value(&change).map_err(|err| BusError::Encode(err.to_string()))?;
        let envelope = Envelope::new(topic, payload);

        let mut attempt = 1;
        loop {
            match bus.publish(envelope.clone()).await {
                Ok(()) => return Ok(()),
                Err(BusError::NoSubscribers(_)) => {
                    debug!(topic, "policy change published with no subscribers");
                    return Ok(());
                }
                Err(err) if attempt < self.attempts => {
                    debug!(topic, attempt, %err, "retrying policy change publication");
                    attempt += 1;
                    sleep(self.backoff).await;
                }
                Err(err) => {
                    metrics::record_publish_failure(topic);
                    warn!(
                        topic,
                        attempts = attempt,
                        %err,
                        "giving up on policy change publication"
                    );
                    return Err(err);
                }
            }
        }
    }
}
