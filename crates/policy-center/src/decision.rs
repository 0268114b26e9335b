use std::net::IpAddr;
use std::time::{Duration, Instant};

use policyd_core_types::{Accessor, ClientKind};
use serde_json::Value;

use crate::api::PolicyDecisionEngine;
use crate::errors::PolicyError;
use crate::metrics;
use crate::rules::{NetworkInput, Program, ResultSet, CLIENT_ADMISSION, NETWORK_ADMISSION};

/// Per-call information supplied by the caller's transport.
#[derive(Clone, Copy, Debug)]
pub struct DecisionContext {
    pub source_addr: IpAddr,
    pub deadline: Option<Instant>,
}

impl DecisionContext {
    pub fn new(source_addr: IpAddr) -> Self {
        Self {
            source_addr,
            deadline: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    fn check_deadline(&self, program: Program) -> Result<(), PolicyError> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Err(PolicyError::DeadlineExceeded(program.to_string()))
            }
            _ => Ok(()),
        }
    }
}

fn single_value(program: Program, results: ResultSet) -> Result<Value, PolicyError> {
    let mut results = results.into_iter();
    match (results.next(), results.next()) {
        (Some(value), None) => Ok(value),
        (None, _) => Err(PolicyError::Evaluation(format!(
            "{program} produced no result"
        ))),
        (Some(_), Some(_)) => Err(PolicyError::Evaluation(format!(
            "{program} produced more than one result"
        ))),
    }
}

impl PolicyDecisionEngine {
    /// Whether `accessor` may connect from the context's source address.
    pub async fn network_decision(
        &self,
        ctx: &DecisionContext,
        accessor: &Accessor,
    ) -> Result<bool, PolicyError> {
        let result = self.evaluate_network(ctx, accessor);
        metrics::record_decision("network", &result);
        result
    }

    fn evaluate_network(
        &self,
        ctx: &DecisionContext,
        accessor: &Accessor,
    ) -> Result<bool, PolicyError> {
        let active = self.active()?;
        ctx.check_deadline(NETWORK_ADMISSION)?;
        let input = serde_json::to_value(NetworkInput {
            accessor: accessor.clone(),
            address: ctx.source_addr,
        })
        .map_err(|err| PolicyError::Evaluation(err.to_string()))?;
        let value = single_value(NETWORK_ADMISSION, active.network.eval(&input)?)?;
        value.as_bool().ok_or_else(|| {
            PolicyError::Evaluation(format!("{NETWORK_ADMISSION} returned non-boolean {value}"))
        })
    }

    /// Whether clients of `client_type` may sign in.
    pub async fn client_sign_decision(
        &self,
        ctx: &DecisionContext,
        client_type: &str,
    ) -> Result<bool, PolicyError> {
        let result = self.evaluate_client(ctx, client_type);
        metrics::record_decision("client", &result);
        result
    }

    fn evaluate_client(
        &self,
        ctx: &DecisionContext,
        client_type: &str,
    ) -> Result<bool, PolicyError> {
        let kind: ClientKind = client_type.parse().map_err(|_| {
            PolicyError::CallerInput(format!("unknown client type '{client_type}'"))
        })?;
        let active = self.active()?;
        ctx.check_deadline(CLIENT_ADMISSION)?;
        let value = single_value(CLIENT_ADMISSION, active.client.eval(&Value::Null)?)?;
        value
            .get(kind.as_str())
            .and_then(Value::as_bool)
            .ok_or_else(|| {
                PolicyError::Evaluation(format!(
                    "{CLIENT_ADMISSION} has no boolean entry for '{kind}'"
                ))
            })
    }
}
