//! Transactional executor gateway: the only path to side effects.
//!
//! Every command is signature-checked, then runs inside one store
//! transaction that checks idempotency and quota, performs the effect and
//! records it. Duplicates of a committed command come back as `Replayed`.

mod perform;
mod retry;
mod store;

pub use perform::{DispatchPerformer, Effect, Performer, ShellPerformer, SimulatedPerformer};
pub use retry::{AttemptError, RetryPolicy};
pub use store::{ExecutionStore, open_pool};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::command::{CommandEnvelope, CommandSealer, CommandType};
use crate::config::CommandCosts;
use crate::error::Result;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExecutionStatus {
    Executed,
    Replayed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub command_id: String,
    pub idempotency_key: String,
    /// `AX` or `SHELL`.
    pub executor: String,
    pub effect: Effect,
    pub remaining_quota: i64,
    /// Wall-clock commit time of the original execution.
    pub executed_at: String,
}

pub struct ExecutorGateway {
    store: ExecutionStore,
    sealer: CommandSealer,
    performer: Arc<dyn Performer>,
    costs: CommandCosts,
    retry: RetryPolicy,
    inflight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for ExecutorGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorGateway")
            .field("store", &self.store)
            .field("costs", &self.costs)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ExecutorGateway {
    pub fn new(
        store: ExecutionStore,
        sealer: CommandSealer,
        performer: Arc<dyn Performer>,
        costs: CommandCosts,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            sealer,
            performer,
            costs,
            retry,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &ExecutionStore {
        &self.store
    }

    /// Dispatch target for `command_type`, e.g. `AX` or `SHELL`.
    pub fn target(&self, command_type: CommandType) -> &str {
        self.performer.name(command_type)
    }

    /// Execute `envelope` at most once per idempotency key.
    pub async fn execute(&self, envelope: &CommandEnvelope) -> Result<ExecutionResult> {
        self.sealer.verify(envelope)?;

        let key = envelope.idempotency_key.clone();
        let slot = self.inflight_slot(&key);
        let outcome = {
            let _guard = slot.lock().await;
            let cost = self.costs.cost_of(envelope.command_type);
            self.retry
                .run("execute", || {
                    self.store
                        .execute_once(envelope, cost, self.performer.as_ref())
                })
                .await
        };
        self.release_slot(&key, slot);

        match &outcome {
            Ok(result) => tracing::info!(
                command_id = %result.command_id,
                status = %result.status,
                executor = %result.executor,
                remaining_quota = result.remaining_quota,
                "command executed"
            ),
            Err(e) => tracing::warn!(
                command_id = %envelope.command_id,
                error = %e,
                "command not executed"
            ),
        }
        outcome
    }

    /// Per-key lock so duplicates in this process queue up instead of
    /// racing each other into the store.
    fn inflight_slot(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut inflight = self
            .inflight
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(inflight.entry(key.to_string()).or_default())
    }

    fn release_slot(&self, key: &str, slot: Arc<tokio::sync::Mutex<()>>) {
        let mut inflight = self
            .inflight
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // The map's copy plus ours: nobody else is waiting.
        if Arc::strong_count(&slot) == 2 {
            inflight.remove(key);
        }
    }
}
