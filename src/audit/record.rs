use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::canon::ExistenceVerdict;
use crate::command::CommandEnvelope;
use crate::command::canonical::{self, HashDomain};
use crate::error::StopReason;
use crate::executor::ExecutionResult;
use crate::intent::{Intent, Provenance};
use crate::policy::{PolicyContext, PolicyDecision, RateKey, Reservation};
use crate::state::{Delta, ProjectedState, Snapshot};

/// Previous-hash value of the first record in a chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuditPhase {
    /// Written before anything executes.
    Decision,
    /// Written after the executor gateway returned.
    Outcome,
}

/// One append-only ledger entry.
///
/// `determinism_hash` covers what was decided and excludes time and chain
/// position. `record_hash` covers every field, including `prev_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub seq: u64,
    pub timestamp: String,
    pub phase: AuditPhase,
    pub principal: String,
    pub state_before: Option<Snapshot>,
    pub state_before_hash: Option<String>,
    pub delta: Option<Delta>,
    pub projected_state: Option<ProjectedState>,
    pub verdict: Option<ExistenceVerdict>,
    pub intent: Option<Intent>,
    pub policy_context: Option<PolicyContext>,
    pub policy_decision: Option<PolicyDecision>,
    pub command: Option<CommandEnvelope>,
    pub execution: Option<ExecutionResult>,
    pub state_after_hash: Option<String>,
    pub stop_reason: Option<StopReason>,
    pub provenance: Option<Provenance>,
    pub determinism_hash: String,
    pub prev_hash: String,
    pub record_hash: String,
}

impl AuditRecord {
    /// Empty record for `principal`; the ledger fills in the chain fields.
    pub fn draft(phase: AuditPhase, principal: impl Into<String>) -> Self {
        Self {
            seq: 0,
            timestamp: String::new(),
            phase,
            principal: principal.into(),
            state_before: None,
            state_before_hash: None,
            delta: None,
            projected_state: None,
            verdict: None,
            intent: None,
            policy_context: None,
            policy_decision: None,
            command: None,
            execution: None,
            state_after_hash: None,
            stop_reason: None,
            provenance: None,
            determinism_hash: String::new(),
            prev_hash: String::new(),
            record_hash: String::new(),
        }
    }

    pub fn compute_determinism_hash(&self) -> String {
        let execution = self.execution.as_ref().map(|e| {
            json!({
                "status": e.status,
                "command_id": e.command_id,
                "executor": e.executor,
                "effect": e.effect,
            })
        });
        canonical::hash_value(
            HashDomain::Determinism,
            &json!({
                "phase": self.phase,
                "principal": self.principal,
                "state_before_hash": self.state_before_hash,
                "delta": self.delta.map(Delta::mask),
                "projected_state": self.projected_state.map(ProjectedState::code),
                "verdict": self.verdict,
                "intent": self.intent,
                "confirmed": self.policy_context.as_ref().map(|c| c.confirmed),
                "policy_decision": self.policy_decision,
                "command": self.command.as_ref().map(|c| c.content_hash.as_str()),
                "execution": execution,
                "state_after_hash": self.state_after_hash,
                "stop_reason": self.stop_reason,
            }),
        )
    }

    /// Chain link over every field except `record_hash` itself.
    pub fn compute_record_hash(&self) -> String {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.remove("record_hash");
        }
        canonical::hash_value(HashDomain::Record, &value)
    }

    /// The rate-limit slot an allowed decision record took, if any.
    pub fn reservation(&self) -> Option<Reservation> {
        if self.phase != AuditPhase::Decision {
            return None;
        }
        let decision = self.policy_decision.as_ref().filter(|d| d.is_allow())?;
        let ctx = self.policy_context.as_ref()?;
        let command_type = self.intent.as_ref()?.command_type?;
        Some(Reservation {
            key: RateKey {
                principal: decision.principal.clone(),
                command_type,
            },
            at_ms: ctx.evaluated_at_ms,
        })
    }

    /// Fill the chain fields. Called by the ledger under its writer lock.
    pub(super) fn seal(&mut self, seq: u64, timestamp: String, prev_hash: &str) {
        self.seq = seq;
        self.timestamp = timestamp;
        self.prev_hash = prev_hash.to_string();
        self.determinism_hash = self.compute_determinism_hash();
        self.record_hash = self.compute_record_hash();
    }
}

/// Content address of the projected successor state.
pub fn state_after_hash(state_before_hash: &str, projected: ProjectedState) -> String {
    canonical::hash_value(
        HashDomain::StateAfter,
        &json!({
            "state_before_hash": state_before_hash,
            "projected_state": projected.code(),
        }),
    )
}
