use std::sync::Arc;

use super::canonical::{self, HashDomain};
use super::envelope::{CommandEnvelope, PolicyStamp, idempotency_key};
use super::signer::DeviceSigner;
use crate::error::{GateError, Result};
use crate::intent::Intent;
use crate::policy::{PolicyDecision, PolicyRule, Verdict};

/// Builds signed envelopes for allowed intents and checks envelopes
/// presented back for execution.
#[derive(Debug, Clone)]
pub struct CommandSealer {
    signer: Arc<DeviceSigner>,
}

impl CommandSealer {
    pub fn new(signer: Arc<DeviceSigner>) -> Self {
        Self { signer }
    }

    pub fn device_id(&self) -> &str {
        self.signer.device_id()
    }

    /// Seal `intent` against `state_hash`. Only an Allow decision seals.
    pub fn seal(
        &self,
        intent: &Intent,
        decision: &PolicyDecision,
        state_hash: &str,
    ) -> Result<CommandEnvelope> {
        if decision.verdict != Verdict::Allow {
            return Err(GateError::PolicyDenied {
                rule: decision.rule.unwrap_or(PolicyRule::SurfaceAllowlist),
                reason: decision.reason.clone(),
            });
        }
        let Some(command_type) = intent.command_type else {
            return Err(GateError::MalformedIntent(format!(
                "intent {} carries no command",
                intent.intent_id
            )));
        };
        command_type
            .validate_parameters(&intent.parameters)
            .map_err(GateError::MalformedIntent)?;

        let mut envelope = CommandEnvelope {
            command_id: String::new(),
            intent_id: intent.intent_id.clone(),
            state_hash: state_hash.to_string(),
            command_type,
            parameters: intent.parameters.clone(),
            policy_context: PolicyStamp {
                principal: decision.principal.clone(),
                reason: decision.reason.clone(),
                ruleset: decision.ruleset.clone(),
            },
            provenance: intent.provenance,
            idempotency_key: idempotency_key(&intent.intent_id, state_hash),
            device_id: self.signer.device_id().to_string(),
            signature: String::new(),
            content_hash: String::new(),
        };

        let id_hash = canonical::hash_value(HashDomain::Command, &envelope.signed_body());
        envelope.command_id = format!("cmd-{}", canonical::short(&id_hash, 16));
        envelope.signature = self.signer.sign(&envelope.signing_bytes())?;
        envelope.content_hash = envelope.compute_content_hash();

        tracing::debug!(
            command_id = %envelope.command_id,
            command_type = %command_type,
            provenance = %envelope.provenance,
            "sealed command"
        );
        Ok(envelope)
    }

    /// Reject envelopes that were not sealed by this device or were altered
    /// after sealing.
    pub fn verify(&self, envelope: &CommandEnvelope) -> Result<()> {
        let intact = envelope.device_id == self.signer.device_id()
            && self
                .signer
                .verify(&envelope.signing_bytes(), &envelope.signature)
            && envelope.content_hash == envelope.compute_content_hash();
        if intact {
            Ok(())
        } else {
            tracing::warn!(command_id = %envelope.command_id, "envelope signature invalid");
            Err(GateError::SignatureInvalid {
                command_id: envelope.command_id.clone(),
            })
        }
    }
}
