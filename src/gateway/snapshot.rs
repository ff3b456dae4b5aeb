use serde::Serialize;
use serde_json::Value;

use crate::error::StopReason;
use crate::executor::ExecutionStatus;
use crate::intent::Provenance;
use crate::pipeline::{CycleOutcome, CycleReport};
use crate::policy::PolicyRule;

/// Structured answer of `POST /chat`. Sections whose stage did not run are
/// `null`; nothing is filled in after the fact.
#[derive(Debug, Clone, Serialize)]
pub struct ControlSnapshot {
    pub system: SystemSection,
    pub input: InputSection,
    pub intent: Option<IntentSection>,
    pub decision: Option<DecisionSection>,
    pub execution: Option<ExecutionSection>,
    pub stop: Option<StopSection>,
    pub audit: AuditSection,
    pub ui: UiSection,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemSection {
    pub request_id: String,
    pub mode: &'static str,
    pub simulation: bool,
    pub shell_enabled: bool,
    pub device_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InputSection {
    pub raw: String,
    pub kind: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntentSection {
    pub intent_id: String,
    pub kind: String,
    pub value: Option<String>,
    pub provenance: Provenance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionVerdict {
    Allow,
    Deny,
    Stop,
    ConfirmReq,
    Logged,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionSection {
    pub verdict: DecisionVerdict,
    pub rule: Option<PolicyRule>,
    pub reason: String,
    pub command_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSection {
    pub executed: bool,
    pub executor: String,
    pub status: Option<ExecutionStatus>,
    pub effect: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopSection {
    pub reason: StopReason,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditSection {
    pub recorded: bool,
    pub seq: Option<u64>,
    pub determinism_hash: Option<String>,
    pub record_hash: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UiSection {
    pub requires_confirm: bool,
    pub prompt: Option<String>,
}

impl ControlSnapshot {
    pub fn from_report(system: SystemSection, input: InputSection, report: &CycleReport) -> Self {
        let intent = &report.intent;
        let verdict = match report.outcome {
            CycleOutcome::Executed | CycleOutcome::Replayed => DecisionVerdict::Allow,
            CycleOutcome::Denied => DecisionVerdict::Deny,
            CycleOutcome::AwaitingConfirmation => DecisionVerdict::ConfirmReq,
            CycleOutcome::Logged => DecisionVerdict::Logged,
            CycleOutcome::Cancelled | CycleOutcome::Aborted => DecisionVerdict::Stop,
        };

        let decision = DecisionSection {
            verdict,
            rule: report.decision.as_ref().and_then(|d| d.rule),
            reason: match (&report.stop, &report.decision) {
                (Some(stop), _) if verdict == DecisionVerdict::Stop => stop.reason.to_string(),
                (_, Some(decision)) => decision.reason.clone(),
                _ => "logged".to_string(),
            },
            command_id: report.command.as_ref().map(|c| c.command_id.clone()),
        };

        let execution = report.dispatch.as_ref().map(|executor| ExecutionSection {
            executed: report.execution.is_some(),
            executor: executor.clone(),
            status: report.execution.as_ref().map(|e| e.status),
            effect: report
                .execution
                .as_ref()
                .map(|e| serde_json::to_value(&e.effect).unwrap_or(Value::Null)),
        });

        let requires_confirm = report.outcome == CycleOutcome::AwaitingConfirmation;
        let prompt = requires_confirm.then(|| {
            format!(
                "Confirm `{}`? Send confirm_flag=true to run it or false to cancel.",
                intent.value().unwrap_or_else(|| intent.goal.clone())
            )
        });

        Self {
            system,
            input,
            intent: Some(IntentSection {
                intent_id: intent.intent_id.clone(),
                kind: intent.goal.clone(),
                value: intent.value(),
                provenance: intent.provenance,
            }),
            decision: Some(decision),
            execution,
            stop: report.stop.as_ref().map(|s| StopSection {
                reason: s.reason,
                message: s.message.clone(),
            }),
            audit: AuditSection {
                recorded: report.audit.recorded,
                seq: report.audit.seq,
                determinism_hash: (!report.audit.determinism_hash.is_empty())
                    .then(|| report.audit.determinism_hash.clone()),
                record_hash: report.audit.record_hash.clone(),
                error: report.audit.error.clone(),
            },
            ui: UiSection {
                requires_confirm,
                prompt,
            },
        }
    }
}
