use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::command::CommandType;
use crate::intent::Intent;
use crate::state::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Verdict {
    Allow,
    Deny,
}

/// Policy rules in evaluation order. The first rule that denies wins.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PolicyRule {
    SurfaceAllowlist,
    AppBoundary,
    RateLimit,
    TimeGuard,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub verdict: Verdict,
    /// Rule that denied. `None` on Allow.
    pub rule: Option<PolicyRule>,
    pub reason: String,
    pub principal: String,
    /// Fingerprint of the canon and policy config the decision was made under.
    pub ruleset: String,
}

impl PolicyDecision {
    pub fn allow(principal: impl Into<String>, ruleset: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Allow,
            rule: None,
            reason: "allowed".into(),
            principal: principal.into(),
            ruleset: ruleset.into(),
        }
    }

    pub fn deny(
        rule: PolicyRule,
        reason: impl Into<String>,
        principal: impl Into<String>,
        ruleset: impl Into<String>,
    ) -> Self {
        Self {
            verdict: Verdict::Deny,
            rule: Some(rule),
            reason: reason.into(),
            principal: principal.into(),
            ruleset: ruleset.into(),
        }
    }

    pub fn is_allow(&self) -> bool {
        self.verdict == Verdict::Allow
    }

    /// Denied only for want of human confirmation.
    pub fn awaits_confirmation(&self) -> bool {
        self.verdict == Verdict::Deny && self.reason == super::shell::CONFIRM_REQUIRED
    }
}

/// Facts the evaluation depends on besides the command itself. All of them
/// are recorded in the audit trail so replay can re-derive the decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyContext {
    pub principal: String,
    /// Logical evaluation time, milliseconds since the Unix epoch.
    pub evaluated_at_ms: i64,
    #[serde(default)]
    pub confirmed: bool,
}

/// The command as policy sees it: what would run, and where focus is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDraft {
    pub command_type: CommandType,
    pub parameters: Value,
    pub app: String,
    pub role: String,
}

impl CommandDraft {
    /// `None` when the intent carries no command.
    pub fn from_intent(intent: &Intent, snapshot: &Snapshot) -> Option<Self> {
        Some(Self {
            command_type: intent.command_type?,
            parameters: intent.parameters.clone(),
            app: snapshot.app.clone(),
            role: snapshot.role.clone(),
        })
    }

    pub(super) fn param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateKey {
    pub principal: String,
    pub command_type: CommandType,
}

/// A rate-limit slot taken by an Allow decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub key: RateKey,
    pub at_ms: i64,
}

#[derive(Debug, Clone)]
pub struct Evaluation {
    pub decision: PolicyDecision,
    pub reservation: Option<Reservation>,
}
