use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::canon::ExistenceVerdict;
use crate::policy::PolicyRule;
use crate::state::ProjectedState;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Terminal and retryable failures of a decision cycle.
///
/// Every variant except `StorageUnavailable` and `AdvisoryTimeout` ends the
/// cycle. Library callers match on these to pick a stop reason; internal
/// plumbing keeps using `anyhow::Result` for context chains.
#[derive(Debug, Error)]
pub enum GateError {
    // ── State ───────────────────────────────────────────────────────────
    #[error("malformed state: {0}")]
    MalformedState(String),

    #[error("ontological violation: projected state {state} is {verdict}")]
    OntologicalViolation {
        state: ProjectedState,
        verdict: ExistenceVerdict,
    },

    // ── Policy ──────────────────────────────────────────────────────────
    #[error("policy denied by {rule}: {reason}")]
    PolicyDenied { rule: PolicyRule, reason: String },

    #[error("malformed intent: {0}")]
    MalformedIntent(String),

    // ── Execution ───────────────────────────────────────────────────────
    #[error("quota exhausted for principal {principal}")]
    QuotaExhausted { principal: String },

    #[error("signature invalid for command {command_id}")]
    SignatureInvalid { command_id: String },

    // ── Storage / Audit ─────────────────────────────────────────────────
    #[error("audit write failed: {0}")]
    AuditWriteFailed(String),

    #[error("storage unavailable after {attempts} attempt(s): {message}")]
    StorageUnavailable { attempts: u32, message: String },

    // ── Advisory ────────────────────────────────────────────────────────
    #[error("advisory timed out after {timeout_ms}ms")]
    AdvisoryTimeout { timeout_ms: u64 },

    // ── Config ──────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GateError {
    /// Stop reason surfaced at the control-plane boundary for this failure.
    pub fn stop_reason(&self) -> StopReason {
        match self {
            Self::MalformedState(_) => StopReason::MalformedState,
            Self::OntologicalViolation { .. } => StopReason::OntologicalViolation,
            Self::PolicyDenied { .. } => StopReason::PolicyDenied,
            Self::MalformedIntent(_) => StopReason::MalformedIntent,
            Self::QuotaExhausted { .. } => StopReason::QuotaExhausted,
            Self::SignatureInvalid { .. } => StopReason::SignatureInvalid,
            Self::AuditWriteFailed(_) => StopReason::AuditWriteFailed,
            Self::StorageUnavailable { .. } | Self::Other(_) => StopReason::StorageUnavailable,
            Self::AdvisoryTimeout { .. } => StopReason::AdvisoryTimeout,
            Self::Config(_) => StopReason::MalformedState,
        }
    }

    /// Only storage contention and advisory deadlines may be retried or
    /// recovered from; everything else is terminal for the cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable { .. } | Self::AdvisoryTimeout { .. }
        )
    }
}

// ─── Stop reasons ────────────────────────────────────────────────────────────

/// Explicit reason attached to every terminal outcome that is not a success.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StopReason {
    MalformedState,
    OntologicalViolation,
    PolicyDenied,
    ConfirmationRequired,
    UserCancel,
    MalformedIntent,
    QuotaExhausted,
    SignatureInvalid,
    AuditWriteFailed,
    StorageUnavailable,
    AdvisoryTimeout,
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the stage contracts.
pub type Result<T> = std::result::Result<T, GateError>;
