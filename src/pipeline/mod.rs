//! One decision cycle, end to end:
//! normalize → project → classify → policy → seal → audit → execute → audit.
//!
//! Every cycle ends in exactly one [`CycleOutcome`] and appends at least one
//! audit record. An outcome is only reported as having happened once its
//! record is durable.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;

use crate::audit::{
    AppendResult, AuditLedger, AuditPhase, AuditRecord, AuditSink, JsonlSink, SqliteSink,
    state_after_hash,
};
use crate::canon::{Canon, ExistenceVerdict};
use crate::command::{CommandEnvelope, CommandSealer, DeviceSigner};
use crate::config::{AuditBackend, Config};
use crate::error::{GateError, StopReason};
use crate::executor::{
    DispatchPerformer, ExecutionResult, ExecutionStatus, ExecutionStore, ExecutorGateway,
    RetryPolicy,
};
use crate::intent::Intent;
use crate::policy::{CommandDraft, PolicyContext, PolicyDecision, PolicyEvaluator, PolicyRule};
use crate::state::{Observation, ProjectedState, classify, normalize, project};

// ── Clock ───────────────────────────────────────────────────────────────

/// Source of the logical evaluation time stamped on policy contexts.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually advanced clock for tests and scripted runs.
#[derive(Debug, Default)]
pub struct FixedClock(AtomicI64);

impl FixedClock {
    pub fn new(now_ms: i64) -> Self {
        Self(AtomicI64::new(now_ms))
    }

    pub fn set(&self, now_ms: i64) {
        self.0.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: i64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

// ── Cycle types ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CycleInput {
    pub principal: String,
    pub observation: Observation,
    pub intent: Intent,
    pub confirmed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CycleOutcome {
    Executed,
    Replayed,
    Denied,
    AwaitingConfirmation,
    /// Intent without a command: recorded, nothing executes.
    Logged,
    Cancelled,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stop {
    pub reason: StopReason,
    pub message: String,
}

impl Stop {
    fn new(reason: StopReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

impl From<&GateError> for Stop {
    fn from(err: &GateError) -> Self {
        Self::new(err.stop_reason(), err.to_string())
    }
}

/// What a cycle did. Fields stay `None` for stages that did not run.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub intent: Intent,
    pub state_hash: Option<String>,
    pub projected_state: Option<ProjectedState>,
    pub existence: Option<ExistenceVerdict>,
    pub decision: Option<PolicyDecision>,
    pub command: Option<CommandEnvelope>,
    /// Executor target the command was dispatched to, once it was.
    pub dispatch: Option<String>,
    /// Only set when the outcome record was written.
    pub execution: Option<ExecutionResult>,
    pub stop: Option<Stop>,
    /// Result of the last append of the cycle.
    pub audit: AppendResult,
}

impl CycleReport {
    pub fn executed(&self) -> bool {
        self.execution.is_some()
    }
}

// ── Pipeline ────────────────────────────────────────────────────────────

pub struct Pipeline {
    canon: Arc<Canon>,
    policy: PolicyEvaluator,
    sealer: CommandSealer,
    ledger: AuditLedger,
    executor: ExecutorGateway,
    clock: Arc<dyn Clock>,
    /// Held from policy evaluation until the decision record is appended,
    /// so rate windows change in the order the ledger records decisions.
    decisions: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("ruleset", &self.policy.ruleset())
            .field("device_id", &self.sealer.device_id())
            .field("ledger", &self.ledger)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(
        canon: Arc<Canon>,
        policy: PolicyEvaluator,
        sealer: CommandSealer,
        ledger: AuditLedger,
        executor: ExecutorGateway,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            canon,
            policy,
            sealer,
            ledger,
            executor,
            clock,
            decisions: tokio::sync::Mutex::new(()),
        }
    }

    /// Wire every stage from config: device key, SQLite store, audit sink.
    /// Rate windows are primed from the existing ledger.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let canon = Arc::new(Canon::from_config(&config.canon));
        let policy = PolicyEvaluator::new(Arc::clone(&canon), config.policy.clone());
        let signer = DeviceSigner::load_or_create(&config.device_key_path())?;
        let sealer = CommandSealer::new(Arc::new(signer));

        let store = ExecutionStore::open(
            &config.database_path(),
            Duration::from_millis(config.storage.busy_timeout_ms),
            config.executor.default_quota,
        )
        .await?;
        let retry = RetryPolicy::new(config.storage.retry_budget, config.storage.retry_backoff_ms);
        let sink: Arc<dyn AuditSink> = match config.storage.audit_backend {
            AuditBackend::Sqlite => Arc::new(
                SqliteSink::open(
                    &config.audit_database_path(),
                    Duration::from_millis(config.storage.busy_timeout_ms),
                )
                .await?,
            ),
            AuditBackend::Jsonl => Arc::new(JsonlSink::new(config.audit_log_path())),
        };
        let ledger = AuditLedger::open(sink).await?.with_retry(retry);

        let workspace = config.workspace_dir();
        std::fs::create_dir_all(&workspace)
            .with_context(|| format!("create workspace {}", workspace.display()))?;
        let performer = DispatchPerformer::from_settings(
            config.executor.simulation,
            workspace,
            Duration::from_secs(config.executor.shell_timeout_secs),
        );
        let executor = ExecutorGateway::new(
            store,
            sealer.clone(),
            Arc::new(performer),
            config.executor.costs.clone(),
            retry,
        );

        let pipeline = Self::new(canon, policy, sealer, ledger, executor, Arc::new(SystemClock));
        pipeline.prime_from_ledger().await?;
        Ok(pipeline)
    }

    /// Re-take the rate slots held by already recorded Allow decisions.
    pub async fn prime_from_ledger(&self) -> anyhow::Result<usize> {
        let records = self.ledger.read_all().await?;
        let mut primed = 0;
        for reservation in records.iter().filter_map(AuditRecord::reservation) {
            self.policy.prime(&reservation);
            primed += 1;
        }
        Ok(primed)
    }

    pub fn canon(&self) -> &Arc<Canon> {
        &self.canon
    }

    pub fn policy(&self) -> &PolicyEvaluator {
        &self.policy
    }

    pub fn sealer(&self) -> &CommandSealer {
        &self.sealer
    }

    pub fn ledger(&self) -> &AuditLedger {
        &self.ledger
    }

    pub fn executor(&self) -> &ExecutorGateway {
        &self.executor
    }

    pub async fn run_cycle(&self, input: CycleInput) -> CycleReport {
        let CycleInput {
            principal,
            observation,
            intent,
            confirmed,
        } = input;

        let mut record = AuditRecord::draft(AuditPhase::Decision, &principal);
        record.intent = Some(intent.clone());
        record.provenance = Some(intent.provenance);
        let mut report = CycleReport {
            outcome: CycleOutcome::Aborted,
            intent: intent.clone(),
            state_hash: None,
            projected_state: None,
            existence: None,
            decision: None,
            command: None,
            dispatch: None,
            execution: None,
            stop: None,
            audit: AppendResult {
                recorded: false,
                error: None,
                seq: None,
                record_hash: None,
                determinism_hash: String::new(),
            },
        };

        // Normalize
        let snapshot = match normalize(&observation.raw) {
            Ok(snapshot) => snapshot,
            Err(err) => return self.stop(record, report, Stop::from(&err)).await,
        };
        let state_hash = snapshot.content_hash();

        // Project and classify
        let projected = project(&self.canon, &snapshot, observation.delta);
        let existence = classify(projected);
        record.state_before = Some(snapshot.clone());
        record.state_before_hash = Some(state_hash.clone());
        record.delta = Some(observation.delta);
        record.projected_state = Some(projected);
        record.verdict = Some(existence);
        record.state_after_hash = Some(state_after_hash(&state_hash, projected));
        report.state_hash = Some(state_hash.clone());
        report.projected_state = Some(projected);
        report.existence = Some(existence);

        if existence.is_terminal() {
            let err = GateError::OntologicalViolation {
                state: projected,
                verdict: existence,
            };
            return self.stop(record, report, Stop::from(&err)).await;
        }

        if let Err(reason) = intent.validate() {
            let err = GateError::MalformedIntent(reason);
            return self.stop(record, report, Stop::from(&err)).await;
        }

        let Some(draft) = CommandDraft::from_intent(&intent, &snapshot) else {
            report.outcome = CycleOutcome::Logged;
            return self.finish(record, report).await;
        };

        // Policy, seal and the decision record run as one turn.
        let turn = self.decisions.lock().await;
        let ctx = PolicyContext {
            principal: principal.clone(),
            evaluated_at_ms: self.clock.now_ms(),
            confirmed,
        };
        let evaluation = self.policy.evaluate(&draft, &ctx);
        let decision = evaluation.decision;
        record.policy_context = Some(ctx);
        record.policy_decision = Some(decision.clone());
        report.decision = Some(decision.clone());

        let Some(reservation) = evaluation.reservation else {
            let stop = if decision.awaits_confirmation() {
                report.outcome = CycleOutcome::AwaitingConfirmation;
                Stop::new(StopReason::ConfirmationRequired, decision.reason.clone())
            } else {
                report.outcome = CycleOutcome::Denied;
                let err = GateError::PolicyDenied {
                    rule: decision.rule.unwrap_or(PolicyRule::SurfaceAllowlist),
                    reason: decision.reason.clone(),
                };
                Stop::from(&err)
            };
            record.stop_reason = Some(stop.reason);
            report.stop = Some(stop);
            return self.finish(record, report).await;
        };

        // Seal
        let envelope = match self.sealer.seal(&intent, &decision, &state_hash) {
            Ok(envelope) => envelope,
            Err(err) => {
                // The recorded Allow keeps its slot, as it does on replay.
                let report = self.stop(record, report, Stop::from(&err)).await;
                if !report.audit.recorded {
                    self.policy.release(&reservation);
                }
                return report;
            }
        };
        record.command = Some(envelope.clone());
        report.command = Some(envelope.clone());

        // Decision record before anything executes.
        let outcome_base = record.clone();
        report = self.finish(record, report).await;
        if !report.audit.recorded {
            self.policy.release(&reservation);
            return report;
        }
        drop(turn);

        // Execute, then record the outcome.
        let mut record = outcome_base;
        record.phase = AuditPhase::Outcome;
        report.dispatch = Some(self.executor.target(envelope.command_type).to_string());
        match self.executor.execute(&envelope).await {
            Ok(result) => {
                report.outcome = match result.status {
                    ExecutionStatus::Executed => CycleOutcome::Executed,
                    ExecutionStatus::Replayed => CycleOutcome::Replayed,
                };
                record.execution = Some(result.clone());
                report.execution = Some(result);
                self.finish(record, report).await
            }
            Err(err) => self.stop(record, report, Stop::from(&err)).await,
        }
    }

    /// Record an operator cancelling a pending confirmation.
    pub async fn record_cancel(&self, principal: &str, intent: Intent) -> CycleReport {
        let mut record = AuditRecord::draft(AuditPhase::Decision, principal);
        record.provenance = Some(intent.provenance);
        record.intent = Some(intent.clone());
        let report = CycleReport {
            outcome: CycleOutcome::Cancelled,
            intent,
            state_hash: None,
            projected_state: None,
            existence: None,
            decision: None,
            command: None,
            dispatch: None,
            execution: None,
            stop: None,
            audit: AppendResult {
                recorded: false,
                error: None,
                seq: None,
                record_hash: None,
                determinism_hash: String::new(),
            },
        };
        let stop = Stop::new(StopReason::UserCancel, "pending confirmation cancelled");
        let mut report = self.stop(record, report, stop).await;
        if report.audit.recorded {
            report.outcome = CycleOutcome::Cancelled;
        }
        report
    }

    async fn stop(&self, mut record: AuditRecord, mut report: CycleReport, stop: Stop) -> CycleReport {
        record.stop_reason = Some(stop.reason);
        report.outcome = CycleOutcome::Aborted;
        report.stop = Some(stop);
        self.finish(record, report).await
    }

    /// Append `record`. A failed append overrides whatever the cycle reached:
    /// the stop becomes `audit_write_failed` and no execution is reported.
    async fn finish(&self, record: AuditRecord, mut report: CycleReport) -> CycleReport {
        report.audit = self.ledger.append(record).await;
        if !report.audit.recorded {
            let err = GateError::AuditWriteFailed(report.audit.error.clone().unwrap_or_default());
            report.outcome = CycleOutcome::Aborted;
            report.execution = None;
            report.stop = Some(Stop::from(&err));
        }

        tracing::info!(
            outcome = %report.outcome,
            stop_reason = ?report.stop.as_ref().map(|s| s.reason),
            recorded = report.audit.recorded,
            seq = ?report.audit.seq,
            "cycle recorded"
        );
        report
    }
}

#[cfg(test)]
mod tests;
