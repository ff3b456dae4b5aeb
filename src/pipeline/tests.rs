use super::*;
use crate::command::CommandType;
use crate::config::{CommandCosts, PolicyConfig};
use crate::executor::{Effect, Performer, SimulatedPerformer};
use crate::intent::Provenance;
use crate::state::{Delta, StateFlag};
use serde_json::json;
use sqlx::sqlite::SqlitePoolOptions;
use tempfile::TempDir;

const NOON_MS: i64 = 1_767_268_800_000;

struct Fixture {
    _tmp: TempDir,
    clock: Arc<FixedClock>,
    pipeline: Pipeline,
}

fn assemble(
    policy: PolicyConfig,
    store: ExecutionStore,
    performer: Arc<dyn Performer>,
    sink: Arc<dyn AuditSink>,
    retry: RetryPolicy,
) -> (Arc<FixedClock>, Pipeline) {
    let canon = Arc::new(Canon::default());
    let sealer = CommandSealer::new(Arc::new(DeviceSigner::new("pipeline-host", [5u8; 32])));
    let executor = ExecutorGateway::new(
        store,
        sealer.clone(),
        performer,
        CommandCosts::default(),
        retry,
    );
    let ledger = AuditLedger::new(sink).with_retry(retry);
    let clock = Arc::new(FixedClock::new(NOON_MS));
    let pipeline = Pipeline::new(
        Arc::clone(&canon),
        PolicyEvaluator::new(canon, policy),
        sealer,
        ledger,
        executor,
        clock.clone(),
    );
    (clock, pipeline)
}

async fn memory_store(quota: i64) -> ExecutionStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    ExecutionStore::new(pool, quota).await.unwrap()
}

async fn fixture_over(
    quota: i64,
    policy: PolicyConfig,
    sink: Arc<dyn AuditSink>,
) -> (Arc<FixedClock>, Pipeline) {
    let store = memory_store(quota).await;
    assemble(policy, store, Arc::new(SimulatedPerformer), sink, RetryPolicy::new(2, 1))
}

async fn fixture_with(quota: i64, policy: PolicyConfig, audit_path: Option<&str>) -> Fixture {
    let tmp = TempDir::new().unwrap();
    // `None` points the log at the directory itself, so every append fails.
    let log = audit_path.map_or_else(|| tmp.path().to_path_buf(), |p| tmp.path().join(p));
    let (clock, pipeline) = fixture_over(quota, policy, Arc::new(JsonlSink::new(log))).await;
    Fixture {
        _tmp: tmp,
        clock,
        pipeline,
    }
}

/// JSONL sink whose appends fail, after `delay`, for the call numbers
/// listed in `failing` (1-based). Failures are not worth retrying.
struct FailingSink {
    inner: JsonlSink,
    failing: Vec<u32>,
    delay: Duration,
    calls: std::sync::atomic::AtomicU32,
}

impl FailingSink {
    fn new(path: std::path::PathBuf, failing: &[u32], delay: Duration) -> Self {
        Self {
            inner: JsonlSink::new(path),
            failing: failing.to_vec(),
            delay,
            calls: std::sync::atomic::AtomicU32::new(0),
        }
    }
}

impl AuditSink for FailingSink {
    fn name(&self) -> &str {
        "failing"
    }

    fn append<'a>(
        &'a self,
        record: &'a AuditRecord,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.failing.contains(&call) {
                tokio::time::sleep(self.delay).await;
                anyhow::bail!("audit volume full");
            }
            self.inner.append(record).await
        })
    }

    fn read_all(
        &self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<Vec<AuditRecord>>> + Send + '_>> {
        self.inner.read_all()
    }
}

/// Simulated effects that take a while to perform.
struct SlowPerformer(Duration);

impl Performer for SlowPerformer {
    fn name(&self, command_type: CommandType) -> &str {
        if command_type.is_ui() { "AX" } else { "SHELL" }
    }

    fn perform<'a>(
        &'a self,
        command_type: CommandType,
        parameters: &'a serde_json::Value,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<Effect>> + Send + 'a>> {
        Box::pin(async move {
            tokio::time::sleep(self.0).await;
            SimulatedPerformer.perform(command_type, parameters).await
        })
    }
}

async fn fixture(quota: i64) -> Fixture {
    fixture_with(quota, PolicyConfig::default(), Some("audit.jsonl")).await
}

fn cli(command: &str) -> CycleInput {
    CycleInput {
        principal: "operator".into(),
        observation: Observation::simulated(),
        intent: Intent::cli(command, Provenance::Human),
        confirmed: false,
    }
}

// ── Execution ────────────────────────────────────────────────────────────

#[tokio::test]
async fn allowed_command_executes_with_two_records() {
    let f = fixture(100).await;
    let report = f.pipeline.run_cycle(cli("pwd")).await;

    assert_eq!(report.outcome, CycleOutcome::Executed);
    assert!(report.executed());
    assert!(report.stop.is_none());
    assert_eq!(report.audit.seq, Some(2));
    assert_eq!(report.execution.as_ref().unwrap().executor, "SHELL");

    let records = f.pipeline.ledger().read_all().await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].phase, AuditPhase::Decision);
    assert!(records[0].execution.is_none());
    assert_eq!(records[1].phase, AuditPhase::Outcome);
    assert_eq!(records[1].command, records[0].command);
    assert!(records[1].execution.is_some());
}

#[tokio::test]
async fn duplicate_request_replays_and_keeps_quota() {
    let f = fixture(5).await;

    let first = f.pipeline.run_cycle(cli("ls -la")).await;
    assert_eq!(first.outcome, CycleOutcome::Executed);
    assert_eq!(first.execution.as_ref().unwrap().remaining_quota, 4);

    f.clock.advance(1_000);
    let second = f.pipeline.run_cycle(cli("ls -la")).await;
    assert_eq!(second.outcome, CycleOutcome::Replayed);
    let (a, b) = (first.execution.unwrap(), second.execution.unwrap());
    assert_eq!(a.idempotency_key, b.idempotency_key);
    assert_eq!(a.effect, b.effect);
    assert_eq!(b.remaining_quota, 4);

    let store = f.pipeline.executor().store();
    assert_eq!(store.remaining_quota("operator").await.unwrap(), 4);
    assert_eq!(store.execution_count().await.unwrap(), 1);
}

#[tokio::test]
async fn exhausted_quota_aborts_with_outcome_record() {
    let f = fixture(1).await;
    f.pipeline.run_cycle(cli("pwd")).await;

    let report = f.pipeline.run_cycle(cli("whoami")).await;
    assert_eq!(report.outcome, CycleOutcome::Aborted);
    assert_eq!(report.stop.unwrap().reason, StopReason::QuotaExhausted);
    assert!(report.audit.recorded);
    assert!(report.execution.is_none());

    let records = f.pipeline.ledger().read_all().await.unwrap();
    let last = records.last().unwrap();
    assert_eq!(last.phase, AuditPhase::Outcome);
    assert_eq!(last.stop_reason, Some(StopReason::QuotaExhausted));
}

// ── Early stops ──────────────────────────────────────────────────────────

#[tokio::test]
async fn malformed_observation_stops_before_projection() {
    let f = fixture(10).await;
    let mut input = cli("pwd");
    input.observation = Observation {
        raw: json!({"role": "AXButton"}),
        delta: Delta::NONE,
    };

    let report = f.pipeline.run_cycle(input).await;
    assert_eq!(report.outcome, CycleOutcome::Aborted);
    assert_eq!(report.stop.unwrap().reason, StopReason::MalformedState);
    assert!(report.state_hash.is_none());
    assert!(report.decision.is_none());

    let records = f.pipeline.ledger().read_all().await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].state_after_hash.is_none());
}

#[tokio::test]
async fn terminal_projection_is_an_ontological_violation() {
    let f = fixture(10).await;
    let mut input = cli("pwd");
    input.observation.delta = Delta::from_flags(&[
        StateFlag::InteractiveRole,
        StateFlag::LabelPresent,
        StateFlag::Focused,
        StateFlag::Enabled,
        StateFlag::Stable,
    ]);

    let report = f.pipeline.run_cycle(input).await;
    assert_eq!(report.existence, Some(ExistenceVerdict::TerminalSoft));
    assert_eq!(report.stop.unwrap().reason, StopReason::OntologicalViolation);
    assert!(report.decision.is_none());
    assert!(report.command.is_none());
    assert_eq!(f.pipeline.executor().store().execution_count().await.unwrap(), 0);
}

#[tokio::test]
async fn denied_command_records_null_command() {
    let f = fixture(10).await;
    let report = f.pipeline.run_cycle(cli("rm -r build")).await;

    assert_eq!(report.outcome, CycleOutcome::Denied);
    let decision = report.decision.unwrap();
    assert_eq!(decision.rule, Some(PolicyRule::SurfaceAllowlist));
    assert_eq!(decision.reason, "shell_deny_lv2:rm");
    assert_eq!(report.stop.unwrap().reason, StopReason::PolicyDenied);

    let records = f.pipeline.ledger().read_all().await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].command.is_none());
}

#[tokio::test]
async fn chat_fallback_is_logged_only() {
    let f = fixture(10).await;
    let mut input = cli("pwd");
    input.intent = Intent::chat_fallback("what is focused?");

    let report = f.pipeline.run_cycle(input).await;
    assert_eq!(report.outcome, CycleOutcome::Logged);
    assert!(report.stop.is_none());
    assert!(report.decision.is_none());
    assert!(report.audit.recorded);
}

// ── Confirmation ─────────────────────────────────────────────────────────

#[tokio::test]
async fn local_write_waits_for_confirmation() {
    let f = fixture(10).await;
    let pending = f.pipeline.run_cycle(cli("mkdir notes")).await;
    assert_eq!(pending.outcome, CycleOutcome::AwaitingConfirmation);
    assert_eq!(
        pending.stop.unwrap().reason,
        StopReason::ConfirmationRequired
    );

    let mut confirmed = cli("mkdir notes");
    confirmed.confirmed = true;
    let report = f.pipeline.run_cycle(confirmed).await;
    assert_eq!(report.outcome, CycleOutcome::Executed);
}

#[tokio::test]
async fn cancel_is_recorded_as_user_cancel() {
    let f = fixture(10).await;
    let report = f
        .pipeline
        .record_cancel("operator", Intent::cli("mkdir notes", Provenance::Human))
        .await;
    assert_eq!(report.outcome, CycleOutcome::Cancelled);
    assert_eq!(report.stop.unwrap().reason, StopReason::UserCancel);

    let records = f.pipeline.ledger().read_all().await.unwrap();
    assert_eq!(records[0].stop_reason, Some(StopReason::UserCancel));
}

// ── Audit durability ─────────────────────────────────────────────────────

#[tokio::test]
async fn unrecorded_decision_never_executes() {
    let f = fixture_with(10, PolicyConfig::default(), None).await;
    let report = f.pipeline.run_cycle(cli("pwd")).await;

    assert_eq!(report.outcome, CycleOutcome::Aborted);
    assert!(!report.audit.recorded);
    assert!(report.audit.error.is_some());
    assert_eq!(report.stop.as_ref().unwrap().reason, StopReason::AuditWriteFailed);
    assert!(!report.executed());

    let store = f.pipeline.executor().store();
    assert_eq!(store.execution_count().await.unwrap(), 0);
    assert_eq!(store.remaining_quota("operator").await.unwrap(), 10);
}

#[tokio::test]
async fn unrecorded_decision_gives_back_its_rate_slot() {
    let mut policy = PolicyConfig::default();
    policy.rate_limits.cli = 1;
    let f = fixture_with(10, policy, None).await;

    for _ in 0..3 {
        let report = f.pipeline.run_cycle(cli("pwd")).await;
        let decision = report.decision.unwrap();
        assert!(decision.is_allow(), "slot leaked: {}", decision.reason);
    }
}

#[tokio::test]
async fn unrecorded_outcome_withholds_the_effect_until_retried() {
    let tmp = TempDir::new().unwrap();
    // Call 1 is the decision record, call 2 the outcome record.
    let sink = Arc::new(FailingSink::new(tmp.path().join("audit.jsonl"), &[2], Duration::ZERO));
    let (clock, pipeline) = fixture_over(10, PolicyConfig::default(), sink).await;

    let report = pipeline.run_cycle(cli("ls")).await;
    assert_eq!(report.outcome, CycleOutcome::Aborted);
    assert!(!report.executed());
    assert!(!report.audit.recorded);
    assert_eq!(report.stop.unwrap().reason, StopReason::AuditWriteFailed);
    // The effect did happen: the store holds it.
    assert_eq!(pipeline.executor().store().execution_count().await.unwrap(), 1);

    clock.advance(1_000);
    let retried = pipeline.run_cycle(cli("ls")).await;
    assert_eq!(retried.outcome, CycleOutcome::Replayed);
    assert!(retried.audit.recorded);
    let execution = retried.execution.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Replayed);
    assert_eq!(execution.remaining_quota, 9);
}

#[tokio::test]
async fn sqlite_audit_is_not_starved_by_a_long_execution() {
    let tmp = TempDir::new().unwrap();
    let busy = Duration::from_millis(100);
    let store = ExecutionStore::open(&tmp.path().join("axgate.db"), busy, 10)
        .await
        .unwrap();
    let sink = SqliteSink::open(&tmp.path().join("audit.db"), busy)
        .await
        .unwrap();
    let (_clock, pipeline) = assemble(
        PolicyConfig::default(),
        store,
        Arc::new(SlowPerformer(Duration::from_millis(800))),
        Arc::new(sink),
        RetryPolicy::new(8, 50),
    );
    let pipeline = Arc::new(pipeline);

    let slow = tokio::spawn({
        let pipeline = Arc::clone(&pipeline);
        async move { pipeline.run_cycle(cli("ls")).await }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut other = cli("");
    other.intent = Intent::next_tab(Provenance::Human);
    let second = pipeline.run_cycle(other).await;
    let first = slow.await.unwrap();

    for report in [&first, &second] {
        assert_eq!(report.outcome, CycleOutcome::Executed, "{:?}", report.stop);
        assert!(report.audit.recorded);
    }
    let chain = pipeline.ledger().verify().await.unwrap();
    assert_eq!(chain.records, 4);
    assert!(chain.broken.is_none());
}

#[tokio::test]
async fn rate_windows_follow_ledger_order_when_an_append_fails() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("audit.jsonl");
    let sink = Arc::new(FailingSink::new(path.clone(), &[1], Duration::from_millis(300)));
    let mut policy = PolicyConfig::default();
    policy.rate_limits.cli = 1;
    let (_clock, pipeline) = fixture_over(10, policy.clone(), sink).await;
    let pipeline = Arc::new(pipeline);

    let first = tokio::spawn({
        let pipeline = Arc::clone(&pipeline);
        async move { pipeline.run_cycle(cli("ls")).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = pipeline.run_cycle(cli("pwd")).await;
    let first = first.await.unwrap();

    assert_eq!(first.stop.unwrap().reason, StopReason::AuditWriteFailed);
    // The slot the unrecorded Allow took was given back before `pwd` was
    // evaluated.
    assert!(second.decision.as_ref().unwrap().is_allow());
    assert_eq!(second.outcome, CycleOutcome::Executed);

    let records = pipeline.ledger().read_all().await.unwrap();
    let engine = crate::replay::ReplayEngine::new(crate::replay::ReplayEnvironment::new(
        Arc::clone(pipeline.canon()),
        policy,
    ));
    let replayed = engine.replay(&records, &[]);
    assert!(replayed.matched, "{:?}", replayed.divergence);
    assert_eq!(replayed.records_checked, records.len());
}

// ── Rate limits across restarts ─────────────────────────────────────────

#[tokio::test]
async fn priming_restores_rate_windows() {
    let mut policy = PolicyConfig::default();
    policy.rate_limits.navigate = 1;
    let f = fixture_with(10, policy, Some("audit.jsonl")).await;

    let mut input = cli("pwd");
    input.intent = Intent::next_tab(Provenance::Human);
    let report = f.pipeline.run_cycle(input.clone()).await;
    assert_eq!(
        report.command.as_ref().map(|c| c.command_type),
        Some(CommandType::Navigate)
    );

    // A second evaluator over the same ledger, as after a restart.
    let restarted = PolicyEvaluator::new(Arc::clone(f.pipeline.canon()), f.pipeline.policy().config().clone());
    for record in f.pipeline.ledger().read_all().await.unwrap() {
        if let Some(reservation) = record.reservation() {
            restarted.prime(&reservation);
        }
    }
    assert_eq!(f.pipeline.prime_from_ledger().await.unwrap(), 1);

    f.clock.advance(1_000);
    let snapshot = normalize(&input.observation.raw).unwrap();
    let draft = CommandDraft::from_intent(&input.intent, &snapshot).unwrap();
    let ctx = PolicyContext {
        principal: "operator".into(),
        evaluated_at_ms: f.clock.now_ms(),
        confirmed: false,
    };
    let decision = restarted.evaluate(&draft, &ctx).decision;
    assert_eq!(decision.rule, Some(PolicyRule::RateLimit));
    assert_eq!(decision.reason, "rate_limit:navigate:1/60s");
}
