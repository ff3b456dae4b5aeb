//! Offline re-derivation of recorded decisions.
//!
//! Replay reads ledger records only. It never observes live state and never
//! calls the advisory client: advisory intents are taken verbatim from the
//! record. The first stage that disagrees with the record halts the run.

use std::sync::Arc;

use serde::Serialize;

use crate::audit::{AuditPhase, AuditRecord, GENESIS_HASH, state_after_hash};
use crate::canon::Canon;
use crate::command::{CommandSealer, idempotency_key};
use crate::config::PolicyConfig;
use crate::policy::{CommandDraft, PolicyEvaluator};
use crate::state::{classify, project};

/// Stages checked for every record, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReplayStage {
    StateHash,
    Projection,
    Existence,
    StateAfter,
    Policy,
    Seal,
    Determinism,
    RecordHash,
    ChainLink,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DivergencePoint {
    pub seq: u64,
    pub stage: ReplayStage,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayResult {
    pub matched: bool,
    pub records_checked: usize,
    pub divergence: Option<DivergencePoint>,
}

impl ReplayResult {
    fn matched(records_checked: usize) -> Self {
        Self {
            matched: true,
            records_checked,
            divergence: None,
        }
    }

    fn diverged(records_checked: usize, point: DivergencePoint) -> Self {
        Self {
            matched: false,
            records_checked,
            divergence: Some(point),
        }
    }
}

/// Everything replay needs besides the records: the canon and policy the
/// records were decided under, and optionally the sealer that signed them.
#[derive(Debug, Clone)]
pub struct ReplayEnvironment {
    pub canon: Arc<Canon>,
    pub policy: PolicyConfig,
    /// Without the device key, envelopes are checked for internal
    /// consistency instead of being re-sealed.
    pub sealer: Option<CommandSealer>,
}

impl ReplayEnvironment {
    pub fn new(canon: Arc<Canon>, policy: PolicyConfig) -> Self {
        Self {
            canon,
            policy,
            sealer: None,
        }
    }

    pub fn with_sealer(mut self, sealer: CommandSealer) -> Self {
        self.sealer = Some(sealer);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ReplayEngine {
    env: Arc<ReplayEnvironment>,
}

type Check = Result<(), DivergencePoint>;

fn compare(seq: u64, stage: ReplayStage, expected: &str, actual: &str) -> Check {
    if expected == actual {
        Ok(())
    } else {
        Err(DivergencePoint {
            seq,
            stage,
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}

fn display<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "null".to_string(), |v| v.to_string())
}

impl ReplayEngine {
    pub fn new(env: ReplayEnvironment) -> Self {
        Self { env: Arc::new(env) }
    }

    pub fn environment(&self) -> &ReplayEnvironment {
        &self.env
    }

    /// Replay `segment` single-threaded. `preceding` holds the records
    /// before it; they seed the rate windows and the first chain link.
    pub fn replay(&self, segment: &[AuditRecord], preceding: &[AuditRecord]) -> ReplayResult {
        let evaluator = PolicyEvaluator::new(Arc::clone(&self.env.canon), self.env.policy.clone());
        for reservation in preceding.iter().filter_map(AuditRecord::reservation) {
            evaluator.prime(&reservation);
        }

        let mut prev_hash = match (preceding.last(), segment.first()) {
            (Some(last), _) => Some(last.record_hash.clone()),
            (None, Some(first)) if first.seq == 1 => Some(GENESIS_HASH.to_string()),
            // Segment starts mid-chain with nothing before it: trust its first link.
            _ => None,
        };

        for (checked, record) in segment.iter().enumerate() {
            if let Err(point) = self.check_record(record, prev_hash.as_deref(), &evaluator) {
                tracing::warn!(
                    seq = point.seq,
                    stage = %point.stage,
                    "replay diverged"
                );
                return ReplayResult::diverged(checked, point);
            }
            prev_hash = Some(record.record_hash.clone());
        }

        tracing::debug!(records = segment.len(), "replay segment matched");
        ReplayResult::matched(segment.len())
    }

    /// Replay the records with `seq >= from_seq` (at most `limit` of them)
    /// in up to `segments` parallel runs. Everything before the window only
    /// seeds the rate windows and the first chain link.
    pub async fn replay_ledger(
        &self,
        mut records: Vec<AuditRecord>,
        from_seq: u64,
        limit: Option<usize>,
        segments: usize,
    ) -> anyhow::Result<ReplayResult> {
        let start = records.partition_point(|r| r.seq < from_seq);
        let end = limit.map_or(records.len(), |l| start.saturating_add(l).min(records.len()));
        records.truncate(end);
        self.replay_parallel(records, start, segments).await
    }

    /// Split `records[from..]` into up to `segments` contiguous runs and
    /// replay them concurrently. The earliest divergence wins.
    pub async fn replay_parallel(
        &self,
        records: Vec<AuditRecord>,
        from: usize,
        segments: usize,
    ) -> anyhow::Result<ReplayResult> {
        let records = Arc::new(records);
        let from = from.min(records.len());
        let chunk = (records.len() - from).div_ceil(segments.max(1)).max(1);

        let mut tasks = tokio::task::JoinSet::new();
        let mut start = from;
        while start < records.len() {
            let end = (start + chunk).min(records.len());
            let engine = self.clone();
            let records = Arc::clone(&records);
            tasks.spawn_blocking(move || engine.replay(&records[start..end], &records[..start]));
            start = end;
        }

        let mut checked = 0;
        let mut first: Option<DivergencePoint> = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined?;
            checked += result.records_checked;
            if let Some(point) = result.divergence
                && first.as_ref().is_none_or(|f| point.seq < f.seq)
            {
                first = Some(point);
            }
        }

        let result = match first {
            Some(point) => ReplayResult::diverged(checked, point),
            None => ReplayResult::matched(checked),
        };
        tracing::info!(
            records = records.len() - from,
            matched = result.matched,
            "replay finished"
        );
        Ok(result)
    }

    fn check_record(
        &self,
        record: &AuditRecord,
        prev_hash: Option<&str>,
        evaluator: &PolicyEvaluator,
    ) -> Check {
        let seq = record.seq;

        // State hash
        if let Some(snapshot) = &record.state_before {
            compare(
                seq,
                ReplayStage::StateHash,
                &snapshot.content_hash(),
                &display(record.state_before_hash.as_deref()),
            )?;
        }

        // Projection, existence and successor state
        if let (Some(snapshot), Some(delta)) = (&record.state_before, record.delta) {
            let projected = project(&self.env.canon, snapshot, delta);
            compare(
                seq,
                ReplayStage::Projection,
                &projected.to_string(),
                &display(record.projected_state),
            )?;
            compare(
                seq,
                ReplayStage::Existence,
                &classify(projected).to_string(),
                &display(record.verdict),
            )?;
            if let Some(before) = &record.state_before_hash {
                compare(
                    seq,
                    ReplayStage::StateAfter,
                    &state_after_hash(before, projected),
                    &display(record.state_after_hash.as_deref()),
                )?;
            }
        }

        // Policy: decision records re-evaluated under the recorded context.
        if record.phase == AuditPhase::Decision
            && let (Some(ctx), Some(recorded)) = (&record.policy_context, &record.policy_decision)
        {
            let draft = match (&record.intent, &record.state_before) {
                (Some(intent), Some(snapshot)) => CommandDraft::from_intent(intent, snapshot),
                _ => None,
            };
            let Some(draft) = draft else {
                return Err(DivergencePoint {
                    seq,
                    stage: ReplayStage::Policy,
                    expected: "intent with command and state_before".into(),
                    actual: "missing".into(),
                });
            };
            let evaluation = evaluator.evaluate(&draft, ctx);
            if &evaluation.decision != recorded {
                return Err(DivergencePoint {
                    seq,
                    stage: ReplayStage::Policy,
                    expected: format!("{}:{}", evaluation.decision.verdict, evaluation.decision.reason),
                    actual: format!("{}:{}", recorded.verdict, recorded.reason),
                });
            }
        }

        // Seal
        if let Some(command) = &record.command {
            let resealed = match (&self.env.sealer, &record.intent, &record.policy_decision) {
                (Some(sealer), Some(intent), Some(decision)) => sealer
                    .seal(intent, decision, &command.state_hash)
                    .map(|env| env.content_hash)
                    .unwrap_or_else(|e| e.to_string()),
                _ => command.compute_content_hash(),
            };
            compare(seq, ReplayStage::Seal, &resealed, &command.content_hash)?;
            compare(
                seq,
                ReplayStage::Seal,
                &idempotency_key(&command.intent_id, &command.state_hash),
                &command.idempotency_key,
            )?;
        }

        compare(
            seq,
            ReplayStage::Determinism,
            &record.compute_determinism_hash(),
            &record.determinism_hash,
        )?;
        compare(
            seq,
            ReplayStage::RecordHash,
            &record.compute_record_hash(),
            &record.record_hash,
        )?;
        if let Some(prev_hash) = prev_hash {
            compare(seq, ReplayStage::ChainLink, prev_hash, &record.prev_hash)?;
        }
        Ok(())
    }
}
