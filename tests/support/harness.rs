#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use tempfile::TempDir;

use axgate::audit::{AuditLedger, AuditRecord, JsonlSink};
use axgate::canon::Canon;
use axgate::command::{CommandSealer, DeviceSigner};
use axgate::config::{CommandCosts, PolicyConfig};
use axgate::executor::{ExecutionStore, ExecutorGateway, RetryPolicy, SimulatedPerformer};
use axgate::intent::{Intent, Provenance};
use axgate::pipeline::{CycleInput, FixedClock, Pipeline};
use axgate::policy::PolicyEvaluator;
use axgate::replay::{ReplayEngine, ReplayEnvironment};
use axgate::state::Observation;

/// 2026-01-01T12:00:00Z, inside the default active hours.
pub const NOON_MS: i64 = 1_767_268_800_000;

pub const PRINCIPAL: &str = "operator";

pub fn sealer() -> CommandSealer {
    CommandSealer::new(Arc::new(DeviceSigner::new("harness-host", [7u8; 32])))
}

/// One pipeline over a fresh temp dir: JSONL ledger, in-memory SQLite
/// store, simulated performer and a fixed clock.
pub struct Harness {
    pub tmp: TempDir,
    pub clock: Arc<FixedClock>,
    pub pipeline: Arc<Pipeline>,
}

impl Harness {
    pub async fn new(quota: i64) -> Self {
        Self::with_policy(quota, PolicyConfig::default()).await
    }

    pub async fn with_policy(quota: i64, policy: PolicyConfig) -> Self {
        let tmp = TempDir::new().unwrap();
        let canon = Arc::new(Canon::default());
        let sealer = sealer();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = ExecutionStore::new(pool, quota).await.unwrap();
        let executor = ExecutorGateway::new(
            store,
            sealer.clone(),
            Arc::new(SimulatedPerformer),
            CommandCosts::default(),
            RetryPolicy::new(2, 1),
        );
        let ledger = AuditLedger::new(Arc::new(JsonlSink::new(tmp.path().join("audit.jsonl"))));
        let clock = Arc::new(FixedClock::new(NOON_MS));
        let pipeline = Pipeline::new(
            Arc::clone(&canon),
            PolicyEvaluator::new(canon, policy),
            sealer,
            ledger,
            executor,
            clock.clone(),
        );
        Self {
            tmp,
            clock,
            pipeline: Arc::new(pipeline),
        }
    }

    pub fn audit_path(&self) -> PathBuf {
        self.tmp.path().join("audit.jsonl")
    }

    pub async fn records(&self) -> Vec<AuditRecord> {
        self.pipeline.ledger().read_all().await.unwrap()
    }

    pub fn replay_engine(&self) -> ReplayEngine {
        ReplayEngine::new(
            ReplayEnvironment::new(
                Arc::clone(self.pipeline.canon()),
                self.pipeline.policy().config().clone(),
            )
            .with_sealer(self.pipeline.sealer().clone()),
        )
    }
}

pub fn cli(command: &str) -> CycleInput {
    CycleInput {
        principal: PRINCIPAL.into(),
        observation: Observation::simulated(),
        intent: Intent::cli(command, Provenance::Human),
        confirmed: false,
    }
}

pub fn next_tab() -> CycleInput {
    CycleInput {
        intent: Intent::next_tab(Provenance::Human),
        ..cli("")
    }
}
