use std::sync::Arc;

use axgate::error::StopReason;
use axgate::executor::ExecutionStatus;
use axgate::pipeline::CycleOutcome;

use crate::harness::{Harness, PRINCIPAL, cli};

#[tokio::test]
async fn repeated_key_executes_once_and_charges_once() {
    let h = Harness::new(5).await;

    let first = h.pipeline.run_cycle(cli("ls")).await;
    assert_eq!(first.outcome, CycleOutcome::Executed);
    let first = first.execution.unwrap();
    assert_eq!(first.status, ExecutionStatus::Executed);
    assert_eq!(first.remaining_quota, 4);

    h.clock.advance(2_000);
    let second = h.pipeline.run_cycle(cli("ls")).await;
    assert_eq!(second.outcome, CycleOutcome::Replayed);
    let second = second.execution.unwrap();
    assert_eq!(second.status, ExecutionStatus::Replayed);
    assert_eq!(second.remaining_quota, 4);
    assert_eq!(second.command_id, first.command_id);
    assert_eq!(second.effect, first.effect);
    assert_eq!(second.executed_at, first.executed_at);

    let store = h.pipeline.executor().store();
    assert_eq!(store.remaining_quota(PRINCIPAL).await.unwrap(), 4);
    assert_eq!(store.execution_count().await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicates_yield_exactly_one_execution() {
    let h = Harness::new(100).await;

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let pipeline = Arc::clone(&h.pipeline);
        tasks.spawn(async move { pipeline.run_cycle(cli("ls")).await });
    }

    let mut executed = 0;
    let mut replayed = 0;
    let mut command_ids = Vec::new();
    let mut effects = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let report = joined.unwrap();
        match report.outcome {
            CycleOutcome::Executed => executed += 1,
            CycleOutcome::Replayed => replayed += 1,
            other => panic!("unexpected outcome {other:?}: {:?}", report.stop),
        }
        let execution = report.execution.unwrap();
        command_ids.push(execution.command_id);
        effects.push(execution.effect);
    }

    assert_eq!(executed, 1);
    assert_eq!(replayed, 7);
    command_ids.dedup();
    assert_eq!(command_ids.len(), 1);
    assert_eq!(effects.len(), 8);
    assert!(effects.iter().all(|effect| *effect == effects[0]));

    let store = h.pipeline.executor().store();
    assert_eq!(store.remaining_quota(PRINCIPAL).await.unwrap(), 99);
    assert_eq!(store.execution_count().await.unwrap(), 1);
}

#[tokio::test]
async fn distinct_keys_are_charged_separately() {
    let h = Harness::new(10).await;
    let a = h.pipeline.run_cycle(cli("ls")).await;
    let b = h.pipeline.run_cycle(cli("pwd")).await;

    assert_eq!(a.outcome, CycleOutcome::Executed);
    assert_eq!(b.outcome, CycleOutcome::Executed);
    assert_ne!(
        a.execution.unwrap().idempotency_key,
        b.execution.unwrap().idempotency_key
    );
    let store = h.pipeline.executor().store();
    assert_eq!(store.remaining_quota(PRINCIPAL).await.unwrap(), 8);
}

#[tokio::test]
async fn replay_survives_an_exhausted_quota() {
    let h = Harness::new(1).await;
    assert_eq!(
        h.pipeline.run_cycle(cli("ls")).await.outcome,
        CycleOutcome::Executed
    );

    let fresh = h.pipeline.run_cycle(cli("pwd")).await;
    assert_eq!(fresh.outcome, CycleOutcome::Aborted);
    assert_eq!(fresh.stop.unwrap().reason, StopReason::QuotaExhausted);

    let again = h.pipeline.run_cycle(cli("ls")).await;
    assert_eq!(again.outcome, CycleOutcome::Replayed);
    assert_eq!(again.execution.unwrap().remaining_quota, 0);
}
