use std::sync::Arc;

use axgate::audit::AuditRecord;
use axgate::replay::{ReplayEngine, ReplayEnvironment, ReplayStage};

use crate::harness::{Harness, cli, next_tab};

/// Seven records: pwd (1-2), next tab (3-4), denied rm (5), ls (6-7).
async fn recorded() -> (Harness, Vec<AuditRecord>) {
    let h = Harness::new(20).await;
    for input in [cli("pwd"), next_tab(), cli("rm -r build"), cli("ls")] {
        h.pipeline.run_cycle(input).await;
        h.clock.advance(1_000);
    }
    let records = h.records().await;
    assert_eq!(records.len(), 7);
    (h, records)
}

#[tokio::test]
async fn recorded_ledger_replays_identically() {
    let (h, records) = recorded().await;
    let engine = h.replay_engine();

    let sequential = engine.replay(&records, &[]);
    assert!(sequential.matched, "{:?}", sequential.divergence);
    assert_eq!(sequential.records_checked, 7);

    let parallel = engine.replay_ledger(records, 1, None, 3).await.unwrap();
    assert!(parallel.matched, "{:?}", parallel.divergence);
    assert_eq!(parallel.records_checked, 7);
}

#[tokio::test]
async fn flipped_snapshot_bit_halts_at_its_record() {
    let (h, mut records) = recorded().await;
    let snapshot = records[2].state_before.as_mut().unwrap();
    snapshot.focused = !snapshot.focused;

    let result = h.replay_engine().replay(&records, &[]);
    assert!(!result.matched);
    assert_eq!(result.records_checked, 2);
    let point = result.divergence.unwrap();
    assert_eq!(point.seq, 3);
    assert_eq!(point.stage, ReplayStage::StateHash);
    assert_ne!(point.expected, point.actual);
}

#[tokio::test]
async fn flipped_state_hash_digit_halts_at_its_record() {
    let (h, mut records) = recorded().await;
    let stored = records[2].state_before_hash.as_mut().unwrap();
    let flipped = if stored.starts_with('0') { "1" } else { "0" };
    stored.replace_range(0..1, flipped);
    let tampered = stored.clone();

    let result = h.replay_engine().replay(&records, &[]);
    assert!(!result.matched);
    assert_eq!(result.records_checked, 2);
    let point = result.divergence.unwrap();
    assert_eq!(point.seq, 3);
    assert_eq!(point.stage, ReplayStage::StateHash);
    assert_eq!(point.actual, tampered);
    assert_ne!(point.expected, point.actual);
}

#[tokio::test]
async fn tightened_policy_diverges_at_the_first_changed_decision() {
    let (h, records) = recorded().await;
    let mut policy = h.pipeline.policy().config().clone();
    policy.rate_limits.cli = 1;
    let engine = ReplayEngine::new(
        ReplayEnvironment::new(Arc::clone(h.pipeline.canon()), policy)
            .with_sealer(h.pipeline.sealer().clone()),
    );

    let result = engine.replay(&records, &[]);
    let point = result.divergence.unwrap();
    assert_eq!(point.seq, 6);
    assert_eq!(point.stage, ReplayStage::Policy);
    assert_eq!(result.records_checked, 5);
}

#[tokio::test]
async fn window_replay_checks_only_the_window() {
    let (h, records) = recorded().await;
    let result = h
        .replay_engine()
        .replay_ledger(records, 4, Some(2), 2)
        .await
        .unwrap();
    assert!(result.matched);
    assert_eq!(result.records_checked, 2);
}

#[tokio::test]
async fn replay_without_device_key_checks_content_hashes() {
    let (h, records) = recorded().await;
    let engine = ReplayEngine::new(ReplayEnvironment::new(
        Arc::clone(h.pipeline.canon()),
        h.pipeline.policy().config().clone(),
    ));
    let result = engine.replay(&records, &[]);
    assert!(result.matched, "{:?}", result.divergence);
}
