use axgate::audit::AuditPhase;
use axgate::pipeline::CycleInput;
use axgate::state::{Delta, StateFlag};

use crate::harness::{Harness, cli, next_tab};

fn script() -> Vec<CycleInput> {
    let mut pressured = next_tab();
    pressured.observation.delta = Delta::from_flags(&[StateFlag::Stable]);
    vec![cli("pwd"), next_tab(), cli("rm -r build"), pressured, cli("pwd")]
}

async fn determinism_hashes(h: &Harness) -> Vec<String> {
    for input in script() {
        h.pipeline.run_cycle(input).await;
        h.clock.advance(1_500);
    }
    h.records()
        .await
        .into_iter()
        .map(|r| r.determinism_hash)
        .collect()
}

#[tokio::test]
async fn identical_inputs_give_identical_determinism_hashes() {
    let a = Harness::new(20).await;
    let b = Harness::new(20).await;

    let left = determinism_hashes(&a).await;
    let right = determinism_hashes(&b).await;
    assert!(!left.is_empty());
    assert_eq!(left, right);
}

#[tokio::test]
async fn determinism_hash_ignores_wall_clock_but_not_content() {
    let h = Harness::new(20).await;
    h.pipeline.run_cycle(cli("pwd")).await;
    h.pipeline.run_cycle(cli("pwd")).await;
    h.pipeline.run_cycle(cli("whoami")).await;

    let records = h.records().await;
    let decisions: Vec<_> = records
        .iter()
        .filter(|r| r.phase == AuditPhase::Decision)
        .collect();
    assert_eq!(decisions.len(), 3);

    // Same intent over the same state: same decision content.
    assert_eq!(decisions[0].determinism_hash, decisions[1].determinism_hash);
    assert_ne!(decisions[0].record_hash, decisions[1].record_hash);
    assert_ne!(decisions[1].determinism_hash, decisions[2].determinism_hash);
}

#[tokio::test]
async fn delta_changes_the_projection_and_the_hash() {
    let h = Harness::new(20).await;
    let calm = h.pipeline.run_cycle(next_tab()).await;

    let mut input = next_tab();
    input.observation.delta = Delta::from_flags(&[StateFlag::Focused]);
    let pressured = h.pipeline.run_cycle(input).await;

    assert_eq!(calm.state_hash, pressured.state_hash);
    assert_ne!(calm.projected_state, pressured.projected_state);
    assert_ne!(calm.audit.determinism_hash, pressured.audit.determinism_hash);
}
