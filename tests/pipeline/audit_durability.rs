use std::sync::Arc;

use serde_json::Value;
use tokio_test::assert_ok;

use axgate::Config;
use axgate::audit::{AuditLedger, AuditPhase, AuditRecord, JsonlSink};
use axgate::config::AuditBackend;
use axgate::error::StopReason;
use axgate::pipeline::{CycleOutcome, Pipeline};

use crate::harness::{Harness, PRINCIPAL, cli, next_tab};

async fn recorded_harness() -> Harness {
    let h = Harness::new(20).await;
    for input in [cli("pwd"), next_tab(), cli("rm -r build"), cli("ls")] {
        h.pipeline.run_cycle(input).await;
    }
    h
}

fn rewrite_line(path: &std::path::Path, index: usize, edit: impl FnOnce(&mut Value)) {
    let contents = std::fs::read_to_string(path).unwrap();
    let mut lines: Vec<String> = contents.lines().map(str::to_string).collect();
    let mut record: Value = serde_json::from_str(&lines[index]).unwrap();
    edit(&mut record);
    lines[index] = serde_json::to_string(&record).unwrap();
    std::fs::write(path, lines.join("\n") + "\n").unwrap();
}

#[tokio::test]
async fn every_cycle_is_recorded_in_one_chain() {
    let h = recorded_harness().await;
    let records = h.records().await;

    // Three executions at two records each, one denial.
    assert_eq!(records.len(), 7);
    assert!(records.iter().zip(1u64..).all(|(r, seq)| r.seq == seq));
    let report = assert_ok!(h.pipeline.ledger().verify().await);
    assert!(report.broken.is_none());
    assert_eq!(report.head, records.last().unwrap().record_hash);
}

#[tokio::test]
async fn reopened_ledger_continues_the_chain() {
    let h = recorded_harness().await;
    let before = h.records().await;

    let reopened = assert_ok!(AuditLedger::open(Arc::new(JsonlSink::new(h.audit_path()))).await);
    let mut record = AuditRecord::draft(AuditPhase::Decision, PRINCIPAL);
    record.stop_reason = Some(StopReason::UserCancel);
    let appended = reopened.append(record).await;

    assert!(appended.recorded);
    assert_eq!(appended.seq, Some(before.len() as u64 + 1));
    let report = reopened.verify().await.unwrap();
    assert!(report.broken.is_none());
    assert_eq!(report.records, before.len() + 1);
}

#[tokio::test]
async fn edited_record_breaks_verification() {
    let h = recorded_harness().await;
    rewrite_line(&h.audit_path(), 2, |record| {
        record["principal"] = Value::String("mallory".into());
    });

    let report = h.pipeline.ledger().verify().await.unwrap();
    let broken = report.broken.unwrap();
    assert_eq!(broken.seq, 3);
    assert!(broken.reason.contains("determinism_hash"), "{}", broken.reason);
}

#[tokio::test]
async fn dropped_record_breaks_verification() {
    let h = recorded_harness().await;
    let path = h.audit_path();
    let contents = std::fs::read_to_string(&path).unwrap();
    let kept: Vec<&str> = contents
        .lines()
        .enumerate()
        .filter(|(i, _)| *i != 1)
        .map(|(_, line)| line)
        .collect();
    std::fs::write(&path, kept.join("\n") + "\n").unwrap();

    let broken = h.pipeline.ledger().verify().await.unwrap().broken.unwrap();
    assert_eq!(broken.seq, 3);
    assert!(broken.reason.contains("expected seq 2"));
}

#[tokio::test]
async fn sqlite_backend_records_configured_cycles() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut config = Config::load_or_init_in(tmp.path()).unwrap();
    config.storage.audit_backend = AuditBackend::Sqlite;

    let pipeline = assert_ok!(Pipeline::from_config(&config).await);
    assert_eq!(pipeline.ledger().sink_name(), "sqlite");
    let report = pipeline.run_cycle(cli("pwd")).await;
    assert_eq!(report.outcome, CycleOutcome::Executed);
    drop(pipeline);

    // Restart over the same database: the chain resumes where it stopped.
    let restarted = Pipeline::from_config(&config).await.unwrap();
    let report = restarted.run_cycle(cli("ls")).await;
    assert_eq!(report.audit.seq, Some(4));
    let chain = restarted.ledger().verify().await.unwrap();
    assert!(chain.broken.is_none());
    assert_eq!(chain.records, 4);
}
