//! Hash-chained, append-only audit ledger.

mod ledger;
mod record;

pub use ledger::{
    AppendResult, AuditLedger, AuditSink, ChainBreak, ChainReport, JsonlSink, SqliteSink,
    verify_chain,
};
pub use record::{AuditPhase, AuditRecord, GENESIS_HASH, state_after_hash};
