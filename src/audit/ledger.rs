use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use tokio::io::AsyncWriteExt;

use super::record::{AuditRecord, GENESIS_HASH};
use crate::error::GateError;
use crate::executor::{AttemptError, RetryPolicy, open_pool};

/// Durable, append-only storage for sealed records.
///
/// A failed `append` must leave nothing behind, so the ledger can retry the
/// same record or move on without orphaning a line.
pub trait AuditSink: Send + Sync {
    fn name(&self) -> &str;

    fn append<'a>(
        &'a self,
        record: &'a AuditRecord,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Every stored record in sequence order.
    fn read_all(&self) -> Pin<Box<dyn Future<Output = Result<Vec<AuditRecord>>> + Send + '_>>;
}

// ── JSONL ────────────────────────────────────────────────

/// Switches that make the next appends fail at a chosen step.
#[derive(Debug, Default)]
struct Faults {
    sync: AtomicBool,
    rollback: AtomicBool,
}

/// One JSON record per line. Each append is flushed to disk before it
/// counts as recorded; an append that fails after writing is truncated
/// away again.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    /// A partial append could not be truncated. The file may end in a record
    /// nobody was told about, so this sink refuses to append again.
    poisoned: AtomicBool,
    faults: Faults,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poisoned: AtomicBool::new(false),
            faults: Faults::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }

    async fn write_synced(&self, file: &mut tokio::fs::File, bytes: &[u8]) -> Result<()> {
        file.write_all(bytes).await.context("write audit record")?;
        if self.faults.sync.load(Ordering::SeqCst) {
            return Err(std::io::Error::other("injected sync failure")).context("sync audit log");
        }
        file.sync_data().await.context("sync audit log")?;
        Ok(())
    }

    /// Cut the file back to `len` after a failed append. Returns the error
    /// to report, which says so when the cut itself failed.
    async fn roll_back(
        &self,
        file: &mut tokio::fs::File,
        len: u64,
        cause: anyhow::Error,
    ) -> anyhow::Error {
        let truncated = async {
            if self.faults.rollback.load(Ordering::SeqCst) {
                return Err(std::io::Error::other("injected truncate failure"));
            }
            file.set_len(len).await?;
            file.sync_data().await
        }
        .await;

        match truncated {
            Ok(()) => {
                tracing::warn!(
                    path = %self.path.display(),
                    len,
                    error = %format!("{cause:#}"),
                    "partial audit append rolled back"
                );
                cause
            }
            Err(e) => {
                self.poisoned.store(true, Ordering::SeqCst);
                tracing::error!(
                    path = %self.path.display(),
                    len,
                    error = %e,
                    "audit log could not be rolled back, refusing further appends"
                );
                cause.context(format!("roll back to {len} bytes failed: {e}"))
            }
        }
    }
}

impl AuditSink for JsonlSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn append<'a>(
        &'a self,
        record: &'a AuditRecord,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            if self.is_poisoned() {
                anyhow::bail!(
                    "audit log {} is poisoned by an earlier partial append; reopen the ledger",
                    self.path.display()
                );
            }
            let mut line = serde_json::to_string(record).context("encode audit record")?;
            line.push('\n');

            if let Some(parent) = self.path.parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("create audit dir {}", parent.display()))?;
            }
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .with_context(|| format!("open audit log {}", self.path.display()))?;
            let len = file.metadata().await.context("stat audit log")?.len();

            if let Err(cause) = self.write_synced(&mut file, line.as_bytes()).await {
                return Err(self.roll_back(&mut file, len, cause).await);
            }
            Ok(())
        })
    }

    fn read_all(&self) -> Pin<Box<dyn Future<Output = Result<Vec<AuditRecord>>> + Send + '_>> {
        Box::pin(async move {
            if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
                return Ok(Vec::new());
            }
            let contents = tokio::fs::read_to_string(&self.path)
                .await
                .with_context(|| format!("read audit log {}", self.path.display()))?;
            contents
                .lines()
                .enumerate()
                .filter(|(_, line)| !line.trim().is_empty())
                .map(|(n, line)| {
                    serde_json::from_str(line)
                        .with_context(|| format!("malformed audit record on line {}", n + 1))
                })
                .collect()
        })
    }
}

// ── SQLite ───────────────────────────────────────────────

/// Each append is one autocommit INSERT: it lands whole or not at all.
#[derive(Debug, Clone)]
pub struct SqliteSink {
    pool: SqlitePool,
}

impl SqliteSink {
    /// Audit table in its own database file, so appends never queue behind
    /// an executor transaction holding the store's write lock.
    pub async fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        Self::new(open_pool(path, busy_timeout).await?).await
    }

    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS audit_log (
                 seq         INTEGER PRIMARY KEY,
                 prev_hash   TEXT NOT NULL,
                 record_hash TEXT NOT NULL UNIQUE,
                 body        TEXT NOT NULL
             )",
        )
        .execute(&pool)
        .await
        .context("create audit_log table")?;
        Ok(Self { pool })
    }
}

impl AuditSink for SqliteSink {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn append<'a>(
        &'a self,
        record: &'a AuditRecord,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let body = serde_json::to_string(record).context("encode audit record")?;
            let seq = i64::try_from(record.seq).context("audit seq overflow")?;
            sqlx::query(
                "INSERT INTO audit_log (seq, prev_hash, record_hash, body) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(seq)
            .bind(&record.prev_hash)
            .bind(&record.record_hash)
            .bind(body)
            .execute(&self.pool)
            .await
            .context("insert audit record")?;
            Ok(())
        })
    }

    fn read_all(&self) -> Pin<Box<dyn Future<Output = Result<Vec<AuditRecord>>> + Send + '_>> {
        Box::pin(async move {
            let rows: Vec<(String,)> = sqlx::query_as("SELECT body FROM audit_log ORDER BY seq")
                .fetch_all(&self.pool)
                .await
                .context("load audit log")?;
            rows.into_iter()
                .map(|(body,)| serde_json::from_str(&body).context("malformed audit record"))
                .collect()
        })
    }
}

/// Busy or locked databases, pool timeouts and I/O errors get another
/// attempt. Anything else (encoding, constraint violations, a poisoned
/// log) fails the append at once.
fn classify_sink_error(err: anyhow::Error) -> AttemptError {
    let transient = err.chain().any(|cause| {
        if let Some(db) = cause.downcast_ref::<sqlx::Error>() {
            return match db {
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
                sqlx::Error::Database(e) => e
                    .code()
                    .is_some_and(|code| matches!(code.as_ref(), "5" | "6" | "261" | "262" | "517")),
                _ => false,
            };
        }
        cause.downcast_ref::<std::io::Error>().is_some()
    });
    if transient {
        AttemptError::Transient(err)
    } else {
        AttemptError::Fatal(GateError::Other(err))
    }
}

// ── Ledger ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppendResult {
    pub recorded: bool,
    pub error: Option<String>,
    pub seq: Option<u64>,
    pub record_hash: Option<String>,
    pub determinism_hash: String,
}

#[derive(Debug)]
struct ChainHead {
    next_seq: u64,
    last_hash: String,
}

/// First broken link found by [`verify_chain`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainBreak {
    pub seq: u64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    pub records: usize,
    pub head: String,
    pub broken: Option<ChainBreak>,
}

/// Single-writer hash chain over an [`AuditSink`].
pub struct AuditLedger {
    sink: Arc<dyn AuditSink>,
    head: tokio::sync::Mutex<ChainHead>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for AuditLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLedger")
            .field("sink", &self.sink.name())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl AuditLedger {
    /// Fresh chain starting at genesis. Does not read the sink.
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            sink,
            head: tokio::sync::Mutex::new(ChainHead {
                next_seq: 1,
                last_hash: GENESIS_HASH.to_string(),
            }),
            retry: RetryPolicy::new(3, 10),
        }
    }

    /// Attempts and backoff for transient sink failures.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Resume the chain stored in `sink`.
    pub async fn open(sink: Arc<dyn AuditSink>) -> Result<Self> {
        let records = sink.read_all().await?;
        let head = match records.last() {
            Some(last) => ChainHead {
                next_seq: last.seq + 1,
                last_hash: last.record_hash.clone(),
            },
            None => ChainHead {
                next_seq: 1,
                last_hash: GENESIS_HASH.to_string(),
            },
        };
        tracing::info!(
            sink = sink.name(),
            records = records.len(),
            next_seq = head.next_seq,
            "audit ledger opened"
        );
        Ok(Self {
            sink,
            head: tokio::sync::Mutex::new(head),
            retry: RetryPolicy::new(3, 10),
        })
    }

    pub fn sink_name(&self) -> &str {
        self.sink.name()
    }

    /// Seal `record` onto the chain and persist it, retrying transient sink
    /// failures within the retry budget. The head only advances when the
    /// sink accepted the record.
    pub async fn append(&self, mut record: AuditRecord) -> AppendResult {
        let mut head = self.head.lock().await;
        record.seal(
            head.next_seq,
            chrono::Utc::now().to_rfc3339(),
            &head.last_hash,
        );

        let sink = self.sink.as_ref();
        let sealed = &record;
        let stored = self
            .retry
            .run("audit_append", || async move {
                sink.append(sealed).await.map_err(classify_sink_error)
            })
            .await;

        match stored {
            Ok(()) => {
                head.next_seq += 1;
                head.last_hash.clone_from(&record.record_hash);
                tracing::debug!(
                    seq = record.seq,
                    phase = %record.phase,
                    stop_reason = ?record.stop_reason,
                    "audit record appended"
                );
                AppendResult {
                    recorded: true,
                    error: None,
                    seq: Some(record.seq),
                    record_hash: Some(record.record_hash),
                    determinism_hash: record.determinism_hash,
                }
            }
            Err(e) => {
                let error = match e {
                    GateError::Other(inner) => format!("{inner:#}"),
                    other => other.to_string(),
                };
                tracing::error!(
                    sink = self.sink.name(),
                    seq = record.seq,
                    error = %error,
                    "audit append failed"
                );
                AppendResult {
                    recorded: false,
                    error: Some(error),
                    seq: None,
                    record_hash: None,
                    determinism_hash: record.determinism_hash,
                }
            }
        }
    }

    pub async fn read_all(&self) -> Result<Vec<AuditRecord>> {
        self.sink.read_all().await
    }

    /// Records with `seq >= from_seq`, at most `limit` of them.
    pub async fn read_segment(&self, from_seq: u64, limit: Option<usize>) -> Result<Vec<AuditRecord>> {
        let records = self.sink.read_all().await?;
        Ok(records
            .into_iter()
            .filter(|r| r.seq >= from_seq)
            .take(limit.unwrap_or(usize::MAX))
            .collect())
    }

    pub async fn verify(&self) -> Result<ChainReport> {
        Ok(verify_chain(&self.sink.read_all().await?))
    }
}

/// Walk a full chain from genesis and report the first broken link.
pub fn verify_chain(records: &[AuditRecord]) -> ChainReport {
    let mut expected_prev = GENESIS_HASH.to_string();
    let mut expected_seq = 1;

    for record in records {
        let reason = if record.seq != expected_seq {
            Some(format!("expected seq {expected_seq}, found {}", record.seq))
        } else if record.prev_hash != expected_prev {
            Some("prev_hash does not match previous record".to_string())
        } else if record.determinism_hash != record.compute_determinism_hash() {
            Some("determinism_hash does not match record content".to_string())
        } else if record.record_hash != record.compute_record_hash() {
            Some("record_hash does not match record content".to_string())
        } else {
            None
        };

        if let Some(reason) = reason {
            return ChainReport {
                records: records.len(),
                head: expected_prev,
                broken: Some(ChainBreak {
                    seq: record.seq,
                    reason,
                }),
            };
        }
        expected_prev.clone_from(&record.record_hash);
        expected_seq += 1;
    }

    ChainReport {
        records: records.len(),
        head: expected_prev,
        broken: None,
    }
}
