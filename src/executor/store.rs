use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use super::perform::{Effect, Performer};
use super::retry::AttemptError;
use super::{ExecutionResult, ExecutionStatus};
use crate::command::CommandEnvelope;
use crate::error::GateError;

/// WAL-mode pool over the SQLite file at `path`, created if missing.
pub async fn open_pool(path: &Path, busy_timeout: Duration) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create database dir {}", parent.display()))?;
    }
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
        .with_context(|| format!("invalid database path {}", path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(busy_timeout);
    SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .with_context(|| format!("open sqlite database {}", path.display()))
}

/// Durable idempotency records and per-principal quotas. Both live in one
/// SQLite database so a single transaction covers them.
#[derive(Debug, Clone)]
pub struct ExecutionStore {
    pool: SqlitePool,
    default_quota: i64,
}

impl ExecutionStore {
    pub async fn open(path: &Path, busy_timeout: Duration, default_quota: i64) -> Result<Self> {
        let pool = open_pool(path, busy_timeout).await?;
        Self::new(pool, default_quota).await
    }

    /// Wrap an existing pool and ensure the schema.
    pub async fn new(pool: SqlitePool, default_quota: i64) -> Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS executions (
                 idempotency_key TEXT PRIMARY KEY,
                 command_id      TEXT NOT NULL,
                 principal       TEXT NOT NULL,
                 executor        TEXT NOT NULL,
                 effect          TEXT NOT NULL,
                 executed_at     TEXT NOT NULL
             )",
        )
        .execute(&pool)
        .await
        .context("create executions table")?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS quotas (
                 principal TEXT PRIMARY KEY,
                 remaining INTEGER NOT NULL
             )",
        )
        .execute(&pool)
        .await
        .context("create quotas table")?;

        Ok(Self {
            pool,
            default_quota,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Remaining quota; principals never seen hold the default.
    pub async fn remaining_quota(&self, principal: &str) -> Result<i64> {
        let remaining: Option<i64> =
            sqlx::query_scalar("SELECT remaining FROM quotas WHERE principal = ?1")
                .bind(principal)
                .fetch_optional(&self.pool)
                .await
                .context("load quota")?;
        Ok(remaining.unwrap_or(self.default_quota))
    }

    pub async fn set_quota(&self, principal: &str, remaining: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO quotas (principal, remaining) VALUES (?1, ?2)
             ON CONFLICT(principal) DO UPDATE SET remaining = excluded.remaining",
        )
        .bind(principal)
        .bind(remaining)
        .execute(&self.pool)
        .await
        .context("set quota")?;
        Ok(())
    }

    pub async fn execution_count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM executions")
            .fetch_one(&self.pool)
            .await
            .context("count executions")
    }

    /// One attempt at the check-perform-record transaction.
    ///
    /// The quota upsert is the first statement so the write lock is taken
    /// before anything is read. Failures before `perform` are transient;
    /// after it the effect has happened and nothing is retried.
    pub(super) async fn execute_once(
        &self,
        envelope: &CommandEnvelope,
        cost: i64,
        performer: &dyn Performer,
    ) -> Result<ExecutionResult, AttemptError> {
        let principal = envelope.principal();
        let key = envelope.idempotency_key.as_str();

        let mut tx = self.pool.begin().await.map_err(AttemptError::transient)?;

        sqlx::query(
            "INSERT INTO quotas (principal, remaining) VALUES (?1, ?2)
             ON CONFLICT(principal) DO NOTHING",
        )
        .bind(principal)
        .bind(self.default_quota)
        .execute(&mut *tx)
        .await
        .map_err(AttemptError::transient)?;

        let existing: Option<(String, String, String, String)> = sqlx::query_as(
            "SELECT command_id, executor, effect, executed_at
             FROM executions WHERE idempotency_key = ?1",
        )
        .bind(key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(AttemptError::transient)?;

        let remaining: i64 = sqlx::query_scalar("SELECT remaining FROM quotas WHERE principal = ?1")
            .bind(principal)
            .fetch_one(&mut *tx)
            .await
            .map_err(AttemptError::transient)?;

        if let Some((command_id, executor, effect, executed_at)) = existing {
            tx.commit().await.map_err(AttemptError::transient)?;
            let effect: Effect = serde_json::from_str(&effect)
                .context("decode stored effect")
                .map_err(|e| AttemptError::Fatal(GateError::Other(e)))?;
            tracing::info!(key, %command_id, "duplicate command replayed from store");
            return Ok(ExecutionResult {
                status: ExecutionStatus::Replayed,
                command_id,
                idempotency_key: key.to_string(),
                executor,
                effect,
                remaining_quota: remaining,
                executed_at,
            });
        }

        if remaining <= 0 || remaining < cost {
            tracing::warn!(principal, remaining, cost, "quota exhausted");
            return Err(AttemptError::Fatal(GateError::QuotaExhausted {
                principal: principal.to_string(),
            }));
        }

        let executor = performer.name(envelope.command_type).to_string();
        let effect = performer
            .perform(envelope.command_type, &envelope.parameters)
            .await
            .map_err(|e| AttemptError::Fatal(GateError::Other(e)))?;

        let unrecorded = |e: anyhow::Error| {
            tracing::error!(key, error = %e, "effect performed but not recorded");
            AttemptError::Fatal(GateError::StorageUnavailable {
                attempts: 1,
                message: format!("effect performed but not recorded: {e:#}"),
            })
        };

        let effect_json = serde_json::to_string(&effect)
            .context("encode effect")
            .map_err(unrecorded)?;
        let executed_at = chrono::Utc::now().to_rfc3339();

        sqlx::query("UPDATE quotas SET remaining = remaining - ?2 WHERE principal = ?1")
            .bind(principal)
            .bind(cost)
            .execute(&mut *tx)
            .await
            .context("consume quota")
            .map_err(unrecorded)?;

        sqlx::query(
            "INSERT INTO executions
                 (idempotency_key, command_id, principal, executor, effect, executed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(key)
        .bind(&envelope.command_id)
        .bind(principal)
        .bind(&executor)
        .bind(&effect_json)
        .bind(&executed_at)
        .execute(&mut *tx)
        .await
        .context("record execution")
        .map_err(unrecorded)?;

        tx.commit()
            .await
            .context("commit execution")
            .map_err(unrecorded)?;

        Ok(ExecutionResult {
            status: ExecutionStatus::Executed,
            command_id: envelope.command_id.clone(),
            idempotency_key: key.to_string(),
            executor,
            effect,
            remaining_quota: remaining - cost,
            executed_at,
        })
    }
}
