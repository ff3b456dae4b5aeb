use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AuditBackend {
    Sqlite,
    #[default]
    Jsonl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file for quotas and the idempotency store, relative to the data dir
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub audit_backend: AuditBackend,
    /// SQLite file for the `sqlite` audit backend. Kept apart from `database`
    /// so audit appends never wait on an executor transaction.
    #[serde(default = "default_audit_database")]
    pub audit_database: String,
    /// Append-only JSONL audit log, relative to the data dir
    #[serde(default = "default_audit_log_path")]
    pub audit_log_path: String,
    /// Attempts before a transient store failure surfaces as unavailable
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_database() -> String {
    "axgate.db".into()
}

fn default_audit_database() -> String {
    "audit.db".into()
}

fn default_audit_log_path() -> String {
    "audit.jsonl".into()
}

fn default_retry_budget() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    50
}

fn default_busy_timeout_ms() -> u64 {
    2_000
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            audit_backend: AuditBackend::default(),
            audit_database: default_audit_database(),
            audit_log_path: default_audit_log_path(),
            retry_budget: default_retry_budget(),
            retry_backoff_ms: default_retry_backoff_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}
