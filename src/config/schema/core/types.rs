use super::super::{
    AdvisoryConfig, AuditBackend, CanonConfig, ExecutorConfig, GatewayConfig, ObservabilityConfig,
    PolicyConfig, StorageConfig,
};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data directory - computed from home, not serialized
    #[serde(skip)]
    pub data_dir: PathBuf,
    /// Path to config.toml - computed from home, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub canon: CanonConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub advisory: AdvisoryConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Principal charged for commands that arrive without one
    #[serde(default = "default_principal")]
    pub principal: String,
    /// HMAC key for envelope signatures, relative to the data dir
    #[serde(default = "default_device_key_path")]
    pub device_key_path: String,
}

fn default_principal() -> String {
    "operator".into()
}

fn default_device_key_path() -> String {
    "device.key".into()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            principal: default_principal(),
            device_key_path: default_device_key_path(),
        }
    }
}

impl Config {
    /// Expands `~` and anchors relative paths at the data dir.
    pub fn resolve_path(&self, raw: &str) -> PathBuf {
        let expanded = shellexpand::tilde(raw);
        let path = Path::new(expanded.as_ref());
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.resolve_path(&self.storage.database)
    }

    pub fn audit_database_path(&self) -> PathBuf {
        self.resolve_path(&self.storage.audit_database)
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.resolve_path(&self.storage.audit_log_path)
    }

    pub fn device_key_path(&self) -> PathBuf {
        self.resolve_path(&self.identity.device_key_path)
    }

    pub fn workspace_dir(&self) -> PathBuf {
        match &self.executor.workspace_dir {
            Some(dir) => self.resolve_path(dir),
            None => self.data_dir.join("workspace"),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.canon.allowed_apps.is_empty() {
            return Err(ConfigError::Validation(
                "canon.allowed_apps must not be empty".into(),
            ));
        }
        if self.executor.default_quota <= 0 {
            return Err(ConfigError::Validation(
                "executor.default_quota must be positive".into(),
            ));
        }
        if self.executor.costs.ui < 0 || self.executor.costs.cli < 0 {
            return Err(ConfigError::Validation(
                "executor.costs must not be negative".into(),
            ));
        }
        if self.policy.rate_window_secs == 0 {
            return Err(ConfigError::Validation(
                "policy.rate_window_secs must be positive".into(),
            ));
        }
        let limits = &self.policy.rate_limits;
        if [
            limits.navigate,
            limits.click,
            limits.select,
            limits.type_text,
            limits.control,
            limits.cli,
        ]
        .contains(&0)
        {
            return Err(ConfigError::Validation(
                "policy.rate_limits entries must be positive".into(),
            ));
        }
        let [start, end] = self.policy.active_hours_utc;
        if start > 24 || end > 24 || start == end {
            return Err(ConfigError::Validation(format!(
                "policy.active_hours_utc [{start}, {end}] is not a valid window"
            )));
        }
        if self.storage.retry_budget == 0 {
            return Err(ConfigError::Validation(
                "storage.retry_budget must be at least 1".into(),
            ));
        }
        if self.storage.audit_backend == AuditBackend::Sqlite
            && self.audit_database_path() == self.database_path()
        {
            return Err(ConfigError::Validation(
                "storage.audit_database must differ from storage.database".into(),
            ));
        }
        if self.identity.principal.trim().is_empty() {
            return Err(ConfigError::Validation(
                "identity.principal must not be empty".into(),
            ));
        }
        Ok(())
    }
}
