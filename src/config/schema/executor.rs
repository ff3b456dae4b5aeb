use serde::{Deserialize, Serialize};

use crate::command::CommandType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Quota granted to a principal on first use (default: 100)
    #[serde(default = "default_quota")]
    pub default_quota: i64,
    #[serde(default)]
    pub costs: CommandCosts,
    #[serde(default = "default_shell_timeout_secs")]
    pub shell_timeout_secs: u64,
    /// Simulate every effect, including shell commands (default: true)
    #[serde(default = "default_true")]
    pub simulation: bool,
    /// Working directory for shell commands. Defaults to `<data_dir>/workspace`.
    #[serde(default)]
    pub workspace_dir: Option<String>,
}

fn default_quota() -> i64 {
    100
}

fn default_shell_timeout_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_quota: default_quota(),
            costs: CommandCosts::default(),
            shell_timeout_secs: default_shell_timeout_secs(),
            simulation: true,
            workspace_dir: None,
        }
    }
}

/// Quota units consumed per executed command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandCosts {
    #[serde(default = "default_cost")]
    pub ui: i64,
    #[serde(default = "default_cost")]
    pub cli: i64,
}

fn default_cost() -> i64 {
    1
}

impl Default for CommandCosts {
    fn default() -> Self {
        Self { ui: 1, cli: 1 }
    }
}

impl CommandCosts {
    pub fn cost_of(&self, command_type: CommandType) -> i64 {
        if command_type.is_ui() { self.ui } else { self.cli }
    }
}
