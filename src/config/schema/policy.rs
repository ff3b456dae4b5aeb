use serde::{Deserialize, Serialize};

use crate::command::CommandType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Sliding rate-limit window length (default: 60)
    #[serde(default = "default_rate_window_secs")]
    pub rate_window_secs: u64,
    #[serde(default)]
    pub rate_limits: RateLimits,
    /// `[start, end)` in UTC hours. `[0, 24]` means always; `[22, 6]` wraps midnight.
    #[serde(default = "default_active_hours")]
    pub active_hours_utc: [u8; 2],
    /// Minimum gap between allowed actions of one principal and command type (0 = off)
    #[serde(default)]
    pub min_interval_ms: u64,
    #[serde(default = "default_true")]
    pub shell_enabled: bool,
}

fn default_rate_window_secs() -> u64 {
    60
}

fn default_active_hours() -> [u8; 2] {
    [0, 24]
}

fn default_true() -> bool {
    true
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            rate_window_secs: default_rate_window_secs(),
            rate_limits: RateLimits::default(),
            active_hours_utc: default_active_hours(),
            min_interval_ms: 0,
            shell_enabled: true,
        }
    }
}

/// Per-window maxima, one per command type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    #[serde(default = "default_navigate")]
    pub navigate: u32,
    #[serde(default = "default_click")]
    pub click: u32,
    #[serde(default = "default_select")]
    pub select: u32,
    #[serde(rename = "type", default = "default_type")]
    pub type_text: u32,
    #[serde(default = "default_control")]
    pub control: u32,
    #[serde(default = "default_cli")]
    pub cli: u32,
}

fn default_navigate() -> u32 {
    30
}

fn default_click() -> u32 {
    20
}

fn default_select() -> u32 {
    20
}

fn default_type() -> u32 {
    10
}

fn default_control() -> u32 {
    5
}

fn default_cli() -> u32 {
    10
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            navigate: default_navigate(),
            click: default_click(),
            select: default_select(),
            type_text: default_type(),
            control: default_control(),
            cli: default_cli(),
        }
    }
}

impl RateLimits {
    pub fn max_for(&self, command_type: CommandType) -> u32 {
        match command_type {
            CommandType::Navigate => self.navigate,
            CommandType::Click => self.click,
            CommandType::Select => self.select,
            CommandType::Type => self.type_text,
            CommandType::Control => self.control,
            CommandType::Cli => self.cli,
        }
    }
}
