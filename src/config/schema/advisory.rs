use serde::{Deserialize, Serialize};

use crate::intent::MAX_ADVISORY_TIMEOUT_MS;

/// Optional local model that suggests intents for free text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisoryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Hard deadline for a suggestion. Values above 200 are clamped.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_base_url() -> String {
    "http://localhost:11434".into()
}

fn default_model() -> String {
    "qwen3:8b".into()
}

fn default_timeout_ms() -> u64 {
    MAX_ADVISORY_TIMEOUT_MS
}

impl Default for AdvisoryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_base_url(),
            model: default_model(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl AdvisoryConfig {
    pub fn effective_timeout_ms(&self) -> u64 {
        self.timeout_ms.clamp(1, MAX_ADVISORY_TIMEOUT_MS)
    }
}
