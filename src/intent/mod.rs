//! Proposed actions and where they came from.

pub mod advisory;
pub mod intake;

pub use advisory::{
    AdvisoryOutcome, Advisor, FallbackReason, MAX_ADVISORY_TIMEOUT_MS, OllamaAdvisor, advise,
};
pub use intake::{InputKind, ParsedInput, parse_input};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::command::CommandType;
use crate::command::canonical::{self, HashDomain};

/// Who proposed an intent. Logged and sealed, never used to widen trust.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Provenance {
    Human,
    Rule,
    Advisory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub intent_id: String,
    pub goal: String,
    #[serde(default)]
    pub command_type: Option<CommandType>,
    #[serde(default = "empty_object")]
    pub parameters: Value,
    pub provenance: Provenance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    /// Deadline the suggestion was produced under; mandatory for advisory intents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

fn content_id(prefix: &str, value: &Value) -> String {
    let hash = canonical::hash_value(HashDomain::Intent, value);
    format!("{prefix}-{}", canonical::short(&hash, 12))
}

impl Intent {
    /// Shell command intent. The id is derived from the command text.
    pub fn cli(command: &str, provenance: Provenance) -> Self {
        let command = command.trim();
        Self {
            intent_id: content_id("cli", &serde_json::json!({"kind": "cli", "command": command})),
            goal: "cli".into(),
            command_type: Some(CommandType::Cli),
            parameters: serde_json::json!({"command": command}),
            provenance,
            rationale: None,
            timeout_ms: None,
        }
    }

    /// Move focus to the next tab of the focused app.
    pub fn next_tab(provenance: Provenance) -> Self {
        Self {
            intent_id: "ax-next-tab".into(),
            goal: "next_tab".into(),
            command_type: Some(CommandType::Navigate),
            parameters: serde_json::json!({"action": "next_tab"}),
            provenance,
            rationale: None,
            timeout_ms: None,
        }
    }

    /// Deterministic default for free text when no valid suggestion exists:
    /// the text is logged, nothing executes.
    pub fn chat_fallback(text: &str) -> Self {
        Self {
            intent_id: content_id("chat", &serde_json::json!({"kind": "chat", "text": text})),
            goal: "chat".into(),
            command_type: None,
            parameters: empty_object(),
            provenance: Provenance::Rule,
            rationale: Some("deterministic fallback".into()),
            timeout_ms: None,
        }
    }

    pub fn has_command(&self) -> bool {
        self.command_type.is_some()
    }

    /// Short human-facing rendering of what the intent asks for.
    pub fn value(&self) -> Option<String> {
        let field = match self.command_type? {
            CommandType::Cli => "command",
            CommandType::Navigate | CommandType::Control => "action",
            CommandType::Type => "text",
            CommandType::Click | CommandType::Select => "target",
        };
        self.parameters
            .get(field)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.provenance == Provenance::Advisory && self.timeout_ms.is_none() {
            return Err("advisory intent without timeout".into());
        }
        match self.command_type {
            Some(command_type) => command_type.validate_parameters(&self.parameters),
            None => Ok(()),
        }
    }
}
