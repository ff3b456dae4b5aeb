use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::canonical::{self, HashDomain};
use crate::intent::Provenance;

/// Closed set of actions the executor understands.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CommandType {
    Click,
    Type,
    Select,
    Navigate,
    Control,
    Cli,
}

const NAVIGATE_ACTIONS: &[&str] = &[
    "next_tab",
    "prev_tab",
    "focus_next",
    "focus_prev",
    "scroll_up",
    "scroll_down",
    "back",
    "forward",
];
const CONTROL_ACTIONS: &[&str] = &["escape", "enter", "space", "tab"];

const MAX_CLI_LEN: usize = 512;
const MAX_TEXT_LEN: usize = 1024;
const MAX_TARGET_LEN: usize = 256;

impl CommandType {
    /// UI event injection, as opposed to the shell surface.
    pub const fn is_ui(self) -> bool {
        !matches!(self, Self::Cli)
    }

    fn required_fields(self) -> &'static [&'static str] {
        match self {
            Self::Click => &["target"],
            Self::Type => &["text"],
            Self::Select => &["target", "option"],
            Self::Navigate | Self::Control => &["action"],
            Self::Cli => &["command"],
        }
    }

    /// Schema check shared by every intent source. Parameters must be a flat
    /// object of strings with exactly the required keys, plus an optional
    /// `app` for UI commands.
    pub fn validate_parameters(self, parameters: &Value) -> Result<(), String> {
        let Value::Object(map) = parameters else {
            return Err(format!("{self}: parameters must be an object"));
        };
        let required = self.required_fields();

        for key in required {
            match map.get(*key) {
                Some(Value::String(s)) if !s.trim().is_empty() => {}
                Some(Value::String(_)) => return Err(format!("{self}: `{key}` is empty")),
                Some(_) => return Err(format!("{self}: `{key}` must be a string")),
                None => return Err(format!("{self}: missing `{key}`")),
            }
        }
        for (key, value) in map {
            let known = required.contains(&key.as_str()) || (self.is_ui() && key == "app");
            if !known {
                return Err(format!("{self}: unexpected parameter `{key}`"));
            }
            if !value.is_string() {
                return Err(format!("{self}: `{key}` must be a string"));
            }
        }

        self.validate_values(map)
    }

    fn validate_values(self, map: &Map<String, Value>) -> Result<(), String> {
        let field = |key: &str| map.get(key).and_then(Value::as_str).unwrap_or_default();
        match self {
            Self::Cli if field("command").len() > MAX_CLI_LEN => {
                Err(format!("cli: command longer than {MAX_CLI_LEN} bytes"))
            }
            Self::Type if field("text").len() > MAX_TEXT_LEN => {
                Err(format!("type: text longer than {MAX_TEXT_LEN} bytes"))
            }
            Self::Click | Self::Select if field("target").len() > MAX_TARGET_LEN => {
                Err(format!("{self}: target longer than {MAX_TARGET_LEN} bytes"))
            }
            Self::Navigate if !NAVIGATE_ACTIONS.contains(&field("action")) => {
                Err(format!("navigate: unknown action `{}`", field("action")))
            }
            Self::Control if !CONTROL_ACTIONS.contains(&field("action")) => {
                Err(format!("control: unknown action `{}`", field("action")))
            }
            _ => Ok(()),
        }
    }
}

/// Policy facts the envelope is bound to. Carries no wall-clock time, so
/// causally identical cycles seal to identical envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyStamp {
    pub principal: String,
    pub reason: String,
    pub ruleset: String,
}

/// Signed, device-bound command. Immutable once sealed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub command_id: String,
    pub intent_id: String,
    pub state_hash: String,
    pub command_type: CommandType,
    pub parameters: Value,
    pub policy_context: PolicyStamp,
    pub provenance: Provenance,
    pub idempotency_key: String,
    pub device_id: String,
    pub signature: String,
    pub content_hash: String,
}

impl CommandEnvelope {
    /// Fields covered by the signature.
    pub(crate) fn signed_body(&self) -> Value {
        serde_json::json!({
            "command_id": self.command_id,
            "intent_id": self.intent_id,
            "state_hash": self.state_hash,
            "command_type": self.command_type,
            "parameters": self.parameters,
            "policy_context": self.policy_context,
            "provenance": self.provenance,
            "idempotency_key": self.idempotency_key,
            "device_id": self.device_id,
        })
    }

    pub(crate) fn signing_bytes(&self) -> Vec<u8> {
        canonical::canonical_bytes(&self.signed_body())
    }

    /// Content hash over the signed fields plus the signature itself.
    pub fn compute_content_hash(&self) -> String {
        let mut body = self.signed_body();
        if let Value::Object(map) = &mut body {
            map.insert("signature".into(), Value::String(self.signature.clone()));
        }
        canonical::hash_value(HashDomain::Command, &body)
    }

    /// The principal whose quota this command consumes.
    pub fn principal(&self) -> &str {
        &self.policy_context.principal
    }
}

/// Idempotency key: a pure function of the intent and the state it acts on.
pub fn idempotency_key(intent_id: &str, state_hash: &str) -> String {
    canonical::hash_value(
        HashDomain::Idempotency,
        &serde_json::json!({"intent_id": intent_id, "state_hash": state_hash}),
    )
}
