//! Operator input text → input kind and, where the input is a direct
//! command, a ready intent.

use serde::{Deserialize, Serialize};

use super::{Intent, Provenance};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::IntoStaticStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum InputKind {
    /// `/cli <command>`
    Cli,
    /// `/ax`, next-tab UI navigation
    Ax,
    /// Anything else; resolved through the advisory path.
    FreeText,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedInput {
    pub kind: InputKind,
    pub raw: String,
    /// Text after the command prefix (the shell command for `/cli`).
    pub payload: String,
}

pub fn parse_input(text: &str) -> ParsedInput {
    let raw = text.trim().to_string();
    let (kind, payload) = if raw.is_empty() {
        (InputKind::Empty, String::new())
    } else if raw == "/cli" {
        (InputKind::Cli, String::new())
    } else if let Some(rest) = raw.strip_prefix("/cli ") {
        (InputKind::Cli, rest.trim().to_string())
    } else if raw == "/ax" {
        (InputKind::Ax, String::new())
    } else {
        (InputKind::FreeText, raw.clone())
    };
    ParsedInput { kind, raw, payload }
}

impl ParsedInput {
    /// Intent for inputs that name their command directly. Free text needs
    /// the advisory path and empty input proposes nothing.
    pub fn direct_intent(&self) -> Option<Intent> {
        match self.kind {
            InputKind::Cli => Some(Intent::cli(&self.payload, Provenance::Human)),
            InputKind::Ax => Some(Intent::next_tab(Provenance::Human)),
            InputKind::FreeText | InputKind::Empty => None,
        }
    }
}
