//! Untrusted intent suggestions for free text.
//!
//! A suggestion is requested under a hard deadline and clamped to the same
//! schema as rule intents. Late, failed, or malformed suggestions are treated
//! as absent and replaced by the deterministic default intent.

use anyhow::Context;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use super::{Intent, Provenance, content_id};
use crate::command::CommandType;
use crate::error::GateError;

/// Upper bound on any advisory deadline.
pub const MAX_ADVISORY_TIMEOUT_MS: u64 = 200;

const MAX_GOAL_LEN: usize = 64;
const MAX_RATIONALE_LEN: usize = 256;

pub trait Advisor: Send + Sync {
    fn name(&self) -> &str;

    /// Raw suggestion for `text`. The result is untrusted JSON.
    fn suggest<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send + 'a>>;
}

// ── Ollama ──────────────────────────────────────────────────────────────

pub struct OllamaAdvisor {
    base_url: String,
    model: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    format: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaAdvisor {
    pub fn new(base_url: Option<&str>, model: &str) -> Self {
        Self {
            base_url: base_url
                .unwrap_or("http://localhost:11434")
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
            client: Client::new(),
        }
    }

    fn prompt(text: &str) -> String {
        let types: Vec<&'static str> = <CommandType as strum::IntoEnumIterator>::iter()
            .map(Into::into)
            .collect();
        format!(
            "You suggest one desktop action for an operator request.\n\
             Reply with JSON only: {{\"command_type\": one of {types:?}, \
             \"parameters\": {{...}}, \"goal\": short string, \"rationale\": short string}}.\n\
             Request: {text}"
        )
    }
}

impl Advisor for OllamaAdvisor {
    fn name(&self) -> &str {
        "ollama"
    }

    fn suggest<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send + 'a>> {
        Box::pin(async move {
            let request = GenerateRequest {
                model: &self.model,
                prompt: Self::prompt(text),
                stream: false,
                format: "json",
            };
            let url = format!("{}/api/generate", self.base_url);
            let response = self
                .client
                .post(&url)
                .json(&request)
                .send()
                .await
                .context("send advisory request")?
                .error_for_status()
                .context("advisory endpoint returned an error status")?;
            let body: GenerateResponse = response
                .json()
                .await
                .context("decode advisory response envelope")?;
            serde_json::from_str(&body.response).context("advisory response is not JSON")
        })
    }
}

// ── Deadline + clamp ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    Disabled,
    Timeout,
    Unavailable(String),
    Rejected(String),
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => f.write_str("advisory disabled"),
            Self::Timeout => f.write_str("advisory timed out"),
            Self::Unavailable(e) => write!(f, "advisory unavailable: {e}"),
            Self::Rejected(e) => write!(f, "advisory suggestion rejected: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvisoryOutcome {
    Suggested(Intent),
    Fallback {
        intent: Intent,
        reason: FallbackReason,
    },
}

impl AdvisoryOutcome {
    pub fn intent(&self) -> &Intent {
        match self {
            Self::Suggested(intent) | Self::Fallback { intent, .. } => intent,
        }
    }

    pub fn into_intent(self) -> Intent {
        match self {
            Self::Suggested(intent) | Self::Fallback { intent, .. } => intent,
        }
    }
}

/// Ask `advisor` about `text` with a deadline of `timeout_ms` (capped at
/// [`MAX_ADVISORY_TIMEOUT_MS`]). Never fails and never waits past the deadline.
pub async fn advise(advisor: Option<&dyn Advisor>, text: &str, timeout_ms: u64) -> AdvisoryOutcome {
    let fallback = |reason: FallbackReason| AdvisoryOutcome::Fallback {
        intent: Intent::chat_fallback(text),
        reason,
    };
    let Some(advisor) = advisor else {
        return fallback(FallbackReason::Disabled);
    };

    let timeout_ms = timeout_ms.clamp(1, MAX_ADVISORY_TIMEOUT_MS);
    match tokio::time::timeout(Duration::from_millis(timeout_ms), advisor.suggest(text)).await {
        Err(_) => {
            let err = GateError::AdvisoryTimeout { timeout_ms };
            tracing::warn!(advisor = advisor.name(), error = %err, "using fallback intent");
            fallback(FallbackReason::Timeout)
        }
        Ok(Err(e)) => {
            tracing::warn!(advisor = advisor.name(), error = %e, "advisory call failed");
            fallback(FallbackReason::Unavailable(e.to_string()))
        }
        Ok(Ok(raw)) => match clamp_suggestion(text, &raw, timeout_ms) {
            Ok(intent) => AdvisoryOutcome::Suggested(intent),
            Err(reason) => {
                tracing::warn!(advisor = advisor.name(), %reason, "advisory suggestion rejected");
                fallback(FallbackReason::Rejected(reason))
            }
        },
    }
}

/// Clamp raw advisory JSON onto the intent schema. Unknown fields are
/// dropped; an unknown command type or invalid parameters reject the whole
/// suggestion.
pub fn clamp_suggestion(text: &str, raw: &Value, timeout_ms: u64) -> Result<Intent, String> {
    let Value::Object(map) = raw else {
        return Err("suggestion is not an object".into());
    };
    let command_type: CommandType = map
        .get("command_type")
        .and_then(Value::as_str)
        .ok_or("missing command_type")?
        .parse()
        .map_err(|_| "unknown command_type".to_string())?;
    let parameters = map
        .get("parameters")
        .cloned()
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    command_type.validate_parameters(&parameters)?;

    let goal = map
        .get("goal")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map_or_else(|| command_type.to_string(), |g| truncate(g, MAX_GOAL_LEN));
    let rationale = map
        .get("rationale")
        .and_then(Value::as_str)
        .map(|r| truncate(r.trim(), MAX_RATIONALE_LEN));

    let intent = Intent {
        intent_id: content_id(
            "adv",
            &serde_json::json!({
                "text": text,
                "command_type": command_type,
                "parameters": parameters,
            }),
        ),
        goal,
        command_type: Some(command_type),
        parameters,
        provenance: Provenance::Advisory,
        rationale,
        timeout_ms: Some(timeout_ms),
    };
    intent.validate()?;
    Ok(intent)
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn generate_body(inner: &Value) -> Value {
        json!({"model": "qwen3:8b", "response": inner.to_string(), "done": true})
    }

    #[test]
    fn clamp_accepts_schema_valid_suggestion() {
        let raw = json!({
            "command_type": "navigate",
            "parameters": {"action": "next_tab"},
            "goal": "switch tab",
            "extra": "dropped"
        });
        let intent = clamp_suggestion("next tab please", &raw, 200).unwrap();
        assert_eq!(intent.provenance, Provenance::Advisory);
        assert_eq!(intent.command_type, Some(CommandType::Navigate));
        assert_eq!(intent.goal, "switch tab");
        assert_eq!(intent.timeout_ms, Some(200));
        assert!(intent.intent_id.starts_with("adv-"));
    }

    #[test]
    fn clamp_rejects_unknown_command_type() {
        let raw = json!({"command_type": "format_disk", "parameters": {}});
        assert!(clamp_suggestion("x", &raw, 200).is_err());
    }

    #[test]
    fn clamp_rejects_schema_violations() {
        let raw = json!({"command_type": "cli", "parameters": {"command": "ls", "sudo": "yes"}});
        assert!(clamp_suggestion("x", &raw, 200).is_err());
        assert!(clamp_suggestion("x", &json!("navigate"), 200).is_err());
    }

    #[test]
    fn clamp_truncates_long_rationale() {
        let raw = json!({
            "command_type": "control",
            "parameters": {"action": "escape"},
            "rationale": "r".repeat(1000)
        });
        let intent = clamp_suggestion("close it", &raw, 150).unwrap();
        assert_eq!(intent.rationale.unwrap().len(), MAX_RATIONALE_LEN);
    }

    #[tokio::test]
    async fn disabled_advisor_falls_back() {
        let outcome = advise(None, "status?", 200).await;
        assert_eq!(
            outcome,
            AdvisoryOutcome::Fallback {
                intent: Intent::chat_fallback("status?"),
                reason: FallbackReason::Disabled,
            }
        );
    }

    #[tokio::test]
    async fn ollama_suggestion_is_clamped_into_an_intent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(generate_body(&json!({
                "command_type": "navigate",
                "parameters": {"action": "next_tab"}
            }))))
            .mount(&server)
            .await;

        let advisor = OllamaAdvisor::new(Some(&server.uri()), "qwen3:8b");
        let outcome = advise(Some(&advisor), "go to next tab", 200).await;

        let AdvisoryOutcome::Suggested(intent) = outcome else {
            panic!("expected a suggestion, got {outcome:?}");
        };
        assert_eq!(intent.command_type, Some(CommandType::Navigate));
    }

    #[tokio::test]
    async fn late_suggestion_is_treated_as_absent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(generate_body(&json!({
                        "command_type": "navigate",
                        "parameters": {"action": "next_tab"}
                    })))
                    .set_delay(Duration::from_millis(800)),
            )
            .mount(&server)
            .await;

        let advisor = OllamaAdvisor::new(Some(&server.uri()), "qwen3:8b");
        let started = std::time::Instant::now();
        let outcome = advise(Some(&advisor), "go to next tab", 5_000).await;

        assert!(started.elapsed() < Duration::from_millis(700));
        assert_eq!(
            outcome,
            AdvisoryOutcome::Fallback {
                intent: Intent::chat_fallback("go to next tab"),
                reason: FallbackReason::Timeout,
            }
        );
    }

    #[tokio::test]
    async fn malformed_response_is_treated_as_absent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"response": "not json at all"})),
            )
            .mount(&server)
            .await;

        let advisor = OllamaAdvisor::new(Some(&server.uri()), "qwen3:8b");
        let outcome = advise(Some(&advisor), "hello", 200).await;
        assert!(matches!(
            outcome,
            AdvisoryOutcome::Fallback {
                reason: FallbackReason::Unavailable(_),
                ..
            }
        ));
        assert!(!outcome.intent().has_command());
    }

    #[tokio::test]
    async fn server_error_is_treated_as_absent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let advisor = OllamaAdvisor::new(Some(&server.uri()), "qwen3:8b");
        let outcome = advise(Some(&advisor), "hello", 200).await;
        assert_eq!(outcome.into_intent(), Intent::chat_fallback("hello"));
    }
}
