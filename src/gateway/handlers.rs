use axum::{
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;

use super::snapshot::{ControlSnapshot, InputSection, SystemSection};
use super::{AppState, ChatRequest, PendingConfirmation, ReplayRequest};
use crate::intent::{InputKind, advise, parse_input};
use crate::pipeline::{CycleInput, CycleOutcome, CycleReport};
use crate::state::{Observation, classify, normalize, project};

/// GET /health
pub(super) async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let pipeline = &state.pipeline;
    Json(json!({
        "status": "ok",
        "device_id": pipeline.sealer().device_id(),
        "ruleset": pipeline.policy().ruleset(),
        "audit_sink": pipeline.ledger().sink_name(),
        "advisory": state.advisor.as_ref().map(|a| a.name().to_string()),
    }))
}

fn system_section(state: &AppState) -> SystemSection {
    let simulation = state.config.executor.simulation;
    SystemSection {
        request_id: uuid::Uuid::new_v4().to_string(),
        mode: if simulation { "simulation" } else { "live" },
        simulation,
        shell_enabled: state.config.policy.shell_enabled,
        device_id: state.pipeline.sealer().device_id().to_string(),
    }
}

fn snapshot_response(
    state: &AppState,
    raw: String,
    kind: &str,
    report: &CycleReport,
) -> (StatusCode, Json<serde_json::Value>) {
    let input = InputSection {
        raw,
        kind: kind.to_string(),
    };
    let snapshot = ControlSnapshot::from_report(system_section(state), input, report);
    match serde_json::to_value(&snapshot) {
        Ok(body) => (StatusCode::OK, Json(body)),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": format!("encode snapshot: {e}")})),
        ),
    }
}

/// POST /chat: one decision cycle per request
pub(super) async fn handle_chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(request) = match body {
        Ok(b) => b,
        Err(e) => {
            let err = json!({
                "error": format!("Invalid JSON: {e}. Expected: {{\"input_text\": \"...\", \"confirm_flag\": false}}")
            });
            return (StatusCode::BAD_REQUEST, Json(err));
        }
    };
    let principal = request
        .principal
        .clone()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| state.config.identity.principal.clone());

    // ── Pending confirmation ──
    // Whatever arrives while a command waits is the answer to it: an explicit
    // `confirm_flag: true` runs it, anything else cancels it.
    let pending = state.pending.lock().await.take();
    if let Some(pending) = pending {
        let confirm = request.confirm_flag == Some(true);
        let report = if confirm {
            state
                .pipeline
                .run_cycle(CycleInput {
                    principal: pending.principal.clone(),
                    observation: state.feed.latest(),
                    intent: pending.intent.clone(),
                    confirmed: true,
                })
                .await
        } else {
            state
                .pipeline
                .record_cancel(&pending.principal, pending.intent.clone())
                .await
        };
        let kind = if confirm { "CONFIRM" } else { "CANCEL" };
        return snapshot_response(&state, pending.raw_input, kind, &report);
    }

    // ── Intake ──
    let parsed = parse_input(&request.input_text);
    let intent = match parsed.kind {
        InputKind::Empty => {
            let err = json!({"error": "input_text is empty"});
            return (StatusCode::BAD_REQUEST, Json(err));
        }
        InputKind::Cli | InputKind::Ax => match parsed.direct_intent() {
            Some(intent) => intent,
            None => {
                let err = json!({"error": "input names no command"});
                return (StatusCode::BAD_REQUEST, Json(err));
            }
        },
        InputKind::FreeText => {
            let outcome = advise(
                state.advisor.as_deref(),
                &parsed.payload,
                state.config.advisory.effective_timeout_ms(),
            )
            .await;
            outcome.into_intent()
        }
    };

    let report = state
        .pipeline
        .run_cycle(CycleInput {
            principal: principal.clone(),
            observation: state.feed.latest(),
            intent: intent.clone(),
            // Confirmation only ever applies to a pending command.
            confirmed: false,
        })
        .await;

    if report.outcome == CycleOutcome::AwaitingConfirmation {
        *state.pending.lock().await = Some(PendingConfirmation {
            principal,
            raw_input: parsed.raw.clone(),
            intent,
        });
    }

    snapshot_response(&state, parsed.raw, parsed.kind.into(), &report)
}

/// POST /observe: latest observation from the observation collaborator
pub(super) async fn handle_observe(
    State(state): State<AppState>,
    body: Result<Json<Observation>, JsonRejection>,
) -> impl IntoResponse {
    let Json(observation) = match body {
        Ok(b) => b,
        Err(e) => {
            let err = json!({
                "error": format!("Invalid JSON: {e}. Expected: {{\"raw\": {{...}}, \"delta\": {{\"mask\": 0}}}}")
            });
            return (StatusCode::BAD_REQUEST, Json(err));
        }
    };

    let snapshot = match normalize(&observation.raw) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            let err = json!({"accepted": false, "error": e.to_string(), "stop_reason": e.stop_reason()});
            return (StatusCode::UNPROCESSABLE_ENTITY, Json(err));
        }
    };
    let projected = project(state.pipeline.canon(), &snapshot, observation.delta);
    state.feed.publish(observation);

    let body = json!({
        "accepted": true,
        "state_hash": snapshot.content_hash(),
        "projected_state": projected.code(),
        "flags": projected.flags_string(),
        "existence": classify(projected),
    });
    (StatusCode::OK, Json(body))
}

/// POST /replay: replay a window of the ledger
pub(super) async fn handle_replay(
    State(state): State<AppState>,
    body: Result<Json<ReplayRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(request) = match body {
        Ok(b) => b,
        Err(e) => {
            let err = json!({"error": format!("Invalid JSON: {e}")});
            return (StatusCode::BAD_REQUEST, Json(err));
        }
    };

    let records = match state.pipeline.ledger().read_all().await {
        Ok(records) => records,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "replay could not read the ledger");
            let err = json!({"error": "audit ledger unavailable", "stop_reason": "storage_unavailable"});
            return (StatusCode::SERVICE_UNAVAILABLE, Json(err));
        }
    };

    match state
        .replay
        .replay_ledger(records, request.from_seq, request.limit, request.segments)
        .await
    {
        Ok(result) => (StatusCode::OK, Json(json!(result))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": format!("replay failed: {e}")})),
        ),
    }
}
