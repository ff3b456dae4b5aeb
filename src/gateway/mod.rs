//! Axum control-plane boundary with body limits and timeouts.
//!
//! - `POST /chat`: one decision cycle, answered with a control snapshot
//! - `POST /observe`: latest observation from the observation collaborator
//! - `POST /replay`: replay a ledger window
//! - `GET /health`

mod handlers;
mod server;
mod snapshot;

pub use server::{build_app, build_state, run_gateway, run_gateway_with_listener};
pub use snapshot::ControlSnapshot;

use std::sync::Arc;

use serde::Deserialize;

use crate::config::Config;
use crate::intent::{Advisor, Intent};
use crate::pipeline::Pipeline;
use crate::replay::ReplayEngine;
use crate::state::ObservationFeed;

/// Maximum request body size (64KB)
pub const MAX_BODY_SIZE: usize = 65_536;
/// Request timeout (30s)
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Intent held back until the operator confirms or cancels it.
#[derive(Debug, Clone)]
pub struct PendingConfirmation {
    pub principal: String,
    pub raw_input: String,
    pub intent: Intent,
}

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pipeline: Arc<Pipeline>,
    pub feed: ObservationFeed,
    pub advisor: Option<Arc<dyn Advisor>>,
    pub replay: ReplayEngine,
    pub pending: Arc<tokio::sync::Mutex<Option<PendingConfirmation>>>,
}

/// `POST /chat` body. The short field names are accepted as aliases.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default, alias = "text")]
    pub input_text: String,
    #[serde(default, alias = "confirm")]
    pub confirm_flag: Option<bool>,
    #[serde(default)]
    pub principal: Option<String>,
}

/// `POST /replay` body.
#[derive(Debug, Deserialize)]
pub struct ReplayRequest {
    #[serde(default = "default_from_seq")]
    pub from_seq: u64,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default = "default_segments")]
    pub segments: usize,
}

fn default_from_seq() -> u64 {
    1
}

fn default_segments() -> usize {
    1
}
