use super::handlers::{handle_chat, handle_health, handle_observe, handle_replay};
use super::{AppState, MAX_BODY_SIZE, REQUEST_TIMEOUT_SECS};

use crate::config::Config;
use crate::intent::{Advisor, OllamaAdvisor};
use crate::pipeline::Pipeline;
use crate::replay::{ReplayEngine, ReplayEnvironment};
use crate::state::{Observation, ObservationFeed};
use anyhow::{Context, Result};
use axum::{
    Router,
    http::StatusCode,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Returns true when the bind address is not a loopback address.
fn is_public_bind(host: &str) -> bool {
    !matches!(
        host,
        "127.0.0.1" | "localhost" | "::1" | "[::1]" | "0:0:0:0:0:0:0:1"
    )
}

/// Run the control-plane gateway.
pub async fn run_gateway(host: &str, port: u16, config: Arc<Config>) -> Result<()> {
    if is_public_bind(host) && !config.gateway.allow_public_bind {
        anyhow::bail!(
            "Refusing to bind to {host}: the control plane would be reachable from the network.\n\
             Fix: use --host 127.0.0.1 (default), or set\n\
             [gateway] allow_public_bind = true in config.toml."
        );
    }

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .context("parse gateway bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind gateway socket")?;

    run_gateway_with_listener(host, listener, config).await
}

/// Build handler state from config: pipeline, advisory client, replay engine.
pub async fn build_state(config: Arc<Config>) -> Result<AppState> {
    let pipeline = Pipeline::from_config(&config)
        .await
        .context("assemble decision pipeline")?;

    let advisor: Option<Arc<dyn Advisor>> = config.advisory.enabled.then(|| {
        Arc::new(OllamaAdvisor::new(
            Some(&config.advisory.base_url),
            &config.advisory.model,
        )) as Arc<dyn Advisor>
    });

    let replay = ReplayEngine::new(
        ReplayEnvironment::new(Arc::clone(pipeline.canon()), config.policy.clone())
            .with_sealer(pipeline.sealer().clone()),
    );

    Ok(AppState {
        config,
        pipeline: Arc::new(pipeline),
        feed: ObservationFeed::new(Observation::simulated()),
        advisor,
        replay,
        pending: Arc::new(tokio::sync::Mutex::new(None)),
    })
}

/// Run the gateway from a pre-bound listener.
pub async fn run_gateway_with_listener(
    host: &str,
    listener: tokio::net::TcpListener,
    config: Arc<Config>,
) -> Result<()> {
    let actual_port = listener
        .local_addr()
        .context("get gateway listener local address")?
        .port();
    let display_addr = format!("{host}:{actual_port}");

    let state = build_state(Arc::clone(&config)).await?;
    print_gateway_banner(&display_addr, &state);

    let app = build_app(state, &config.gateway.cors_origins);
    axum::serve(listener, app)
        .await
        .context("serve control-plane gateway")?;

    Ok(())
}

pub fn build_app(state: AppState, cors_origins: &[String]) -> Router {
    let mut app = Router::new()
        .route("/health", get(handle_health))
        .route("/chat", post(handle_chat))
        .route("/observe", post(handle_observe))
        .route("/replay", post(handle_replay))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ));

    if !cors_origins.is_empty() {
        let origins: Vec<_> = cors_origins.iter().filter_map(|o| o.parse().ok()).collect();
        app = app.layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
                .allow_headers([axum::http::header::CONTENT_TYPE]),
        );
    }

    app
}

fn print_gateway_banner(display_addr: &str, state: &AppState) {
    println!("Control plane listening on {display_addr}");
    println!("  POST /chat");
    println!("  POST /observe");
    println!("  POST /replay");
    println!("  GET  /health");
    println!("  Device {}", state.pipeline.sealer().device_id());
    if state.config.executor.simulation {
        println!("  Simulation mode: no real effects");
    }
    match &state.advisor {
        Some(advisor) => println!("  Advisory: {}", advisor.name()),
        None => println!("  Advisory disabled"),
    }
}
