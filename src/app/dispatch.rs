use crate::cli::commands::{Cli, Commands};
use anyhow::{Context, Result, bail};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::info;

use axgate::Config;
use axgate::canon::{EXISTENCE_TABLE, ExistenceVerdict};
use axgate::pipeline::Pipeline;
use axgate::replay::{ReplayEngine, ReplayEnvironment};
use axgate::state::ProjectedState;

/// One line per projected state: code, flags `h1..h6`, verdict.
pub fn render_table() -> String {
    let mut out = String::from("code flags   verdict\n");
    for (code, verdict) in (0u8..).zip(EXISTENCE_TABLE.iter()) {
        let Some(state) = ProjectedState::new(code) else {
            continue;
        };
        let _ = writeln!(
            out,
            "{:>4} {}  {verdict}",
            state.code(),
            state.flags_string()
        );
    }
    let terminal = EXISTENCE_TABLE
        .iter()
        .filter(|v| v.is_terminal())
        .count();
    let transitional = EXISTENCE_TABLE
        .iter()
        .filter(|v| **v == ExistenceVerdict::Transitional)
        .count();
    let _ = writeln!(
        out,
        "{} states, {terminal} terminal, {transitional} transitional",
        ProjectedState::SPACE
    );
    out
}

async fn run_replay(
    config: &Config,
    from_seq: u64,
    limit: Option<usize>,
    segments: usize,
) -> Result<()> {
    let pipeline = Pipeline::from_config(config).await?;
    let engine = ReplayEngine::new(
        ReplayEnvironment::new(Arc::clone(pipeline.canon()), config.policy.clone())
            .with_sealer(pipeline.sealer().clone()),
    );
    let records = pipeline
        .ledger()
        .read_all()
        .await
        .context("read audit ledger")?;
    let result = engine
        .replay_ledger(records, from_seq, limit, segments)
        .await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if let Some(point) = &result.divergence {
        bail!(
            "replay diverged at seq {} ({}) after {} records",
            point.seq,
            point.stage,
            result.records_checked
        );
    }
    info!(records = result.records_checked, "replay matched");
    Ok(())
}

async fn run_verify(config: &Config) -> Result<()> {
    let pipeline = Pipeline::from_config(config).await?;
    let report = pipeline.ledger().verify().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if let Some(broken) = &report.broken {
        bail!("audit chain broken at seq {}: {}", broken.seq, broken.reason);
    }
    Ok(())
}

pub async fn dispatch(cli: Cli, config: Arc<Config>) -> Result<()> {
    match cli.command {
        Commands::Serve { port, host } => {
            let port = port.unwrap_or(config.gateway.port);
            let host = host.unwrap_or_else(|| config.gateway.host.clone());
            if port == 0 {
                info!("Starting axgate control plane on {host} (random port)");
            } else {
                info!("Starting axgate control plane on {host}:{port}");
            }
            axgate::gateway::run_gateway(&host, port, Arc::clone(&config)).await
        }

        Commands::Replay {
            from_seq,
            limit,
            segments,
        } => run_replay(&config, from_seq, limit, segments).await,

        Commands::Verify => run_verify(&config).await,

        Commands::Table => {
            print!("{}", render_table());
            Ok(())
        }

        Commands::Config => {
            let rendered =
                toml::to_string_pretty(config.as_ref()).context("serialize effective config")?;
            println!("{rendered}");
            Ok(())
        }
    }
}
